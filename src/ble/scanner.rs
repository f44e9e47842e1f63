//! BLE scanning functionality.
//!
//! Locates a thermostat by address and forwards its advertisement RSSI.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::ble::platform::BtleplugConnector;
use crate::ble::transport::DeviceHandle;
use crate::error::{Error, Result};

/// A peripheral matched by [`BleScanner::find_device`].
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    /// Identity handed to the thermostat.
    pub handle: DeviceHandle,
    /// The peripheral handle.
    pub peripheral: Peripheral,
}

/// BLE scanner for locating thermostats.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
}

impl BleScanner {
    /// Create a new BLE scanner on the first adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self { adapter })
    }

    /// Create a new BLE scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Scan until a peripheral with `address` shows up.
    ///
    /// `address` is compared against both the Bluetooth address and the
    /// platform peripheral id, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if nothing matches within `timeout`.
    pub async fn find_device(&self, address: &str, timeout: Duration) -> Result<DiscoveredDevice> {
        let mut events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        info!("Scanning for {}", address);

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        let search = async {
            for peripheral in self.adapter.peripherals().await.map_err(Error::Bluetooth)? {
                if let Some(device) = Self::match_peripheral(peripheral, address).await {
                    return Ok(device);
                }
            }

            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };

                let peripheral = match self.adapter.peripheral(&id).await {
                    Ok(p) => p,
                    Err(e) => {
                        trace!("Failed to get peripheral: {}", e);
                        continue;
                    }
                };

                if let Some(device) = Self::match_peripheral(peripheral, address).await {
                    return Ok(device);
                }
            }

            Err(Error::DeviceNotFound {
                identifier: address.to_string(),
            })
        };

        let result = tokio::time::timeout(timeout, search).await;

        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan: {}", e);
        }

        match result {
            Ok(found) => found,
            Err(_) => Err(Error::DeviceNotFound {
                identifier: address.to_string(),
            }),
        }
    }

    /// Forward the advertised RSSI of `address` to `on_rssi` until the task is aborted.
    pub async fn watch_advertisements<F>(&self, address: &str, on_rssi: F) -> Result<JoinHandle<()>>
    where
        F: Fn(i16) + Send + Sync + 'static,
    {
        let mut events = self.adapter.events().await.map_err(Error::Bluetooth)?;
        let adapter = self.adapter.clone();
        let address = address.to_string();

        Ok(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let CentralEvent::DeviceUpdated(id) = event else {
                    continue;
                };

                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };

                if let Some(device) = Self::match_peripheral(peripheral, &address).await {
                    if let Some(rssi) = device.handle.rssi {
                        trace!("{}: RSSI {}", device.handle, rssi);
                        on_rssi(rssi);
                    }
                }
            }

            debug!("Advertisement watch for {} ended", address);
        }))
    }

    /// Build a connector for a discovered device.
    pub fn connector(&self, device: &DiscoveredDevice) -> BtleplugConnector {
        BtleplugConnector::new(self.adapter.clone(), device.peripheral.clone())
    }

    async fn match_peripheral(peripheral: Peripheral, address: &str) -> Option<DiscoveredDevice> {
        let peripheral_address = peripheral.address().to_string();
        let peripheral_id = peripheral.id().to_string();

        if !matches_address(&peripheral_address, &peripheral_id, address) {
            return None;
        }

        let mut handle = DeviceHandle::new(address.to_uppercase());
        if let Ok(Some(properties)) = peripheral.properties().await {
            handle.name = properties.local_name;
            handle.rssi = properties.rssi;
        }

        Some(DiscoveredDevice { handle, peripheral })
    }
}

/// Whether a peripheral's address or platform id refers to `address`.
fn matches_address(peripheral_address: &str, peripheral_id: &str, address: &str) -> bool {
    peripheral_address.eq_ignore_ascii_case(address) || peripheral_id.eq_ignore_ascii_case(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovered_device_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<DiscoveredDevice>();
    }

    #[test]
    fn test_matches_address_ignores_case() {
        assert!(matches_address(
            "AA:BB:CC:DD:EE:FF",
            "hci0/dev_AA_BB_CC_DD_EE_FF",
            "aa:bb:cc:dd:ee:ff"
        ));
        assert!(matches_address(
            "00:00:00:00:00:00",
            "5e0b7a1c-8a9c-4b1e-9e2a-0c1d2e3f4a5b",
            "5E0B7A1C-8A9C-4B1E-9E2A-0C1D2E3F4A5B"
        ));
        assert!(!matches_address(
            "AA:BB:CC:DD:EE:FF",
            "hci0/dev_AA_BB_CC_DD_EE_FF",
            "11:22:33:44:55:66"
        ));
    }
}
