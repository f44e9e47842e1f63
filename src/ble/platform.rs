//! `btleplug` implementation of the transport traits.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{
    CharacteristicHandle, DeviceHandle, DisconnectCallback, GattConnector, GattSession,
    NotificationHandler,
};
use crate::error::{Error, Result};

/// Map a `btleplug` error into the crate taxonomy.
///
/// `identifier` names the device in [`Error::DeviceNotFound`].
pub fn classify(err: btleplug::Error, identifier: &str) -> Error {
    match err {
        btleplug::Error::DeviceNotFound => Error::DeviceNotFound {
            identifier: identifier.to_string(),
        },
        btleplug::Error::NotConnected | btleplug::Error::TimedOut(_) => Error::Transient {
            reason: err.to_string(),
        },
        err if is_busy_message(&err.to_string()) => Error::BackendBusy {
            reason: err.to_string(),
        },
        err => Error::Bluetooth(err),
    }
}

/// Whether a backend error message says another operation is still running.
fn is_busy_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("inprogress") || message.contains("in progress") || message.contains("busy")
}

/// Opens links to a single `btleplug` peripheral.
pub struct BtleplugConnector {
    adapter: Adapter,
    peripheral: Peripheral,
}

impl BtleplugConnector {
    /// Create a connector for `peripheral`, watching `adapter` for link drops.
    pub fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        Self {
            adapter,
            peripheral,
        }
    }
}

#[async_trait]
impl GattConnector for BtleplugConnector {
    async fn connect(
        &self,
        device: DeviceHandle,
        on_disconnect: DisconnectCallback,
    ) -> Result<Arc<dyn GattSession>> {
        let identifier = device.address.clone();

        // Subscribe before connecting so a drop right after connect is not missed.
        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| classify(e, &identifier))?;

        if !self.peripheral.is_connected().await.unwrap_or(false) {
            self.peripheral
                .connect()
                .await
                .map_err(|e| match classify(e, &identifier) {
                    e @ Error::DeviceNotFound { .. } => e,
                    e => Error::ConnectionFailed {
                        reason: e.to_string(),
                    },
                })?;
        }

        if let Err(e) = self.peripheral.discover_services().await {
            warn!("{}: Service discovery failed: {}", device, e);
        }

        let peripheral_id = self.peripheral.id();
        let name = device.display_name().to_string();
        let disconnect_watcher = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == peripheral_id {
                        debug!("{}: Link dropped", name);
                        on_disconnect();
                        break;
                    }
                }
            }
        });

        Ok(Arc::new(BtleplugSession {
            peripheral: self.peripheral.clone(),
            identifier,
            notify_tasks: Mutex::new(HashMap::new()),
            disconnect_watcher,
        }))
    }
}

/// An open link to a `btleplug` peripheral.
pub struct BtleplugSession {
    peripheral: Peripheral,
    identifier: String,
    /// Notification forwarding tasks by characteristic.
    notify_tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    disconnect_watcher: JoinHandle<()>,
}

impl BtleplugSession {
    fn characteristic(&self, handle: CharacteristicHandle) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == handle.uuid && c.service_uuid == handle.service_uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: handle.uuid.to_string(),
            })
    }

    fn classify(&self, err: btleplug::Error) -> Error {
        classify(err, &self.identifier)
    }

    fn abort_notify_tasks(&self) {
        for (_, task) in self.notify_tasks.lock().drain() {
            task.abort();
        }
    }
}

#[async_trait]
impl GattSession for BtleplugSession {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    fn cached_characteristics(&self) -> Vec<CharacteristicHandle> {
        self.peripheral
            .characteristics()
            .iter()
            .map(CharacteristicHandle::from)
            .collect()
    }

    async fn discover_characteristics(&self) -> Result<Vec<CharacteristicHandle>> {
        self.peripheral
            .discover_services()
            .await
            .map_err(|e| self.classify(e))?;

        Ok(self.cached_characteristics())
    }

    async fn start_notify(
        &self,
        characteristic: CharacteristicHandle,
        handler: NotificationHandler,
    ) -> Result<()> {
        let target = self.characteristic(characteristic)?;

        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| self.classify(e))?;

        self.peripheral
            .subscribe(&target)
            .await
            .map_err(|e| self.classify(e))?;

        let uuid = characteristic.uuid;
        let task = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != uuid {
                    continue;
                }
                trace!(
                    "Notification from {}: {} bytes",
                    notification.uuid,
                    notification.value.len()
                );
                handler(&notification.value);
            }
        });

        if let Some(previous) = self.notify_tasks.lock().insert(uuid, task) {
            previous.abort();
        }

        Ok(())
    }

    async fn stop_notify(&self, characteristic: CharacteristicHandle) -> Result<()> {
        if let Some(task) = self.notify_tasks.lock().remove(&characteristic.uuid) {
            task.abort();
        }

        let target = self.characteristic(characteristic)?;
        self.peripheral
            .unsubscribe(&target)
            .await
            .map_err(|e| self.classify(e))
    }

    async fn write(&self, characteristic: CharacteristicHandle, data: Vec<u8>) -> Result<()> {
        let target = self.characteristic(characteristic)?;

        self.peripheral
            .write(&target, &data, WriteType::WithoutResponse)
            .await
            .map_err(|e| self.classify(e))?;

        trace!("Wrote {} bytes to {}", data.len(), characteristic.uuid);

        Ok(())
    }

    async fn read(&self, characteristic: CharacteristicHandle) -> Result<Vec<u8>> {
        let target = self.characteristic(characteristic)?;

        let data = self
            .peripheral
            .read(&target)
            .await
            .map_err(|e| self.classify(e))?;

        trace!("Read {} bytes from {}", data.len(), characteristic.uuid);

        Ok(data)
    }

    async fn disconnect(&self) -> Result<()> {
        self.abort_notify_tasks();
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| self.classify(e))
    }
}

impl Drop for BtleplugSession {
    fn drop(&mut self) {
        self.abort_notify_tasks();
        self.disconnect_watcher.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

    #[test]
    fn test_classify_device_not_found() {
        let err = classify(btleplug::Error::DeviceNotFound, ADDRESS);
        match err {
            Error::DeviceNotFound { identifier } => assert_eq!(identifier, ADDRESS),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_classify_transient() {
        assert!(matches!(
            classify(btleplug::Error::NotConnected, ADDRESS),
            Error::Transient { .. }
        ));
        assert!(matches!(
            classify(btleplug::Error::TimedOut(Duration::from_secs(5)), ADDRESS),
            Error::Transient { .. }
        ));
    }

    #[test]
    fn test_classify_backend_busy() {
        let err = classify(
            btleplug::Error::RuntimeError("org.bluez.Error.InProgress".to_string()),
            ADDRESS,
        );
        assert!(err.is_backend_busy());

        let err = classify(
            btleplug::Error::RuntimeError("Operation already in progress".to_string()),
            ADDRESS,
        );
        assert!(err.is_backend_busy());
    }

    #[test]
    fn test_classify_unclassified() {
        let err = classify(btleplug::Error::PermissionDenied, ADDRESS);
        assert!(matches!(err, Error::Bluetooth(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_busy_message_matching() {
        assert!(is_busy_message("Device or resource busy"));
        assert!(is_busy_message("org.bluez.Error.InProgress"));
        assert!(!is_busy_message("Permission denied"));
    }
}
