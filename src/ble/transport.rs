//! Transport abstraction for the GATT link.
//!
//! The connection manager only talks to the radio through these traits, so the
//! session state machine can run against `btleplug` in production and against
//! fakes in tests.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;

/// Callback invoked by the transport when the link drops.
pub type DisconnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Callback invoked with the raw bytes of every notification on a subscribed characteristic.
pub type NotificationHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Identity of a peripheral as supplied by the discovery layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Bluetooth address (a platform UUID on macOS).
    pub address: String,
    /// Advertised local name.
    pub name: Option<String>,
    /// Last advertised signal strength in dBm.
    pub rssi: Option<i16>,
}

impl DeviceHandle {
    /// Create a handle for an address with no name or signal reading yet.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            rssi: None,
        }
    }

    /// Attach the advertised name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a signal strength reading.
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Name used in logs and user-facing messages: the advertised name, else the address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A characteristic resolved on a connected peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the service that owns the characteristic.
    pub service_uuid: Uuid,
}

impl CharacteristicHandle {
    /// Create a new handle.
    pub fn new(uuid: Uuid, service_uuid: Uuid) -> Self {
        Self { uuid, service_uuid }
    }
}

impl From<&btleplug::api::Characteristic> for CharacteristicHandle {
    fn from(characteristic: &btleplug::api::Characteristic) -> Self {
        Self::new(characteristic.uuid, characteristic.service_uuid)
    }
}

/// Find a characteristic by UUID in a characteristic list.
pub fn find_characteristic(
    characteristics: &[CharacteristicHandle],
    uuid: &Uuid,
) -> Option<CharacteristicHandle> {
    characteristics.iter().find(|c| c.uuid == *uuid).copied()
}

/// Establishes GATT links to a peripheral.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GattConnector: Send + Sync {
    /// Open a link to `device`. `on_disconnect` must be invoked whenever the link drops,
    /// whether we asked for it or not.
    async fn connect(
        &self,
        device: DeviceHandle,
        on_disconnect: DisconnectCallback,
    ) -> Result<Arc<dyn GattSession>>;
}

/// An open GATT link.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GattSession: Send + Sync {
    /// Whether the link is still up.
    async fn is_connected(&self) -> bool;

    /// Characteristics known from the (possibly cached) service list.
    fn cached_characteristics(&self) -> Vec<CharacteristicHandle>;

    /// Force a full service re-discovery and return the fresh characteristic list.
    async fn discover_characteristics(&self) -> Result<Vec<CharacteristicHandle>>;

    /// Subscribe to notifications and route them to `handler`.
    async fn start_notify(
        &self,
        characteristic: CharacteristicHandle,
        handler: NotificationHandler,
    ) -> Result<()>;

    /// Stop notifications on a characteristic.
    async fn stop_notify(&self, characteristic: CharacteristicHandle) -> Result<()>;

    /// Write a value without response.
    async fn write(&self, characteristic: CharacteristicHandle, data: Vec<u8>) -> Result<()>;

    /// Read a characteristic value.
    async fn read(&self, characteristic: CharacteristicHandle) -> Result<Vec<u8>>;

    /// Close the link.
    async fn disconnect(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_falls_back_to_address() {
        let device = DeviceHandle::new("AA:BB:CC:DD:EE:FF");
        assert_eq!(device.display_name(), "AA:BB:CC:DD:EE:FF");

        let device = device.with_name("ECO16BT").with_rssi(-70);
        assert_eq!(device.display_name(), "ECO16BT");
        assert_eq!(device.to_string(), "ECO16BT");
        assert_eq!(device.rssi, Some(-70));
    }

    #[test]
    fn test_find_characteristic() {
        let service = Uuid::from_u128(1);
        let list = vec![
            CharacteristicHandle::new(Uuid::from_u128(2), service),
            CharacteristicHandle::new(Uuid::from_u128(3), service),
        ];
        assert_eq!(
            find_characteristic(&list, &Uuid::from_u128(3)).map(|c| c.uuid),
            Some(Uuid::from_u128(3))
        );
        assert!(find_characteristic(&list, &Uuid::from_u128(4)).is_none());
    }
}
