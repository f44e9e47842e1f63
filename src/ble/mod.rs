//! BLE communication module.
//!
//! The session logic (`connection`, `executor`) is written against the
//! `transport` traits; `platform` and `scanner` bind it to `btleplug`.

pub mod connection;
pub mod executor;
pub mod platform;
pub mod scanner;
pub mod transport;
pub mod uuids;

pub use connection::{ActiveSession, ConnectionEvent, ConnectionManager, ConnectionState};
pub use executor::OperationExecutor;
pub use platform::{BtleplugConnector, BtleplugSession};
pub use scanner::{BleScanner, DiscoveredDevice};
pub use transport::{
    CharacteristicHandle, DeviceHandle, DisconnectCallback, GattConnector, GattSession,
    NotificationHandler,
};
pub use uuids::*;
