// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ensto-heat-ble
//!
//! A Rust library for reading Ensto floor-heating thermostats over Bluetooth
//! Low Energy.
//!
//! The thermostat session heals itself: the link is opened on demand, closed
//! after two minutes of inactivity, and torn down and re-established after any
//! failed operation.
//!
//! ## Features
//!
//! - **Lazy connection**: Connect on first use, reuse while the link is alive
//! - **Idle disconnect**: Release the radio after 120 s without activity
//! - **Bounded retries**: Up to 3 attempts per operation with a forced reconnect
//! - **Real-time state**: Target, room and floor temperatures from polls and notifications
//! - **Observers**: Synchronous callbacks with handle-based unregistration
//! - **Polling coordinator**: Periodic refresh with availability tracking
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ensto_heat_ble::{BleScanner, Coordinator, Result, Thermostat, ThermostatConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let scanner = BleScanner::new().await?;
//!     let device = scanner
//!         .find_device("90:FD:9F:00:00:01", Duration::from_secs(10))
//!         .await?;
//!
//!     let thermostat = Arc::new(Thermostat::new(
//!         device.handle.clone(),
//!         Arc::new(scanner.connector(&device)),
//!         ThermostatConfig::default(),
//!     )?);
//!
//!     let _handle = thermostat.register_callback(|state| {
//!         println!("Room temperature: {:.1}°C", state.room_temp);
//!     });
//!
//!     let coordinator = Coordinator::setup(thermostat).await?;
//!     coordinator.start();
//!
//!     tokio::time::sleep(Duration::from_secs(300)).await;
//!
//!     coordinator.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps. Peripherals are addressed by platform
//! UUID rather than MAC address.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data and configuration types

// Public modules
pub mod ble;
pub mod callbacks;
pub mod config;
pub mod coordinator;
pub mod data;
pub mod decoder;
pub mod error;
pub mod protocol;
pub mod thermostat;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use callbacks::{CallbackHandle, ObserverRegistry};
pub use config::ThermostatConfig;
pub use coordinator::Coordinator;
pub use decoder::StateDecoder;
pub use error::{Error, Result};
pub use thermostat::{ReadySignal, Thermostat};

// Re-export commonly used types from submodules
pub use ble::connection::{ConnectionEvent, ConnectionState};
pub use ble::scanner::{BleScanner, DiscoveredDevice};
pub use ble::transport::{DeviceHandle, GattConnector, GattSession};
pub use data::{SensorKind, ThermostatState};
