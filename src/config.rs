//! Thermostat session configuration.
//!
//! Every timing and retry knob of the connection lifecycle lives here so that
//! hosts can tune it; the defaults match what the Ensto thermostats tolerate.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::uuids::REAL_TIME_INDICATION_UUID;
use crate::error::{Error, Result};

/// Idle time after which the link is closed to free the radio.
pub const DISCONNECT_DELAY: Duration = Duration::from_secs(120);

/// Attempts per GATT operation.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Pause before retrying when the backend reports it is busy.
pub const BACKEND_BUSY_BACKOFF: Duration = Duration::from_millis(250);

/// Physical connect attempts per `ensure_connected` call.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;

/// Delay between physical connect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Polling cadence used by the coordinator.
pub const UPDATE_INTERVAL: Duration = Duration::from_secs(30);

/// How long setup waits for the first decoded state.
pub const DEVICE_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a single thermostat session.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThermostatConfig {
    /// Characteristic that is read and subscribed to for state updates.
    pub state_characteristic: Uuid,
    /// Characteristic used by `send`, if the host wants to write raw commands.
    pub write_characteristic: Option<Uuid>,
    /// Inactivity period after which the link is dropped.
    pub idle_disconnect_delay: Duration,
    /// Attempts per read/write operation.
    pub operation_attempts: u32,
    /// Backoff applied when the backend reports it is busy.
    pub busy_backoff: Duration,
    /// Physical connect attempts.
    pub connect_attempts: u32,
    /// Delay between physical connect attempts.
    pub reconnect_delay: Duration,
    /// Polling cadence for the coordinator.
    pub update_interval: Duration,
    /// Bounded wait for the first state during setup.
    pub device_timeout: Duration,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            state_characteristic: REAL_TIME_INDICATION_UUID,
            write_characteristic: None,
            idle_disconnect_delay: DISCONNECT_DELAY,
            operation_attempts: DEFAULT_ATTEMPTS,
            busy_backoff: BACKEND_BUSY_BACKOFF,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            update_interval: UPDATE_INTERVAL,
            device_timeout: DEVICE_TIMEOUT,
        }
    }
}

impl ThermostatConfig {
    /// Use a different characteristic for state reads and notifications.
    pub fn with_state_characteristic(mut self, uuid: Uuid) -> Self {
        self.state_characteristic = uuid;
        self
    }

    /// Enable `send` by naming the characteristic to write commands to.
    pub fn with_write_characteristic(mut self, uuid: Uuid) -> Self {
        self.write_characteristic = Some(uuid);
        self
    }

    /// Set the idle disconnect delay.
    pub fn with_idle_disconnect_delay(mut self, delay: Duration) -> Self {
        self.idle_disconnect_delay = delay;
        self
    }

    /// Set the retry budget for operations and the backoff used when the backend is busy.
    pub fn with_operation_retries(mut self, attempts: u32, busy_backoff: Duration) -> Self {
        self.operation_attempts = attempts;
        self.busy_backoff = busy_backoff;
        self
    }

    /// Set the reconnection parameters.
    pub fn with_reconnect_params(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.connect_attempts = max_attempts;
        self.reconnect_delay = delay;
        self
    }

    /// Set the polling interval.
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// Set the bounded wait for the first state.
    pub fn with_device_timeout(mut self, timeout: Duration) -> Self {
        self.device_timeout = timeout;
        self
    }

    /// Check that the configuration can drive a session.
    pub fn validate(&self) -> Result<()> {
        if self.operation_attempts == 0 {
            return Err(invalid("operation_attempts", self.operation_attempts));
        }
        if self.connect_attempts == 0 {
            return Err(invalid("connect_attempts", self.connect_attempts));
        }
        if self.idle_disconnect_delay.is_zero() {
            return Err(invalid(
                "idle_disconnect_delay",
                format!("{:?}", self.idle_disconnect_delay),
            ));
        }
        if self.update_interval.is_zero() {
            return Err(invalid(
                "update_interval",
                format!("{:?}", self.update_interval),
            ));
        }
        Ok(())
    }
}

fn invalid(name: &str, value: impl ToString) -> Error {
    Error::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ThermostatConfig::default();
        assert_eq!(config.idle_disconnect_delay, Duration::from_secs(120));
        assert_eq!(config.operation_attempts, 3);
        assert_eq!(config.busy_backoff, Duration::from_millis(250));
        assert_eq!(config.update_interval, Duration::from_secs(30));
        assert_eq!(config.state_characteristic, REAL_TIME_INDICATION_UUID);
        assert!(config.write_characteristic.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let write = Uuid::from_u128(0x1234);
        let config = ThermostatConfig::default()
            .with_write_characteristic(write)
            .with_reconnect_params(5, Duration::from_millis(10))
            .with_idle_disconnect_delay(Duration::from_secs(5));

        assert_eq!(config.write_characteristic, Some(write));
        assert_eq!(config.connect_attempts, 5);
        assert_eq!(config.reconnect_delay, Duration::from_millis(10));
        assert_eq!(config.idle_disconnect_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = ThermostatConfig::default().with_operation_retries(0, BACKEND_BUSY_BACKOFF);
        match config.validate() {
            Err(Error::InvalidParameter { name, .. }) => assert_eq!(name, "operation_attempts"),
            other => panic!("unexpected result: {:?}", other),
        }

        let config = ThermostatConfig::default().with_reconnect_params(0, Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_idle_delay() {
        let config = ThermostatConfig::default().with_idle_disconnect_delay(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
