//! Error types for the ensto-heat-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth error from the underlying BLE library that could not be classified.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The thermostat is no longer reachable (out of range or powered off).
    #[error("Device not found: {identifier}")]
    DeviceNotFound {
        /// The address or identifier that was searched for.
        identifier: String,
    },

    /// Failed to establish a connection to the thermostat.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// A required GATT characteristic is missing, even after re-discovering services.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// The BLE backend reported that another operation is still in progress.
    #[error("Bluetooth backend busy: {reason}")]
    BackendBusy {
        /// The message reported by the backend.
        reason: String,
    },

    /// A transient transport failure that is worth retrying on a fresh connection.
    #[error("Transient transport error: {reason}")]
    Transient {
        /// Description of the failure.
        reason: String,
    },

    /// A caller-imposed deadline elapsed.
    #[error("Operation timed out")]
    Timeout,

    /// Invalid data was received from the thermostat.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// The thermostat did not become ready during setup.
    #[error("Device not ready: {reason}")]
    NotReady {
        /// Why setup gave up.
        reason: String,
    },

    /// A scheduled update cycle failed.
    #[error("Update failed: {reason}")]
    UpdateFailed {
        /// The underlying failure.
        reason: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },
}

impl Error {
    /// Whether the operation that produced this error may be retried on a new connection.
    ///
    /// Missing characteristics and unreachable devices are never retryable: a new
    /// connection within the same session lifetime cannot fix them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendBusy { .. } | Self::Transient { .. })
    }

    /// Whether the backend asked us to back off before retrying.
    pub fn is_backend_busy(&self) -> bool {
        matches!(self, Self::BackendBusy { .. })
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let busy = Error::BackendBusy {
            reason: "org.bluez.Error.InProgress".to_string(),
        };
        assert!(busy.is_retryable());
        assert!(busy.is_backend_busy());

        let transient = Error::Transient {
            reason: "timed out".to_string(),
        };
        assert!(transient.is_retryable());
        assert!(!transient.is_backend_busy());

        assert!(!Error::DeviceNotFound {
            identifier: "AA:BB".to_string()
        }
        .is_retryable());
        assert!(!Error::CharacteristicNotFound {
            uuid: "66ad3e6b".to_string()
        }
        .is_retryable());
        assert!(!Error::Bluetooth(btleplug::Error::PermissionDenied).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::CharacteristicNotFound {
            uuid: "1234".to_string(),
        };
        assert_eq!(err.to_string(), "Characteristic not found: 1234");
        assert_eq!(Error::Timeout.to_string(), "Operation timed out");
    }
}
