//! Serialized GATT operations with bounded retries.
//!
//! Every read or write goes through one operation lock so transactions never
//! interleave on the wire. Failures always tear the session down before the
//! error leaves this module, so the next call starts from a fresh connection.

use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::ble::connection::{ActiveSession, ConnectionManager};
use crate::ble::transport::DeviceHandle;
use crate::config::ThermostatConfig;
use crate::error::{Error, Result};

/// Runs read/write transactions against the connection owned by a [`ConnectionManager`].
pub struct OperationExecutor {
    connection: ConnectionManager,
    device: Arc<RwLock<DeviceHandle>>,
    operation_lock: tokio::sync::Mutex<()>,
    attempts: u32,
    busy_backoff: Duration,
    has_write_characteristic: bool,
}

impl OperationExecutor {
    /// Create an executor for `connection`.
    pub fn new(
        connection: ConnectionManager,
        device: Arc<RwLock<DeviceHandle>>,
        config: &ThermostatConfig,
    ) -> Self {
        Self {
            connection,
            device,
            operation_lock: tokio::sync::Mutex::new(()),
            attempts: config.operation_attempts.max(1),
            busy_backoff: config.busy_backoff,
            has_write_characteristic: config.write_characteristic.is_some(),
        }
    }

    /// Read the state characteristic.
    pub async fn read(&self) -> Result<Vec<u8>> {
        debug!("{}: Reading data", self.name());

        self.run("read", |session| async move { session.read_state().await })
            .await
    }

    /// Write `commands` to the write characteristic, in order.
    pub async fn send(&self, commands: &[Vec<u8>]) -> Result<()> {
        if !self.has_write_characteristic {
            return Err(Error::CharacteristicNotFound {
                uuid: "write characteristic (not configured)".to_string(),
            });
        }

        debug!("{}: Sending commands {:02X?}", self.name(), commands);

        self.run("send", |session| async move {
            session.write_commands(commands).await
        })
        .await
    }

    async fn run<T, F, Fut>(&self, operation: &str, transaction: F) -> Result<T>
    where
        F: Fn(ActiveSession) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            // Connect failures are final here; the connection manager already retried them.
            let session = self.connection.ensure_connected().await?;

            let e = {
                let _guard = self.lock_operation().await;
                match transaction(session).await {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        self.recover(&e).await;
                        e
                    }
                }
            };

            if !e.is_retryable() || attempt >= self.attempts {
                return Err(e);
            }

            debug!(
                "{}: {} attempt {} of {} failed, retrying: {}",
                self.name(),
                operation,
                attempt,
                self.attempts,
                e
            );
        }
    }

    /// Take the operation lock, noting when we have to queue behind another transaction.
    async fn lock_operation(&self) -> tokio::sync::MutexGuard<'_, ()> {
        match self.operation_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(
                    "{}: Operation already in progress, waiting for it to complete; RSSI: {:?}",
                    self.name(),
                    self.rssi()
                );
                self.operation_lock.lock().await
            }
        }
    }

    /// Log the failure and reset the session so the next attempt reconnects.
    async fn recover(&self, err: &Error) {
        match err {
            Error::DeviceNotFound { .. } => {
                error!(
                    "{}: device not found, no longer in range, or poor RSSI: {:?}",
                    self.name(),
                    self.rssi()
                );
            }
            Error::CharacteristicNotFound { .. } => {
                debug!(
                    "{}: characteristic missing: {}; RSSI: {:?}",
                    self.name(),
                    err,
                    self.rssi()
                );
            }
            Error::BackendBusy { .. } => {
                tokio::time::sleep(self.busy_backoff).await;
                debug!(
                    "{}: RSSI: {:?}; Backing off {:?}; Disconnecting due to error: {}",
                    self.name(),
                    self.rssi(),
                    self.busy_backoff,
                    err
                );
            }
            _ => {
                debug!(
                    "{}: RSSI: {:?}; Disconnecting due to error: {}",
                    self.name(),
                    self.rssi(),
                    err
                );
            }
        }

        if let Err(e) = self.connection.execute_disconnect().await {
            debug!("{}: Disconnect after failure also failed: {}", self.name(), e);
        }
    }

    fn name(&self) -> String {
        self.device.read().display_name().to_string()
    }

    fn rssi(&self) -> Option<i16> {
        self.device.read().rssi
    }
}
