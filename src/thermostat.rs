//! Thermostat struct and methods.
//!
//! Represents a single Ensto thermostat reachable over BLE. The thermostat owns
//! its connection manager, operation executor and state decoder; callers only
//! see `update`, `send`, `stop` and the observer API.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info};

use crate::ble::connection::{ConnectionEvent, ConnectionManager, ConnectionState};
use crate::ble::executor::OperationExecutor;
use crate::ble::transport::{DeviceHandle, GattConnector, NotificationHandler};
use crate::callbacks::CallbackHandle;
use crate::config::ThermostatConfig;
use crate::data::ThermostatState;
use crate::decoder::StateDecoder;
use crate::error::{Error, Result};

/// A single Ensto thermostat.
pub struct Thermostat {
    /// Identity of the peripheral.
    device: Arc<RwLock<DeviceHandle>>,
    /// Connection lifecycle.
    connection: ConnectionManager,
    /// Serialized GATT operations.
    executor: OperationExecutor,
    /// Latest state and its observers.
    decoder: Arc<StateDecoder>,
    config: ThermostatConfig,
}

impl Thermostat {
    /// Create a thermostat bound to `device`.
    ///
    /// Nothing is connected until the first [`update`](Self::update) or
    /// [`send`](Self::send).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `config` does not validate.
    pub fn new(
        device: DeviceHandle,
        connector: Arc<dyn GattConnector>,
        config: ThermostatConfig,
    ) -> Result<Self> {
        config.validate()?;

        let decoder = Arc::new(StateDecoder::new(device.display_name()));
        let device = Arc::new(RwLock::new(device));

        let notification_handler: NotificationHandler = {
            let decoder = decoder.clone();
            Arc::new(move |data: &[u8]| {
                decoder.decode(data);
            })
        };

        let connection = ConnectionManager::new(
            device.clone(),
            connector,
            config.clone(),
            notification_handler,
        );
        let executor = OperationExecutor::new(connection.clone(), device.clone(), &config);

        Ok(Self {
            device,
            connection,
            executor,
            decoder,
            config,
        })
    }

    /// Display name of the device.
    pub fn name(&self) -> String {
        self.device.read().display_name().to_string()
    }

    /// Platform address of the device.
    pub fn address(&self) -> String {
        self.device.read().address.clone()
    }

    /// Session configuration.
    pub fn config(&self) -> &ThermostatConfig {
        &self.config
    }

    /// Last known signal strength.
    pub fn rssi(&self) -> Option<i16> {
        self.device.read().rssi
    }

    /// Record a fresh RSSI from an advertisement.
    pub fn set_rssi(&self, rssi: i16) {
        self.device.write().rssi = Some(rssi);
    }

    /// The latest decoded state.
    pub fn state(&self) -> ThermostatState {
        self.decoder.state()
    }

    /// Get the connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe()
    }

    /// Read the state characteristic and publish the decoded result.
    ///
    /// A partial payload is dropped silently and still counts as success.
    pub async fn update(&self) -> Result<()> {
        debug!("{}: Updating", self.name());

        let data = self.executor.read().await?;
        self.decoder.decode(&data);

        Ok(())
    }

    /// Write raw commands to the configured write characteristic.
    pub async fn send(&self, commands: &[Vec<u8>]) -> Result<()> {
        self.executor.send(commands).await
    }

    /// Tear down the session. Safe to call repeatedly.
    pub async fn stop(&self) -> Result<()> {
        info!("{}: Stopping", self.name());
        self.connection.execute_disconnect().await
    }

    /// Register a callback for state updates.
    pub fn register_callback<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&ThermostatState) + Send + Sync + 'static,
    {
        self.decoder.register_callback(callback)
    }

    /// Number of registered state callbacks.
    pub fn callback_count(&self) -> usize {
        self.decoder.callback_count()
    }

    /// One-shot signal resolved by the next decoded state.
    pub fn ready_signal(&self) -> ReadySignal {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));

        let handle = self.decoder.register_callback(move |state| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(*state);
            }
        });

        ReadySignal {
            rx,
            _handle: handle,
        }
    }
}

impl std::fmt::Debug for Thermostat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thermostat")
            .field("device", &*self.device.read())
            .field("connection_state", &self.connection.state())
            .finish_non_exhaustive()
    }
}

/// Resolves with the first state decoded after its creation.
///
/// The underlying observer is unregistered when the signal is dropped, whether
/// or not it fired.
pub struct ReadySignal {
    rx: oneshot::Receiver<ThermostatState>,
    _handle: CallbackHandle,
}

impl ReadySignal {
    /// Wait up to `timeout` for the first state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no state arrives in time.
    pub async fn wait(self, timeout: Duration) -> Result<ThermostatState> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(_)) => Err(Error::NotReady {
                reason: "state observer closed before the first update".to_string(),
            }),
            Err(_) => Err(Error::Timeout),
        }
    }
}
