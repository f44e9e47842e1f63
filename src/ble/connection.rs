//! BLE connection management.
//!
//! Keeps a single notification-subscribed GATT link to the thermostat alive on
//! demand, drops it after a period of inactivity and tears it down cleanly on
//! request. Connect and disconnect sequences are serialized behind one lock so
//! the BLE stack never sees two concurrent connects for the same peripheral.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ble::transport::{
    find_characteristic, CharacteristicHandle, DeviceHandle, DisconnectCallback, GattConnector,
    GattSession, NotificationHandler,
};
use crate::config::ThermostatConfig;
use crate::error::{Error, Result};

/// Connection state for a thermostat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected to the thermostat.
    #[default]
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected and subscribed to notifications.
    Connected,
    /// Currently disconnecting.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Event for connection state changes.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    /// Address of the thermostat.
    pub address: String,
    /// The new connection state.
    pub state: ConnectionState,
}

/// The resolved pieces of a live connection.
///
/// Operations take a copy of this at the start and use it to completion, so a
/// concurrent teardown clearing the manager's fields cannot pull handles out from
/// under an in-flight transaction.
#[derive(Clone)]
pub struct ActiveSession {
    link: Arc<dyn GattSession>,
    read_char: CharacteristicHandle,
    write_char: Option<CharacteristicHandle>,
}

impl ActiveSession {
    /// The characteristic state is read from and notified on.
    pub fn read_characteristic(&self) -> CharacteristicHandle {
        self.read_char
    }

    /// The characteristic commands are written to, if one was resolved.
    pub fn write_characteristic(&self) -> Option<CharacteristicHandle> {
        self.write_char
    }

    /// Read the current state payload.
    pub async fn read_state(&self) -> Result<Vec<u8>> {
        self.link.read(self.read_char).await
    }

    /// Write each command in order.
    pub async fn write_commands(&self, commands: &[Vec<u8>]) -> Result<()> {
        let write_char = self.write_char.ok_or_else(|| Error::CharacteristicNotFound {
            uuid: "write characteristic".to_string(),
        })?;

        for command in commands {
            self.link.write(write_char, command.clone()).await?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("read_char", &self.read_char)
            .field("write_char", &self.write_char)
            .finish_non_exhaustive()
    }
}

/// Pending idle-disconnect timer.
struct IdleTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    /// Identity of the peripheral, refreshed by advertisements.
    device: Arc<RwLock<DeviceHandle>>,
    connector: Arc<dyn GattConnector>,
    config: ThermostatConfig,
    /// Receives every notification on the read characteristic.
    notification_handler: NotificationHandler,
    /// Current session, if any.
    session: RwLock<Option<ActiveSession>>,
    /// Serializes connect and disconnect sequences.
    connect_lock: tokio::sync::Mutex<()>,
    /// Set while a teardown we asked for is in progress.
    expected_disconnect: AtomicBool,
    disconnect_timer: Mutex<Option<IdleTimer>>,
    timer_generation: AtomicU64,
    /// Current connection state.
    state: RwLock<ConnectionState>,
    /// Channel for connection events.
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = self.disconnect_timer.get_mut().take() {
            timer.handle.abort();
        }
    }
}

/// Manages the connection to a thermostat.
///
/// Cloning is cheap and yields another handle to the same session.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new(
        device: Arc<RwLock<DeviceHandle>>,
        connector: Arc<dyn GattConnector>,
        config: ThermostatConfig,
        notification_handler: NotificationHandler,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(16);

        Self {
            inner: Arc::new(Inner {
                device,
                connector,
                config,
                notification_handler,
                session: RwLock::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                expected_disconnect: AtomicBool::new(false),
                disconnect_timer: Mutex::new(None),
                timer_generation: AtomicU64::new(0),
                state: RwLock::new(ConnectionState::Disconnected),
                event_tx,
            }),
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Check if a session is established.
    pub fn is_connected(&self) -> bool {
        self.inner.session.read().is_some() && self.state().is_connected()
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Whether an idle-disconnect timer is currently armed.
    pub fn idle_timer_armed(&self) -> bool {
        self.inner.disconnect_timer.lock().is_some()
    }

    /// Make sure a live, notification-subscribed session exists and return a copy of it.
    ///
    /// Concurrent callers converge on a single physical connect.
    pub async fn ensure_connected(&self) -> Result<ActiveSession> {
        if self.inner.connect_lock.try_lock().is_err() {
            debug!(
                "{}: Connection already in progress, waiting for it to complete; RSSI: {:?}",
                self.name(),
                self.rssi()
            );
        }

        if let Some(session) = self.live_session().await {
            self.reset_disconnect_timer();
            return Ok(session);
        }

        let _guard = self.inner.connect_lock.lock().await;

        // Check again while holding the lock
        if let Some(session) = self.live_session().await {
            self.reset_disconnect_timer();
            return Ok(session);
        }

        self.set_state(ConnectionState::Connecting);

        match self.establish().await {
            Ok(session) => {
                self.set_state(ConnectionState::Connected);
                Ok(session)
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Tear down the current session, if any.
    ///
    /// Calling this without a session is a no-op.
    pub async fn execute_disconnect(&self) -> Result<()> {
        let _guard = self.inner.connect_lock.lock().await;
        self.teardown().await
    }

    /// Handle a link drop reported by the transport.
    pub fn handle_disconnected(&self) {
        if self.inner.expected_disconnect.load(Ordering::SeqCst) {
            debug!(
                "{}: Disconnected from device; RSSI: {:?}",
                self.name(),
                self.rssi()
            );
            return;
        }

        warn!(
            "{}: Device unexpectedly disconnected; RSSI: {:?}",
            self.name(),
            self.rssi()
        );
        self.set_state(ConnectionState::Disconnected);
    }

    /// Return the stored session if its link is still up.
    async fn live_session(&self) -> Option<ActiveSession> {
        let session = self.inner.session.read().clone()?;
        if session.link.is_connected().await {
            Some(session)
        } else {
            None
        }
    }

    /// Connect, resolve characteristics and subscribe. Caller holds the connect lock.
    async fn establish(&self) -> Result<ActiveSession> {
        debug!("{}: Connecting; RSSI: {:?}", self.name(), self.rssi());

        let link = self.connect_link().await?;

        debug!("{}: Connected; RSSI: {:?}", self.name(), self.rssi());

        let session = match self.resolve_characteristics(&link).await {
            Ok(session) => session,
            Err(e) => {
                if let Err(close_err) = link.disconnect().await {
                    debug!(
                        "{}: Failed to close link after setup error: {}",
                        self.name(),
                        close_err
                    );
                }
                return Err(e);
            }
        };

        *self.inner.session.write() = Some(session.clone());
        self.reset_disconnect_timer();

        debug!(
            "{}: Subscribe to notifications; RSSI: {:?}",
            self.name(),
            self.rssi()
        );

        if let Err(e) = link
            .start_notify(session.read_char, self.inner.notification_handler.clone())
            .await
        {
            warn!("{}: Failed to subscribe to notifications: {}", self.name(), e);
            if let Err(teardown_err) = self.teardown().await {
                debug!("{}: Teardown failed: {}", self.name(), teardown_err);
            }
            return Err(e);
        }

        info!("{}: Session established", self.name());

        Ok(session)
    }

    /// Open the physical link, retrying a bounded number of times.
    async fn connect_link(&self) -> Result<Arc<dyn GattSession>> {
        let max_attempts = self.inner.config.connect_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            debug!(
                "{}: Connection attempt {} of {}",
                self.name(),
                attempt,
                max_attempts
            );

            let device = self.inner.device.read().clone();
            match self
                .inner
                .connector
                .connect(device, self.disconnect_callback())
                .await
            {
                Ok(link) => return Ok(link),
                Err(e @ Error::DeviceNotFound { .. }) => return Err(e),
                Err(e) => {
                    warn!(
                        "{}: Connection attempt {} failed: {}",
                        self.name(),
                        attempt,
                        e
                    );
                    last_error = Some(e);

                    if attempt < max_attempts {
                        tokio::time::sleep(self.inner.config.reconnect_delay).await;
                    }
                }
            }
        }

        Err(Error::ConnectionFailed {
            reason: match last_error {
                Some(e) => format!("Failed after {} attempts: {}", max_attempts, e),
                None => format!("Failed after {} attempts", max_attempts),
            },
        })
    }

    /// Resolve the read (and optional write) characteristic, re-discovering once if needed.
    async fn resolve_characteristics(&self, link: &Arc<dyn GattSession>) -> Result<ActiveSession> {
        let read_uuid = self.inner.config.state_characteristic;
        let mut characteristics = link.cached_characteristics();

        if find_characteristic(&characteristics, &read_uuid).is_none() {
            // Try to handle services failing to load
            debug!(
                "{}: Characteristic {} not in cached services, re-discovering",
                self.name(),
                read_uuid
            );
            characteristics = link.discover_characteristics().await?;
        }

        let read_char = find_characteristic(&characteristics, &read_uuid).ok_or_else(|| {
            Error::CharacteristicNotFound {
                uuid: read_uuid.to_string(),
            }
        })?;

        let write_char = self
            .inner
            .config
            .write_characteristic
            .and_then(|uuid| find_characteristic(&characteristics, &uuid));

        Ok(ActiveSession {
            link: link.clone(),
            read_char,
            write_char,
        })
    }

    /// Clear the session and close the link. Caller holds the connect lock.
    async fn teardown(&self) -> Result<()> {
        self.inner.expected_disconnect.store(true, Ordering::SeqCst);
        self.cancel_disconnect_timer();

        let session = self.inner.session.write().take();
        let Some(session) = session else {
            return Ok(());
        };

        self.set_state(ConnectionState::Disconnecting);

        let mut result = Ok(());
        if session.link.is_connected().await {
            if let Err(e) = session.link.stop_notify(session.read_char).await {
                debug!("{}: Failed to stop notifications: {}", self.name(), e);
            }
            result = session.link.disconnect().await;
        }

        self.set_state(ConnectionState::Disconnected);
        result
    }

    /// Re-arm the idle timer: cancel any pending one and start a fresh countdown.
    fn reset_disconnect_timer(&self) {
        self.inner.expected_disconnect.store(false, Ordering::SeqCst);

        let generation = self.inner.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.inner.config.idle_disconnect_delay;
        let weak = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Self::on_idle_timeout(weak, generation, delay).await;
        });

        let previous = self
            .inner
            .disconnect_timer
            .lock()
            .replace(IdleTimer { generation, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    fn cancel_disconnect_timer(&self) {
        if let Some(timer) = self.inner.disconnect_timer.lock().take() {
            timer.handle.abort();
        }
    }

    async fn on_idle_timeout(weak: Weak<Inner>, generation: u64, delay: std::time::Duration) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let manager = Self { inner };

        // Only the most recently armed timer may fire; take it out so teardown
        // does not abort the task running it.
        {
            let mut timer = manager.inner.disconnect_timer.lock();
            let is_current = matches!(timer.as_ref(), Some(t) if t.generation == generation);
            if !is_current {
                return;
            }
            timer.take();
        }

        debug!(
            "{}: Disconnecting after timeout of {:?}",
            manager.name(),
            delay
        );

        if let Err(e) = manager.execute_disconnect().await {
            debug!("{}: Timed disconnect failed: {}", manager.name(), e);
        }
    }

    fn disconnect_callback(&self) -> DisconnectCallback {
        let weak = Arc::downgrade(&self.inner);
        Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                Self { inner }.handle_disconnected();
            }
        })
    }

    fn name(&self) -> String {
        self.inner.device.read().display_name().to_string()
    }

    fn rssi(&self) -> Option<i16> {
        self.inner.device.read().rssi
    }

    /// Update the connection state and emit an event.
    fn set_state(&self, new_state: ConnectionState) {
        let old_state = {
            let mut state = self.inner.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            debug!("Connection state changed: {} -> {}", old_state, new_state);

            let _ = self.inner.event_tx.send(ConnectionEvent {
                address: self.inner.device.read().address.clone(),
                state: new_state,
            });
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("device", &*self.inner.device.read())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
