//! Periodic polling of a thermostat.
//!
//! The coordinator performs the first refresh during setup, waits for the first
//! decoded state, and then refreshes on a fixed interval until shut down. It
//! tracks availability so hosts can grey out stale readings.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::ThermostatConfig;
use crate::error::{Error, Result};
use crate::thermostat::Thermostat;

/// Outcome of the most recent refresh cycles.
#[derive(Debug, Clone, Default)]
struct UpdateStatus {
    available: bool,
    last_update_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Polls a [`Thermostat`] on a fixed interval.
pub struct Coordinator {
    thermostat: Arc<Thermostat>,
    status: Arc<RwLock<UpdateStatus>>,
    /// Background task handle.
    background_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
    /// Running flag.
    is_running: Arc<AtomicBool>,
    /// Wakes the current polling loop; replaced on every `start`.
    shutdown_signal: RwLock<Option<Arc<Notify>>>,
}

impl Coordinator {
    /// Run the first refresh and wait for the first decoded state.
    ///
    /// Timing comes from the thermostat's own configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] if the first refresh fails or no state is
    /// decoded within the configured `device_timeout`.
    pub async fn setup(thermostat: Arc<Thermostat>) -> Result<Self> {
        let coordinator = Self {
            thermostat,
            status: Arc::new(RwLock::new(UpdateStatus::default())),
            background_handle: RwLock::new(None),
            is_running: Arc::new(AtomicBool::new(false)),
            shutdown_signal: RwLock::new(None),
        };

        let name = coordinator.thermostat.name();
        let ready = coordinator.thermostat.ready_signal();

        if let Err(e) = coordinator.refresh().await {
            return Err(Error::NotReady {
                reason: format!("Could not initialise {}: {}", name, e),
            });
        }

        match ready.wait(coordinator.config().device_timeout).await {
            Ok(state) => {
                info!("{}: Ready, first state: {:?}", name, state);
                Ok(coordinator)
            }
            Err(Error::Timeout) => Err(Error::NotReady {
                reason: format!(
                    "Unable to communicate with the device; Try moving the Bluetooth adapter closer to {}",
                    name
                ),
            }),
            Err(e) => Err(Error::NotReady {
                reason: e.to_string(),
            }),
        }
    }

    /// The thermostat being polled.
    pub fn thermostat(&self) -> &Arc<Thermostat> {
        &self.thermostat
    }

    /// Configuration shared with the thermostat.
    pub fn config(&self) -> &ThermostatConfig {
        self.thermostat.config()
    }

    /// Whether the last refresh succeeded.
    pub fn is_available(&self) -> bool {
        self.status.read().available
    }

    /// Time of the last successful refresh.
    pub fn last_update_success(&self) -> Option<DateTime<Utc>> {
        self.status.read().last_update_success
    }

    /// Message of the last failed refresh, cleared on recovery.
    pub fn last_error(&self) -> Option<String> {
        self.status.read().last_error.clone()
    }

    /// Whether the polling loop is running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Run one refresh cycle now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UpdateFailed`] wrapping the underlying failure.
    pub async fn refresh(&self) -> Result<()> {
        Self::run_refresh(&self.thermostat, &self.status).await
    }

    /// Start polling every `update_interval`.
    pub fn start(&self) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            debug!("{}: Polling already running", self.thermostat.name());
            return;
        }

        info!(
            "{}: Polling every {:?}",
            self.thermostat.name(),
            self.config().update_interval
        );

        let thermostat = self.thermostat.clone();
        let status = self.status.clone();
        let is_running = self.is_running.clone();
        let shutdown_signal = Arc::new(Notify::new());
        let period = self.config().update_interval;

        *self.shutdown_signal.write() = Some(shutdown_signal.clone());

        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);

            while is_running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = interval.tick() => {
                        // Failures are recorded in the status.
                        let _ = Self::run_refresh(&thermostat, &status).await;
                    }
                    _ = shutdown_signal.notified() => break,
                }
            }

            debug!("{}: Polling task ended", thermostat.name());
        });

        *self.background_handle.write() = Some(handle);
    }

    /// Stop polling and close the connection.
    pub async fn shutdown(&self) -> Result<()> {
        info!("{}: Shutting down coordinator", self.thermostat.name());

        self.is_running.store(false, Ordering::SeqCst);
        if let Some(signal) = self.shutdown_signal.write().take() {
            signal.notify_one();
        }

        let handle = self.background_handle.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.thermostat.stop().await
    }

    async fn run_refresh(thermostat: &Thermostat, status: &RwLock<UpdateStatus>) -> Result<()> {
        match thermostat.update().await {
            Ok(()) => {
                let mut status = status.write();
                if status.last_error.take().is_some() {
                    info!("{}: Fetching data recovered", thermostat.name());
                }
                status.available = true;
                status.last_update_success = Some(Utc::now());
                Ok(())
            }
            Err(e) => {
                let mut status = status.write();
                if status.last_error.is_none() {
                    warn!("{}: Error fetching data: {}", thermostat.name(), e);
                }
                status.available = false;
                status.last_error = Some(e.to_string());
                Err(Error::UpdateFailed {
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("thermostat", &self.thermostat)
            .field("status", &*self.status.read())
            .field("is_running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(handle) = self.background_handle.get_mut().take() {
            handle.abort();
        }
    }
}
