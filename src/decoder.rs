//! State decoding and fan-out.
//!
//! Both polled reads and notifications land here. A successful decode replaces
//! the stored snapshot and then notifies observers; partial payloads are dropped.

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::callbacks::{CallbackHandle, ObserverRegistry};
use crate::data::ThermostatState;
use crate::protocol::realtime;

/// Holds the latest [`ThermostatState`] and the observers interested in it.
pub struct StateDecoder {
    /// Device name, for logs.
    name: String,
    state: RwLock<ThermostatState>,
    observers: ObserverRegistry<ThermostatState>,
}

impl StateDecoder {
    /// Create a decoder with a zeroed state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(ThermostatState::default()),
            observers: ObserverRegistry::new(),
        }
    }

    /// The latest decoded snapshot.
    pub fn state(&self) -> ThermostatState {
        *self.state.read()
    }

    /// Decode `data` and, if it is a complete payload, publish the new state.
    ///
    /// Returns the new snapshot, or `None` if the payload was discarded.
    pub fn decode(&self, data: &[u8]) -> Option<ThermostatState> {
        trace!(
            "{}: Notification received: {} bytes, data: {:02X?}",
            self.name,
            data.len(),
            data
        );

        let state = match realtime::parse(data) {
            Ok(state) => state,
            Err(e) => {
                debug!("{}: Ignoring payload: {}", self.name, e);
                return None;
            }
        };

        *self.state.write() = state;

        debug!("{}: State updated: {:?}", self.name, state);

        self.observers.notify(&state);
        Some(state)
    }

    /// Register a callback fired with every new state.
    pub fn register_callback<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&ThermostatState) + Send + Sync + 'static,
    {
        self.observers.register(callback)
    }

    /// Number of registered callbacks.
    pub fn callback_count(&self) -> usize {
        self.observers.len()
    }
}
