//! Data structures for thermostat readings.

pub mod state;

pub use state::{SensorKind, ThermostatState};
