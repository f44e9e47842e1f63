//! Protocol module for parsing thermostat payloads.

pub mod realtime;

pub use realtime::parse as parse_realtime;
