//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants used for Ensto thermostat communication.

use uuid::Uuid;

// Ensto thermostat characteristics
/// Real-time indication characteristic (Read, Notify).
///
/// Carries the 20-byte temperature/relay/boost snapshot that the state decoder parses.
pub const REAL_TIME_INDICATION_UUID: Uuid =
    Uuid::from_u128(0x66ad_3e6b_3135_4ada_bb2b_8b22916b21d4);

/// Size of a complete real-time indication payload.
pub const REAL_TIME_INDICATION_LEN: usize = 20;
