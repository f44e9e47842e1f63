//! Real-time indication payload parsing.

use crate::ble::uuids::REAL_TIME_INDICATION_LEN;
use crate::data::ThermostatState;
use crate::error::{Error, Result};

/// Scale of the raw temperature fields (tenths of a degree).
const TEMPERATURE_SCALE: f64 = 0.1;

/// Parse a real-time indication payload.
///
/// Layout of the interpreted prefix (little-endian):
/// - Bytes 1-2: Target temperature (u16, 0.1 °C)
/// - Bytes 4-5: Room temperature (u16, 0.1 °C)
///
/// Anything past byte 19 is ignored. Payloads shorter than 20 bytes are partial
/// notifications and are rejected.
pub fn parse(data: &[u8]) -> Result<ThermostatState> {
    if data.len() < REAL_TIME_INDICATION_LEN {
        return Err(Error::InvalidData {
            context: format!(
                "Real-time indication too short: {} bytes (need at least {})",
                data.len(),
                REAL_TIME_INDICATION_LEN
            ),
        });
    }

    let target_temp = read_temperature(data, 1);
    let room_temp = read_temperature(data, 4);
    // Floor temperature shares the room temperature offset.
    // TODO: switch to the dedicated floor offset once the protocol layout is confirmed.
    let floor_temp = read_temperature(data, 4);

    Ok(ThermostatState {
        target_temp,
        room_temp,
        floor_temp,
        ..Default::default()
    })
}

fn read_temperature(data: &[u8], offset: usize) -> f64 {
    f64::from(u16::from_le_bytes([data[offset], data[offset + 1]])) * TEMPERATURE_SCALE
}
