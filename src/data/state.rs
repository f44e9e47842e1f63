//! Thermostat state snapshot.
//!
//! A `ThermostatState` is a plain value: every decode produces a new one and the
//! previous snapshot is replaced as a whole.

/// Decoded readings from the thermostat.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThermostatState {
    /// Target temperature in °C.
    pub target_temp: f64,
    /// Room temperature in °C.
    pub room_temp: f64,
    /// Floor temperature in °C.
    pub floor_temp: f64,
    /// Sensor calibration offset in °C. Reserved, not populated by the decoder.
    pub calibration_temp: f64,
    /// Whether boost is active. Reserved, not populated by the decoder.
    pub boost_on: bool,
    /// Boost temperature offset. Reserved, not populated by the decoder.
    pub boost_offset: f64,
    /// Remaining boost time. Reserved, not populated by the decoder.
    pub boost_left: f64,
}

impl ThermostatState {
    /// Get the reading for a sensor.
    pub fn sensor_value(&self, kind: SensorKind) -> f64 {
        match kind {
            SensorKind::TargetTemperature => self.target_temp,
            SensorKind::RoomTemperature => self.room_temp,
            SensorKind::FloorTemperature => self.floor_temp,
        }
    }

    /// All exposed sensors with their current readings.
    pub fn readings(&self) -> impl Iterator<Item = (SensorKind, f64)> + '_ {
        SensorKind::ALL
            .iter()
            .map(move |kind| (*kind, self.sensor_value(*kind)))
    }
}

/// Temperature sensors exposed to presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SensorKind {
    /// Target temperature.
    TargetTemperature,
    /// Room temperature.
    RoomTemperature,
    /// Floor temperature.
    FloorTemperature,
}

impl SensorKind {
    /// Every sensor, in display order.
    pub const ALL: [SensorKind; 3] = [
        Self::TargetTemperature,
        Self::RoomTemperature,
        Self::FloorTemperature,
    ];

    /// Stable key, suitable for unique ids.
    pub fn key(&self) -> &'static str {
        match self {
            Self::TargetTemperature => "target_temp",
            Self::RoomTemperature => "room_temp",
            Self::FloorTemperature => "floor_temp",
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TargetTemperature => "Target temperature",
            Self::RoomTemperature => "Room temperature",
            Self::FloorTemperature => "Floor temperature",
        }
    }

    /// Look a sensor up by its key.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.key() == key)
    }

    /// Unit of measurement.
    pub fn unit(&self) -> &'static str {
        "°C"
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_state_is_zeroed() {
        let state = ThermostatState::default();
        assert_eq!(state.target_temp, 0.0);
        assert!(!state.boost_on);
        assert_eq!(state.boost_left, 0.0);
    }

    #[test]
    fn test_sensor_value_lookup() {
        let state = ThermostatState {
            target_temp: 21.5,
            room_temp: 20.0,
            floor_temp: 19.0,
            ..Default::default()
        };

        assert_eq!(state.sensor_value(SensorKind::TargetTemperature), 21.5);
        assert_eq!(state.sensor_value(SensorKind::RoomTemperature), 20.0);
        assert_eq!(state.sensor_value(SensorKind::FloorTemperature), 19.0);

        let readings: Vec<_> = state.readings().collect();
        assert_eq!(
            readings,
            vec![
                (SensorKind::TargetTemperature, 21.5),
                (SensorKind::RoomTemperature, 20.0),
                (SensorKind::FloorTemperature, 19.0),
            ]
        );
    }

    #[test]
    fn test_sensor_keys() {
        for kind in SensorKind::ALL {
            assert_eq!(SensorKind::from_key(kind.key()), Some(kind));
        }
        assert_eq!(SensorKind::from_key("humidity"), None);
        assert_eq!(SensorKind::RoomTemperature.to_string(), "Room temperature");
    }
}
