use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    Humidity,
    AirQuality,
    Pressure,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::AirQuality,
        SensorKind::Pressure,
    ];

    pub fn unit(self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Humidity => "%",
            SensorKind::AirQuality => "AQI",
            SensorKind::Pressure => "hPa",
        }
    }

    /// Resting value a simulated sensor hovers around.
    pub fn baseline(self) -> f64 {
        match self {
            SensorKind::Temperature => 22.5,
            SensorKind::Humidity => 65.0,
            SensorKind::AirQuality => 42.0,
            SensorKind::Pressure => 1013.0,
        }
    }

    /// Half-width of the plausible range, scaled by the noise level.
    fn spread(self) -> f64 {
        match self {
            SensorKind::Temperature => 5.0,
            SensorKind::Humidity => 15.0,
            SensorKind::AirQuality => 25.0,
            SensorKind::Pressure => 5.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::AirQuality => "air_quality",
            SensorKind::Pressure => "pressure",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reading {
    pub sensor_id: String,
    pub kind: SensorKind,
    pub value: f64,
    pub unit: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(sensor_id: impl Into<String>, kind: SensorKind, value: f64) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            kind,
            value,
            unit: kind.unit(),
            timestamp: Utc::now(),
        }
    }

    /// Baseline plus uniform noise in `[-spread, spread] * noise_level`.
    pub fn sample<R: Rng>(
        sensor_id: &str,
        kind: SensorKind,
        noise_level: f64,
        rng: &mut R,
    ) -> Self {
        let noise = rng.gen_range(-1.0_f64..=1.0) * kind.spread() * noise_level;
        Self::new(sensor_id, kind, kind.baseline() + noise)
    }
}
