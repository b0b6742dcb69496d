use serde::{Deserialize, Serialize};

/// Immutable weather record supplied by an external process and consumed
/// read-only each tick. `grip_multiplier` composes multiplicatively with the
/// segment surface grip. Swapped atomically between ticks via
/// `Simulation::set_weather`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherView {
    /// (degC) Ambient temperature.
    pub temperature: f64,
    /// (-) Relative humidity in [0, 1].
    pub humidity: f64,
    /// (-) Rain intensity in [0, 1].
    pub rain_intensity: f64,
    /// (m/s) Wind speed.
    pub wind_speed: f64,
    /// (rad) Wind direction.
    pub wind_dir: f64,
    /// (-) Track wetness in [0, 1].
    pub track_wetness: f64,
    /// (-) Weather grip factor.
    pub grip_multiplier: f64,
}

impl Default for WeatherView {
    fn default() -> Self {
        WeatherView {
            temperature: 25.0,
            humidity: 0.4,
            rain_intensity: 0.0,
            wind_speed: 0.0,
            wind_dir: 0.0,
            track_wetness: 0.0,
            grip_multiplier: 1.0,
        }
    }
}
