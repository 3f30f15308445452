use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current conditions for a city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub city: String,
    /// Degrees Celsius.
    pub temperature: f64,
    /// Empty when the upstream returned no condition entries.
    pub description: String,
    /// Relative humidity, percent.
    pub humidity: u8,
    /// Metres per second.
    pub wind_speed: f64,
    /// When the record was fetched.
    pub timestamp: DateTime<Utc>,
}

/// Human-readable weather summary for a coordinate pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewRecord {
    pub lat: f64,
    pub lon: f64,
    pub tz: String,
    pub date: String,
    pub units: String,
    pub weather_overview: String,
}
