use crate::{CallContext, OverviewRecord, WeatherError, WeatherRecord};
use async_trait::async_trait;
use std::fmt::Debug;

pub mod openweather;

pub use openweather::OpenWeatherClient;

/// Domain-facing weather lookups.
///
/// Errors are always one of the [`WeatherError`] kinds; callers map them to
/// their own responses without inspecting messages.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    async fn get_weather_by_city(
        &self,
        city: &str,
        ctx: &CallContext,
    ) -> Result<WeatherRecord, WeatherError>;

    async fn get_weather_overview(
        &self,
        lon: f64,
        lat: f64,
        ctx: &CallContext,
    ) -> Result<OverviewRecord, WeatherError>;
}

/// Reject blank city names before any upstream traffic.
pub(crate) fn validate_city(city: &str) -> Result<&str, WeatherError> {
    let city = city.trim();
    if city.is_empty() {
        return Err(WeatherError::BadRequest("city parameter is required".to_string()));
    }
    Ok(city)
}

/// Reject coordinates the upstream could never resolve.
pub(crate) fn validate_coordinates(lon: f64, lat: f64) -> Result<(), WeatherError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(WeatherError::BadRequest(format!(
            "latitude must be between -90 and 90 (got {lat})"
        )));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(WeatherError::BadRequest(format!(
            "longitude must be between -180 and 180 (got {lon})"
        )));
    }
    Ok(())
}
