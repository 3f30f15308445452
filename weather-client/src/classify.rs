//! Turns an upstream status and body into a decoded value or a typed error.

use std::fmt;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::{WeatherError, transport::RawResponse};

/// What a request was about; used for default error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Subject {
    City(String),
    Coordinates { lon: f64, lat: f64 },
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::City(city) => write!(f, "city '{city}'"),
            Subject::Coordinates { lon, lat } => write!(f, "coordinates lat={lat}, lon={lon}"),
        }
    }
}

/// Error envelope the upstream sends alongside non-200 statuses.
#[derive(Debug, Default, Deserialize)]
struct UpstreamMessage {
    #[serde(default)]
    message: Option<String>,
}

fn upstream_message(body: &str) -> Option<String> {
    serde_json::from_str::<UpstreamMessage>(body)
        .ok()
        .and_then(|m| m.message)
        .filter(|m| !m.trim().is_empty())
}

/// Classify a response received after retries were exhausted or not needed.
pub fn classify<T: DeserializeOwned>(response: &RawResponse, subject: &Subject) -> Result<T, WeatherError> {
    let body = response.body.as_str();

    let err = match response.status {
        200 => {
            return serde_json::from_str(body).map_err(|e| {
                WeatherError::Internal(format!("malformed response from upstream for {subject}: {e}"))
            });
        }
        404 => WeatherError::NotFound(
            upstream_message(body).unwrap_or_else(|| format!("{subject} not found")),
        ),
        400 => WeatherError::BadRequest(
            upstream_message(body).unwrap_or_else(|| format!("upstream rejected the request for {subject}")),
        ),
        401 => WeatherError::Unauthorized(
            upstream_message(body).unwrap_or_else(|| "upstream rejected the API key".to_string()),
        ),
        403 => WeatherError::Forbidden(
            upstream_message(body).unwrap_or_else(|| "access to the upstream resource is forbidden".to_string()),
        ),
        status @ 400..=499 => WeatherError::BadRequest(format!(
            "upstream rejected the request for {subject} with status {status}: {}",
            upstream_message(body).unwrap_or_else(|| truncate_body(body)),
        )),
        status @ 500.. => WeatherError::Upstream { status, body: body.to_string() },
        status => WeatherError::Internal(format!("unexpected upstream status {status} for {subject}")),
    };

    tracing::debug!(status = response.status, kind = ?err, "classified upstream response");
    Err(err)
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() > MAX {
        format!("{}...", body.chars().take(MAX).collect::<String>())
    } else {
        body.to_string()
    }
}
