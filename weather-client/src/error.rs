use thiserror::Error;

use crate::resilience::CircuitOpenError;

/// Every way a call to the upstream can fail, as seen by callers.
///
/// Variants are matched on, never their messages: the presentation layer turns
/// them into responses via [`WeatherError::http_status`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WeatherError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// Upstream answered with a 5xx after retries were exhausted.
    #[error("upstream request failed with status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },
}

impl WeatherError {
    pub fn internal(message: impl Into<String>) -> Self {
        WeatherError::Internal(message.into())
    }

    /// Status code a presentation layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            WeatherError::NotFound(_) => 404,
            WeatherError::BadRequest(_) => 400,
            WeatherError::Unauthorized(_) => 401,
            WeatherError::Forbidden(_) => 403,
            WeatherError::Timeout(_) => 504,
            WeatherError::Upstream { status: 503, .. } => 503,
            WeatherError::Upstream { .. } => 502,
            WeatherError::Internal(_) | WeatherError::CircuitOpen { .. } => 500,
        }
    }

    /// Failures that may go away on their own (5xx, timeouts).
    pub fn is_transient(&self) -> bool {
        matches!(self, WeatherError::Timeout(_) | WeatherError::Upstream { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, WeatherError::CircuitOpen { .. })
    }
}

impl From<CircuitOpenError> for WeatherError {
    fn from(err: CircuitOpenError) -> Self {
        WeatherError::CircuitOpen { name: err.name }
    }
}
