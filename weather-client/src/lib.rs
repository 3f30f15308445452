//! Resilient client for the OpenWeather API.
//!
//! This crate defines:
//! - Configuration loading (TOML file plus `OPENWEATHER_*` overrides)
//! - Resilience primitives: circuit breaker, bounded retries with backoff
//! - Classification of upstream responses into [`WeatherError`] kinds
//! - The OpenWeather adapter behind the [`WeatherProvider`] trait
//!
//! It is used by `weather-cli`, but can also be reused by other binaries or services.

pub mod classify;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod provider;
pub mod resilience;
pub mod transport;

pub use config::{BreakerConfig, Config, RetryConfig, UpstreamConfig};
pub use context::CallContext;
pub use error::WeatherError;
pub use model::{OverviewRecord, WeatherRecord};
pub use provider::{OpenWeatherClient, WeatherProvider};
pub use resilience::{BreakerSettings, CircuitBreaker, CircuitState, RetryPolicy};
