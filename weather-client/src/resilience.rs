//! Resilience primitives guarding the upstream.
//!
//! ```text
//! adapter call
//!     → circuit_breaker.rs (admit, reject, or probe)
//!     → retry.rs (GET, retry 5xx with backoff.rs delays)
//!     → breaker records the classified outcome
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod retry;

pub use backoff::RetryPolicy;
pub use circuit_breaker::{
    BreakerSettings, BreakerSettingsError, CircuitBreaker, CircuitOpenError, CircuitState, Counts,
    TripPredicate, failure_ratio_trip,
};
pub use retry::RetryingFetcher;
