//! Circuit breaker guarding a single upstream dependency.
//!
//! # States
//! - Closed: calls pass through; counts roll over every `closed_interval`
//! - Open: calls fail fast until `open_timeout` elapses
//! - HalfOpen: up to `max_half_open_requests` probes test the upstream
//!
//! # Transitions
//! ```text
//! Closed   → Open:     ready_to_trip(counts) after a failure
//! Open     → HalfOpen: open_timeout elapsed
//! HalfOpen → Closed:   max_half_open_requests consecutive successes
//! HalfOpen → Open:     any failure
//! ```
//!
//! Every reset of the counts starts a new generation. A call is attributed to
//! the generation in which it was admitted; results arriving after the
//! generation moved on are dropped.
//!
//! All bookkeeping happens under one `Mutex` which is never held while the
//! guarded operation runs.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        })
    }
}

/// Outcome counters of the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_success(&mut self) {
        self.requests = self.requests.saturating_add(1);
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.requests = self.requests.saturating_add(1);
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    /// Share of recorded requests that failed; 0 when nothing was recorded.
    pub fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            f64::from(self.total_failures) / f64::from(self.requests)
        }
    }
}

/// Decides, from post-update counts, whether a Closed breaker should open.
pub type TripPredicate = Arc<dyn Fn(&Counts) -> bool + Send + Sync>;

/// Trip once at least `min_requests` were recorded and the failure ratio reached `ratio`.
pub fn failure_ratio_trip(min_requests: u32, ratio: f64) -> TripPredicate {
    Arc::new(move |counts: &Counts| {
        counts.requests >= min_requests && counts.failure_ratio() >= ratio
    })
}

/// Errors produced when validating breaker settings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BreakerSettingsError {
    #[error("max_half_open_requests must be > 0")]
    ZeroHalfOpenLimit,

    #[error("open_timeout must be > 0")]
    ZeroOpenTimeout,

    #[error("min_requests must be > 0")]
    ZeroMinRequests,

    #[error("failure_ratio must be within (0, 1] (got {0})")]
    InvalidFailureRatio(f64),
}

#[derive(Clone)]
pub struct BreakerSettings {
    max_half_open_requests: u32,
    /// Zero disables the periodic reset of counts while Closed.
    closed_interval: Duration,
    open_timeout: Duration,
    ready_to_trip: TripPredicate,
}

impl fmt::Debug for BreakerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerSettings")
            .field("max_half_open_requests", &self.max_half_open_requests)
            .field("closed_interval", &self.closed_interval)
            .field("open_timeout", &self.open_timeout)
            .finish_non_exhaustive()
    }
}

impl BreakerSettings {
    /// Settings with the default ready-to-trip policy (3 requests, 60% failures).
    pub fn new(max_half_open_requests: u32, closed_interval: Duration, open_timeout: Duration) -> Self {
        Self {
            max_half_open_requests,
            closed_interval,
            open_timeout,
            ready_to_trip: failure_ratio_trip(3, 0.6),
        }
    }

    /// Replace the trip policy with a minimum-volume plus failure-ratio rule.
    pub fn with_failure_ratio(
        mut self,
        min_requests: u32,
        ratio: f64,
    ) -> Result<Self, BreakerSettingsError> {
        if min_requests == 0 {
            return Err(BreakerSettingsError::ZeroMinRequests);
        }
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(BreakerSettingsError::InvalidFailureRatio(ratio));
        }
        self.ready_to_trip = failure_ratio_trip(min_requests, ratio);
        Ok(self)
    }

    /// Replace the trip policy with an arbitrary predicate.
    pub fn with_ready_to_trip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Counts) -> bool + Send + Sync + 'static,
    {
        self.ready_to_trip = Arc::new(predicate);
        self
    }

    pub fn max_half_open_requests(&self) -> u32 {
        self.max_half_open_requests
    }

    pub fn closed_interval(&self) -> Duration {
        self.closed_interval
    }

    pub fn open_timeout(&self) -> Duration {
        self.open_timeout
    }

    pub fn validate(&self) -> Result<(), BreakerSettingsError> {
        if self.max_half_open_requests == 0 {
            return Err(BreakerSettingsError::ZeroHalfOpenLimit);
        }
        if self.open_timeout.is_zero() {
            return Err(BreakerSettingsError::ZeroOpenTimeout);
        }
        Ok(())
    }

    fn expiry_for(&self, state: CircuitState, now: Instant) -> Option<Instant> {
        match state {
            CircuitState::Closed if self.closed_interval.is_zero() => None,
            CircuitState::Closed => now.checked_add(self.closed_interval),
            CircuitState::Open => now.checked_add(self.open_timeout),
            CircuitState::HalfOpen => None,
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(10), Duration::from_secs(60))
    }
}

/// Returned instead of running the operation when the breaker rejects a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{name}' is open")]
pub struct CircuitOpenError {
    pub name: String,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    /// Probes admitted in the current HalfOpen generation.
    half_open_probes: u32,
    expiry: Option<Instant>,
}

/// Circuit breaker for one upstream dependency.
///
/// Construct one per dependency and share it behind an `Arc`.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        settings: BreakerSettings,
    ) -> Result<Self, BreakerSettingsError> {
        settings.validate()?;
        let expiry = settings.expiry_for(CircuitState::Closed, Instant::now());

        Ok(Self {
            name: name.into(),
            settings,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                half_open_probes: 0,
                expiry,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// Current state, after applying any elapsed timer.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.current_state(&mut inner, Instant::now())
    }

    pub fn counts(&self) -> Counts {
        let mut inner = self.lock();
        self.current_state(&mut inner, Instant::now());
        inner.counts
    }

    pub fn generation(&self) -> u64 {
        let mut inner = self.lock();
        self.current_state(&mut inner, Instant::now());
        inner.generation
    }

    /// Run `operation` if the breaker admits it and record its outcome.
    ///
    /// # Errors
    /// Returns the operation's own error unchanged, or `E::from(CircuitOpenError)`
    /// when the call was rejected without running the operation.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        let generation = self.before_call()?;
        let mut admitted = AdmittedCall { breaker: self, generation, settled: false };

        let result = operation().await;
        admitted.settle(result.is_ok());

        result
    }

    fn before_call(&self) -> Result<u64, CircuitOpenError> {
        let mut inner = self.lock();
        let state = self.current_state(&mut inner, Instant::now());

        match state {
            CircuitState::Closed => Ok(inner.generation),
            CircuitState::HalfOpen
                if inner.half_open_probes < self.settings.max_half_open_requests =>
            {
                inner.half_open_probes += 1;
                tracing::debug!(
                    breaker = %self.name,
                    probes = inner.half_open_probes,
                    max = self.settings.max_half_open_requests,
                    "circuit breaker admitted half-open probe"
                );
                Ok(inner.generation)
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                tracing::debug!(breaker = %self.name, state = %state, "circuit breaker rejected call");
                Err(CircuitOpenError { name: self.name.clone() })
            }
        }
    }

    fn after_call(&self, generation: u64, success: bool) {
        let mut inner = self.lock();
        let now = Instant::now();
        let state = self.current_state(&mut inner, now);

        if inner.generation != generation {
            tracing::debug!(
                breaker = %self.name,
                started = generation,
                current = inner.generation,
                "discarding result from a previous generation"
            );
            return;
        }

        if success {
            self.on_success(&mut inner, state, now);
        } else {
            self.on_failure(&mut inner, state, now);
        }
    }

    fn on_success(&self, inner: &mut BreakerState, state: CircuitState, now: Instant) {
        match state {
            CircuitState::Closed => inner.counts.on_success(),
            CircuitState::HalfOpen => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.settings.max_half_open_requests {
                    self.set_state(inner, CircuitState::Closed, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, inner: &mut BreakerState, state: CircuitState, now: Instant) {
        match state {
            CircuitState::Closed => {
                inner.counts.on_failure();
                if (self.settings.ready_to_trip)(&inner.counts) {
                    tracing::warn!(
                        breaker = %self.name,
                        requests = inner.counts.requests,
                        failures = inner.counts.total_failures,
                        "failure threshold reached"
                    );
                    self.set_state(inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => self.set_state(inner, CircuitState::Open, now),
            CircuitState::Open => {}
        }
    }

    fn current_state(&self, inner: &mut BreakerState, now: Instant) -> CircuitState {
        let expired = inner.expiry.is_some_and(|expiry| expiry <= now);

        match inner.state {
            CircuitState::Closed if expired => self.new_generation(inner, now),
            CircuitState::Open if expired => self.set_state(inner, CircuitState::HalfOpen, now),
            _ => {}
        }

        inner.state
    }

    fn set_state(&self, inner: &mut BreakerState, to: CircuitState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }

        inner.state = to;
        self.new_generation(inner, now);

        match to {
            CircuitState::Open => {
                tracing::warn!(breaker = %self.name, %from, %to, "circuit breaker state changed")
            }
            _ => tracing::info!(breaker = %self.name, %from, %to, "circuit breaker state changed"),
        }
    }

    fn new_generation(&self, inner: &mut BreakerState, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts = Counts::default();
        inner.half_open_probes = 0;
        inner.expiry = self.settings.expiry_for(inner.state, now);
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Records the outcome of an admitted call exactly once.
///
/// A call dropped before finishing (cancelled or panicked) counts as a failure,
/// which also releases its half-open probe slot.
struct AdmittedCall<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl AdmittedCall<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.after_call(self.generation, success);
    }
}

impl Drop for AdmittedCall<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.after_call(self.generation, false);
        }
    }
}
