//! Circuit breaker for outbound calls.
//!
//! ```text
//! CLOSED ──(failure_threshold failures within monitoring_window)──► OPEN
//! OPEN ──(cooldown elapsed, next call)──► HALF_OPEN
//! HALF_OPEN ──(success_threshold consecutive successes)──► CLOSED
//! HALF_OPEN ──(any failure)──► OPEN
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Current position of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// Thresholds for one breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures within `monitoring_window` that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// Time the circuit stays open before a trial call is allowed.
    pub cooldown: Duration,
    /// Age after which a closed-state failure no longer counts.
    pub monitoring_window: Duration,
}

impl CircuitBreakerConfig {
    /// Preset for ordinary gateway calls.
    pub fn general() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            cooldown: Duration::from_secs(60),
            monitoring_window: Duration::from_secs(60),
        }
    }

    /// Tighter preset for setup-intent confirmation.
    pub fn payment_confirmation() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            cooldown: Duration::from_secs(30),
            monitoring_window: Duration::from_secs(60),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::general()
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The call was rejected without running.
    #[error("circuit breaker '{breaker}' is open; retry after {retry_after:?}")]
    Open {
        breaker: String,
        retry_after: Duration,
    },

    /// The call ran and failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }

    /// Returns the wrapped error if the call ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Inner(err) => Some(err),
            CircuitError::Open { .. } => None,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: VecDeque<Instant>,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// A named circuit breaker.
///
/// State lives behind a short synchronous lock that is never held across
/// an await, so the wrapped call itself runs unlocked.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                consecutive_successes: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the state as of the last call.
    ///
    /// An open breaker whose cooldown has elapsed still reports `Open`
    /// until the next call moves it to half-open.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Failures currently counted toward opening.
    pub fn failure_count(&self) -> usize {
        self.lock().failures.len()
    }

    /// Forces the breaker closed and clears its history.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.consecutive_successes = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    /// Runs `f` unless the circuit is open. Every error counts as a failure.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_filtered(f, |_| true).await
    }

    /// Runs `f` unless the circuit is open, counting only errors for which
    /// `trips` returns true. Other errors are returned and count as success.
    pub async fn execute_filtered<F, Fut, T, E, P>(
        &self,
        f: F,
        trips: P,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        let mut permit = self.admit()?;
        let result = f().await;
        let failed = match &result {
            Ok(_) => false,
            Err(err) => trips(err),
        };
        permit.settle(failed);
        result.map_err(CircuitError::Inner)
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit<E>(&self) -> Result<Permit<'_>, CircuitError<E>> {
        let mut inner = self.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => Ok(Permit::new(self, false)),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed < self.config.cooldown {
                    return Err(self.rejection(self.config.cooldown - elapsed));
                }
                inner.state = CircuitState::HalfOpen;
                inner.consecutive_successes = 0;
                inner.trial_in_flight = true;
                tracing::info!(breaker = %self.name, "circuit half-open, probing");
                Ok(Permit::new(self, true))
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(self.rejection(Duration::ZERO));
                }
                inner.trial_in_flight = true;
                Ok(Permit::new(self, true))
            }
        }
    }

    fn rejection<E>(&self, retry_after: Duration) -> CircuitError<E> {
        metrics::counter!("circuit_breaker_rejected_total", "breaker" => self.name.clone())
            .increment(1);
        CircuitError::Open {
            breaker: self.name.clone(),
            retry_after,
        }
    }

    fn record(&self, failed: bool) {
        let mut inner = self.lock();
        let now = Instant::now();
        let window = self.config.monitoring_window;
        inner
            .failures
            .retain(|at| now.saturating_duration_since(*at) < window);

        match (inner.state, failed) {
            (CircuitState::HalfOpen, false) => {
                inner.trial_in_flight = false;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures.clear();
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                    tracing::info!(breaker = %self.name, "circuit closed");
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.trial_in_flight = false;
                self.open(&mut inner, now);
            }
            (CircuitState::Closed, true) => {
                inner.failures.push_back(now);
                if inner.failures.len() >= self.config.failure_threshold as usize {
                    self.open(&mut inner, now);
                }
            }
            // Closed successes only prune; late results after opening are ignored.
            (CircuitState::Closed, false) | (CircuitState::Open, _) => {}
        }
    }

    fn open(&self, inner: &mut BreakerState, now: Instant) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.consecutive_successes = 0;
        inner.failures.clear();
        metrics::counter!("circuit_breaker_opened_total", "breaker" => self.name.clone())
            .increment(1);
        tracing::warn!(breaker = %self.name, cooldown = ?self.config.cooldown, "circuit opened");
    }
}

/// Admission ticket for one call.
///
/// A half-open trial call that is dropped before settling (the caller's future
/// was cancelled) frees the trial slot without counting either way.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    fn settle(&mut self, failed: bool) {
        self.settled = true;
        self.breaker.record(failed);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}
