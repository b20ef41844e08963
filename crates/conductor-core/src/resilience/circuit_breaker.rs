//! Per-resource circuit breaker.
//!
//! ```text
//! closed --(failures >= threshold)--> open
//! open --(recovery timeout elapsed, next call)--> half-open
//! half-open --(trial succeeds)--> closed
//! half-open --(trial fails)--> open
//! ```
//!
//! Half-open admits exactly one trial call; concurrent callers are rejected
//! as if the circuit were still open.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use conductor_types::config::CircuitBreakerSettings;
use conductor_types::error::{ErrorCode, OrchestratorError};
use serde::{Deserialize, Serialize};

/// Number of monitoring periods without failures after which a closed
/// breaker forgets its failure count.
pub const STALE_PERIODS: u32 = 6;

// ---------------------------------------------------------------------------
// Config and state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&CircuitBreakerSettings::default())
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            recovery_timeout: Duration::from_millis(settings.recovery_timeout_ms),
            monitoring_period: Duration::from_millis(settings.monitoring_period_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u64,
    pub total_requests: u64,
    pub total_failures: u64,
    pub rejected_requests: u64,
    pub failure_rate: f64,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub next_attempt: Option<DateTime<Utc>>,
}

/// Why a guarded call did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// Rejected without invoking the wrapped call.
    #[error("circuit '{name}' is open")]
    Open {
        name: String,
        retry_at: Option<DateTime<Utc>>,
    },
    /// The wrapped call ran and failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

impl From<BreakerError<OrchestratorError>> for OrchestratorError {
    fn from(err: BreakerError<OrchestratorError>) -> Self {
        match err {
            BreakerError::Open { name, retry_at } => {
                let mut e = OrchestratorError::new(
                    ErrorCode::ResilienceCircuitOpen,
                    format!("circuit '{name}' is open"),
                )
                .with_resource_id(name);
                if let Some(at) = retry_at {
                    e.context
                        .extra
                        .insert("retryAt".to_string(), serde_json::json!(at.to_rfc3339()));
                }
                e
            }
            BreakerError::Inner(inner) => inner,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    total_requests: u64,
    total_failures: u64,
    rejected_requests: u64,
    last_failure: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    next_attempt: Option<DateTime<Utc>>,
    last_failure_at: Option<Instant>,
    reopen_at: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_requests: 0,
            total_failures: 0,
            rejected_requests: 0,
            last_failure: None,
            last_success: None,
            next_attempt: None,
            last_failure_at: None,
            reopen_at: None,
            trial_in_flight: false,
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Run `call` through the breaker.
    ///
    /// Returns the call's value, or its error as [`BreakerError::Inner`] after
    /// counting it. While open, returns [`BreakerError::Open`] without
    /// invoking `call`. A call future dropped before completing counts as a
    /// failure.
    pub async fn execute<T, E, F, Fut>(&self, call: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut permit = self.admit()?;
        let outcome = call().await;
        permit.settle(outcome.is_ok());
        outcome.map_err(BreakerError::Inner)
    }

    fn admit<E>(&self) -> Result<Permit<'_>, BreakerError<E>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                let ready = inner.reopen_at.is_none_or(|at| Instant::now() >= at);
                if !ready {
                    inner.rejected_requests += 1;
                    return Err(BreakerError::Open {
                        name: self.name.clone(),
                        retry_at: inner.next_attempt,
                    });
                }
                tracing::info!(breaker = self.name.as_str(), "circuit half-open, admitting trial call");
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.rejected_requests += 1;
                    return Err(BreakerError::Open {
                        name: self.name.clone(),
                        retry_at: inner.next_attempt,
                    });
                }
                inner.trial_in_flight = true;
            }
        }
        inner.total_requests += 1;
        Ok(Permit {
            breaker: self,
            settled: false,
        })
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        inner.success_count += 1;
        inner.last_success = Some(Utc::now());
        if inner.state == CircuitState::HalfOpen {
            tracing::info!(breaker = self.name.as_str(), "trial call succeeded, circuit closed");
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.trial_in_flight = false;
            inner.next_attempt = None;
            inner.reopen_at = None;
        }
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        inner.total_failures += 1;
        inner.last_failure = Some(Utc::now());
        inner.last_failure_at = Some(Instant::now());

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if should_open {
            tracing::warn!(
                breaker = self.name.as_str(),
                failures = inner.failure_count,
                recovery_ms = self.config.recovery_timeout.as_millis() as u64,
                "circuit opened"
            );
            self.open(&mut inner);
        }
    }

    fn open(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.trial_in_flight = false;
        inner.reopen_at = Some(Instant::now() + self.config.recovery_timeout);
        inner.next_attempt = Some(
            Utc::now()
                + chrono::Duration::from_std(self.config.recovery_timeout)
                    .unwrap_or(chrono::Duration::zero()),
        );
    }

    /// Force the breaker open with a fresh recovery window.
    pub fn trip(&self) {
        let mut inner = self.lock();
        tracing::warn!(breaker = self.name.as_str(), "circuit tripped manually");
        self.open(&mut inner);
    }

    /// Return to closed with no recorded failures. Lifetime counters survive.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.trial_in_flight = false;
        inner.next_attempt = None;
        inner.reopen_at = None;
    }

    /// Forget failures in the closed state once nothing has failed for
    /// [`STALE_PERIODS`] monitoring periods. Returns whether anything decayed.
    pub fn decay_if_stale(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed || inner.failure_count == 0 {
            return false;
        }
        let stale_after = self.config.monitoring_period * STALE_PERIODS;
        let stale = inner
            .last_failure_at
            .is_none_or(|at| at.elapsed() >= stale_after);
        if stale {
            tracing::debug!(
                breaker = self.name.as_str(),
                failures = inner.failure_count,
                "decaying stale failure count"
            );
            inner.failure_count = 0;
        }
        stale
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        let failure_rate = if inner.total_requests == 0 {
            0.0
        } else {
            inner.total_failures as f64 / inner.total_requests as f64
        };
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_requests: inner.total_requests,
            total_failures: inner.total_failures,
            rejected_requests: inner.rejected_requests,
            failure_rate,
            last_failure: inner.last_failure,
            last_success: inner.last_success,
            next_attempt: inner.next_attempt,
        }
    }
}

/// Admission ticket for one call. Dropping it unsettled records a failure so
/// an abandoned half-open trial cannot wedge the breaker.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Permit<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        if success {
            self.breaker.record_success();
        } else {
            self.breaker.record_failure();
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record_failure();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
