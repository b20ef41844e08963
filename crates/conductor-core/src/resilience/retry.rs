//! Bounded exponential-backoff retry.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use conductor_types::config::HttpSettings;
use conductor_types::error::OrchestratorError;
use rand::Rng;

/// Errors that know whether trying again could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for OrchestratorError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt).
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Full jitter: each delay is drawn uniformly from `[0, computed]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&HttpSettings::default())
    }
}

impl From<&HttpSettings> for RetryPolicy {
    fn from(settings: &HttpSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.initial_backoff_ms),
            max_delay: Duration::from_millis(settings.max_backoff_ms),
            multiplier: settings.backoff_multiplier.max(1.0),
            jitter: settings.jitter,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Exponential policy without jitter, for step-level retries.
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay: initial_delay.saturating_mul(32).max(initial_delay),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Delay before retry number `retry` (0-based): `initial * multiplier^retry`,
    /// capped at `max_delay`. With jitter the result is uniform in `[0, capped]`.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let base = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(retry as i32);
        let capped = base.min(self.max_delay.as_nanos() as f64).max(0.0);
        let nanos = if self.jitter && capped > 0.0 {
            rand::thread_rng().gen_range(0.0..=capped)
        } else {
            capped
        };
        Duration::from_nanos(nanos.round() as u64)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are exhausted. `op` receives the 0-based attempt number.
pub async fn retry_with_policy<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::error::ErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn test_full_jitter_spans_whole_range() {
        let policy = RetryPolicy {
            jitter: true,
            ..fast(3)
        };
        let delays: Vec<_> = (0..200).map(|_| policy.delay_for_attempt(2)).collect();
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(4)));
        assert!(delays.iter().any(|d| *d < Duration::from_millis(2)));
    }

    #[tokio::test]
    async fn test_retries_retryable_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_policy(&fast(3), |_| async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(OrchestratorError::new(ErrorCode::IntegrationTimeout, "slow"))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_on_non_retryable() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_policy(&fast(3), |_| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(OrchestratorError::new(ErrorCode::ValidationFailed, "bad"))
        })
        .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::ValidationFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_policy(&fast(2), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Err(OrchestratorError::new(
                    ErrorCode::LlmRateLimited,
                    format!("attempt {attempt}"),
                ))
            }
        })
        .await;
        assert_eq!(result.unwrap_err().message, "attempt 2");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
