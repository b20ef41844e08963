//! Resilience primitives guarding calls to external dependencies.

pub mod circuit_breaker;
pub mod manager;
pub mod retry;

pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use manager::{CircuitBreakerManager, HealthSummary};
pub use retry::{retry_with_policy, RetryPolicy, Retryable};
