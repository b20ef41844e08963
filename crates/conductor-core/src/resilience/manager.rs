//! Registry of named circuit breakers plus operational tooling: stats,
//! health summary, manual reset/trip and the stale-failure monitor.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};

/// Aggregate view across all breakers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub total: usize,
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
    pub average_failure_rate: f64,
    pub open_breakers: Vec<String>,
}

impl HealthSummary {
    pub fn is_healthy(&self) -> bool {
        self.open == 0
    }
}

#[derive(Debug)]
pub struct CircuitBreakerManager {
    default_config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerManager {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: DashMap::new(),
        }
    }

    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }

    /// The breaker for `name`, created with the default config on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.default_config)
    }

    /// Like [`get_or_create`](Self::get_or_create) with an explicit config.
    /// An existing breaker keeps its original config.
    pub fn get_or_create_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    /// Run `call` through the breaker named `name`.
    pub async fn execute<T, E, F, Fut>(&self, name: &str, call: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let breaker = self.get_or_create(name);
        breaker.execute(call).await
    }

    pub fn stats(&self, name: &str) -> Option<CircuitBreakerStats> {
        self.breakers.get(name).map(|b| b.stats())
    }

    /// Stats for every breaker, sorted by name.
    pub fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self.breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn health_summary(&self) -> HealthSummary {
        let stats = self.all_stats();
        let mut summary = HealthSummary {
            total: stats.len(),
            closed: 0,
            open: 0,
            half_open: 0,
            average_failure_rate: 0.0,
            open_breakers: Vec::new(),
        };
        for s in &stats {
            match s.state {
                CircuitState::Closed => summary.closed += 1,
                CircuitState::Open => {
                    summary.open += 1;
                    summary.open_breakers.push(s.name.clone());
                }
                CircuitState::HalfOpen => summary.half_open += 1,
            }
        }
        if !stats.is_empty() {
            summary.average_failure_rate =
                stats.iter().map(|s| s.failure_rate).sum::<f64>() / stats.len() as f64;
        }
        summary
    }

    /// Returns false when no breaker has that name.
    pub fn reset(&self, name: &str) -> bool {
        match self.breakers.get(name) {
            Some(b) => {
                b.reset();
                tracing::info!(breaker = name, "circuit reset");
                true
            }
            None => false,
        }
    }

    /// Returns false when no breaker has that name.
    pub fn trip(&self, name: &str) -> bool {
        match self.breakers.get(name) {
            Some(b) => {
                b.trip();
                true
            }
            None => false,
        }
    }

    /// Reset every breaker; returns how many were reset.
    pub fn reset_all(&self) -> usize {
        let mut count = 0;
        for b in self.breakers.iter() {
            b.reset();
            count += 1;
        }
        tracing::info!(count, "all circuits reset");
        count
    }

    /// One monitor pass; returns how many breakers decayed.
    pub fn decay_stale(&self) -> usize {
        self.breakers
            .iter()
            .filter(|b| b.decay_if_stale())
            .count()
    }

    /// Run [`decay_stale`](Self::decay_stale) every monitoring period until
    /// `cancel` fires.
    pub fn spawn_monitor(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let period = self.default_config.monitoring_period.max(std::time::Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("circuit breaker monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let decayed = self.decay_stale();
                        if decayed > 0 {
                            tracing::debug!(decayed, "decayed stale breaker failure counts");
                        }
                    }
                }
            }
        })
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn manager() -> CircuitBreakerManager {
        CircuitBreakerManager::new(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_millis(5),
        })
    }

    async fn fail(m: &CircuitBreakerManager, name: &str) {
        let _ = m
            .execute(name, || async { Err::<(), _>("down".to_string()) })
            .await;
    }

    #[tokio::test]
    async fn test_breakers_are_isolated_per_name() {
        let m = manager();
        fail(&m, "integration.crm.get").await;
        fail(&m, "integration.crm.get").await;

        assert!(m.get("integration.crm.get").unwrap().is_open());
        let ok = m
            .execute("integration.crm.list", || async { Ok::<_, String>(1) })
            .await;
        assert_eq!(ok.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_health_summary_counts_states() {
        let m = manager();
        fail(&m, "a").await;
        fail(&m, "a").await;
        let _ = m.execute("b", || async { Ok::<_, String>(()) }).await;
        fail(&m, "c").await;

        let summary = m.health_summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.open, 1);
        assert_eq!(summary.closed, 2);
        assert_eq!(summary.open_breakers, vec!["a".to_string()]);
        assert!(!summary.is_healthy());
        // a: 2/2, b: 0/1, c: 1/1
        assert!((summary.average_failure_rate - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_manual_reset_and_trip() {
        let m = manager();
        assert!(!m.reset("missing"));
        assert!(!m.trip("missing"));

        m.get_or_create("svc");
        assert!(m.trip("svc"));
        assert_eq!(m.stats("svc").unwrap().state, CircuitState::Open);
        assert!(m.reset("svc"));
        assert_eq!(m.stats("svc").unwrap().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reset_all() {
        let m = manager();
        for name in ["a", "b"] {
            fail(&m, name).await;
            fail(&m, name).await;
        }
        assert_eq!(m.reset_all(), 2);
        assert!(m.health_summary().is_healthy());
    }

    #[tokio::test]
    async fn test_monitor_decays_stale_failures() {
        let m = Arc::new(manager());
        fail(&m, "svc").await;
        assert_eq!(m.get("svc").unwrap().failure_count(), 1);

        let cancel = CancellationToken::new();
        let handle = m.clone().spawn_monitor(cancel.clone());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(m.get("svc").unwrap().failure_count(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
