//! Application state wiring the engine, registries and background tasks.
//!
//! AppState is shared by the CLI commands and the REST handlers. Cloning is
//! cheap; every field is a handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conductor_core::event::{spawn_retention_sweeper, EventBus, RunEventStore};
use conductor_core::integration::IntegrationRegistry;
use conductor_core::llm::LlmRegistry;
use conductor_core::resilience::{CircuitBreakerConfig, CircuitBreakerManager};
use conductor_core::workflow::executors::builtin_registry;
use conductor_core::workflow::{EngineConfig, WorkflowEngine};
use conductor_infra::config::{load_config, resolve_data_dir};
use conductor_infra::http::HttpClient;
use conductor_infra::integration::build_integration_registry;
use conductor_infra::llm::build_llm_registry;
use conductor_types::config::ConductorConfig;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub engine: WorkflowEngine,
    pub events: Arc<RunEventStore>,
    pub breakers: Arc<CircuitBreakerManager>,
    pub config: Arc<ConductorConfig>,
    pub data_dir: PathBuf,
    pub started_at: Instant,
    background: CancellationToken,
}

impl AppState {
    /// Resolve the data directory, load `config.toml`, and build the LLM and
    /// integration registries from it.
    pub async fn init(data_dir_override: Option<&Path>) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir(data_dir_override)?;
        let config = load_config(&data_dir).await;

        let http = HttpClient::new(&config.http)?;
        let llms = build_llm_registry(&config.llm_providers, &http);
        let integrations = build_integration_registry(&config.integrations, &http);

        tracing::debug!(
            data_dir = %data_dir.display(),
            llm_providers = llms.len(),
            integrations = integrations.len(),
            "application state initialized"
        );

        Ok(Self::assemble(config, data_dir, llms, integrations))
    }

    /// Wire the engine around already-built registries and start the breaker
    /// monitor and the retention sweepers. Finished runs share the event
    /// retention window. Must run inside a Tokio runtime.
    pub fn assemble(
        config: ConductorConfig,
        data_dir: PathBuf,
        llms: LlmRegistry,
        integrations: IntegrationRegistry,
    ) -> Self {
        let breakers = Arc::new(CircuitBreakerManager::new(CircuitBreakerConfig::from(
            &config.circuit_breaker,
        )));
        let events = Arc::new(RunEventStore::with_bus(EventBus::new(
            config.events.bus_capacity,
        )));
        let executors = builtin_registry(Arc::new(llms), Arc::new(integrations), breakers.clone());
        let engine = WorkflowEngine::new(
            EngineConfig::from(&config.engine),
            Arc::new(executors),
            events.clone(),
        );

        let background = CancellationToken::new();
        breakers.clone().spawn_monitor(background.clone());
        let retention = Duration::from_secs(config.events.retention_hours.saturating_mul(3600));
        let sweep_interval = Duration::from_secs(config.events.sweep_interval_secs);
        spawn_retention_sweeper(events.clone(), retention, sweep_interval, background.clone());
        engine.spawn_run_retention_sweeper(retention, sweep_interval, background.clone());

        Self {
            engine,
            events,
            breakers,
            config: Arc::new(config),
            data_dir,
            started_at: Instant::now(),
            background,
        }
    }

    /// Stop background tasks and cancel every queued or active run.
    pub fn shutdown(&self) -> usize {
        self.background.cancel();
        let cancelled = self.engine.shutdown();
        tracing::info!(cancelled, "conductor shut down");
        cancelled
    }
}
