//! Built-in step executors and the standard registry wiring.

mod conditional;
mod integration;
mod llm;
mod loop_step;
mod wait;

use std::sync::Arc;

pub use conditional::ConditionalStepExecutor;
pub use integration::IntegrationStepExecutor;
pub use llm::LlmStepExecutor;
pub use loop_step::LoopStepExecutor;
pub use wait::WaitStepExecutor;

use crate::integration::IntegrationRegistry;
use crate::llm::LlmRegistry;
use crate::resilience::CircuitBreakerManager;

use super::step_runner::{BoxStepExecutor, ExecutorRegistry};

/// A registry with every built-in executor. The loop executor dispatches its
/// body through a copy of the registry without itself.
pub fn builtin_registry(
    llms: Arc<LlmRegistry>,
    integrations: Arc<IntegrationRegistry>,
    breakers: Arc<CircuitBreakerManager>,
) -> ExecutorRegistry {
    let base = || {
        let mut registry = ExecutorRegistry::new();
        registry.register(BoxStepExecutor::new(LlmStepExecutor::new(
            llms.clone(),
            breakers.clone(),
        )));
        registry.register(BoxStepExecutor::new(IntegrationStepExecutor::new(
            integrations.clone(),
            breakers.clone(),
        )));
        registry.register(BoxStepExecutor::new(ConditionalStepExecutor));
        registry.register(BoxStepExecutor::new(WaitStepExecutor));
        registry
    };

    let mut registry = base();
    registry.register(BoxStepExecutor::new(LoopStepExecutor::new(Arc::new(base()))));
    registry
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use conductor_types::workflow::{StepKind, StepType, WorkflowStep};

    use super::*;

    pub(crate) fn step(id: &str, kind: StepKind) -> WorkflowStep {
        WorkflowStep {
            id: id.into(),
            name: id.into(),
            position: 0,
            next_step_id: None,
            on_error: None,
            timeout_secs: None,
            output_mapping: HashMap::new(),
            kind,
        }
    }

    #[test]
    fn test_builtin_registry_covers_every_step_type() {
        let registry = builtin_registry(
            Arc::new(LlmRegistry::new()),
            Arc::new(IntegrationRegistry::new()),
            Arc::new(CircuitBreakerManager::default()),
        );
        assert_eq!(registry.step_types(), StepType::ALL.to_vec());
    }
}
