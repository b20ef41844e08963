//! `integration` steps: call an adapter operation through its circuit breaker.
//!
//! A failed envelope becomes an `Err` inside the breaker so the breaker counts
//! it, keeping the adapter's code and retryable flag.

use std::sync::Arc;

use conductor_types::context::ExecutionContext;
use conductor_types::error::{ErrorCode, OrchestratorError};
use conductor_types::workflow::{StepKind, StepType, WorkflowStep};
use serde_json::Value;

use crate::integration::IntegrationRegistry;
use crate::resilience::CircuitBreakerManager;
use crate::workflow::step_runner::{input_str, StepExecutor};

pub struct IntegrationStepExecutor {
    integrations: Arc<IntegrationRegistry>,
    breakers: Arc<CircuitBreakerManager>,
}

impl IntegrationStepExecutor {
    pub fn new(integrations: Arc<IntegrationRegistry>, breakers: Arc<CircuitBreakerManager>) -> Self {
        Self {
            integrations,
            breakers,
        }
    }
}

impl StepExecutor for IntegrationStepExecutor {
    fn step_type(&self) -> StepType {
        StepType::Integration
    }

    async fn execute(
        &self,
        step: &WorkflowStep,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, OrchestratorError> {
        let (default_id, default_op) = match &step.kind {
            StepKind::Integration {
                integration_id,
                operation,
                ..
            } => (integration_id.as_str(), operation.as_str()),
            _ => ("", ""),
        };
        let integration_id = input_str(&input, "integrationId", default_id);
        let operation = input_str(&input, "operation", default_op);
        let parameters = input.get("parameters").cloned().unwrap_or(Value::Null);

        let adapter = self.integrations.resolve(&integration_id)?;
        let breaker = format!("integration.{integration_id}.{operation}");

        tracing::debug!(
            step_id = %step.id,
            integration_id = %integration_id,
            operation = %operation,
            correlation_id = %ctx.correlation_id,
            "invoking integration"
        );

        let data = self
            .breakers
            .execute(&breaker, move || async move {
                let result = adapter.execute_operation(&operation, &parameters, ctx).await;
                match (result.success, result.error) {
                    (true, _) => Ok(result.data.unwrap_or(Value::Null)),
                    (false, Some(error)) => Err(OrchestratorError::new(error.code, error.message)
                        .with_retryable(error.retryable)
                        .with_resource_id(integration_id)
                        .with_operation_id(operation)),
                    (false, None) => Err(OrchestratorError::new(
                        ErrorCode::IntegrationInvalidResponse,
                        "integration reported failure without an error",
                    )
                    .with_resource_id(integration_id)),
                }
            })
            .await?;

        Ok(data)
    }
}
