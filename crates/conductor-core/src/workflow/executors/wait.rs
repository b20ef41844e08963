//! `wait` steps: suspend the run for a fixed duration.

use std::time::Duration;

use conductor_types::context::ExecutionContext;
use conductor_types::error::OrchestratorError;
use conductor_types::workflow::{StepKind, StepType, WorkflowStep};
use serde_json::{json, Value};

use crate::workflow::step_runner::StepExecutor;

#[derive(Debug, Default)]
pub struct WaitStepExecutor;

impl StepExecutor for WaitStepExecutor {
    fn step_type(&self) -> StepType {
        StepType::Wait
    }

    async fn execute(
        &self,
        step: &WorkflowStep,
        input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, OrchestratorError> {
        let configured = match &step.kind {
            StepKind::Wait { duration_ms } => *duration_ms,
            _ => 0,
        };
        let duration_ms = input
            .get("durationMs")
            .and_then(Value::as_u64)
            .unwrap_or(configured);

        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        Ok(json!({ "waitedMs": duration_ms }))
    }
}
