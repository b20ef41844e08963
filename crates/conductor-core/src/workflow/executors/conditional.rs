//! `conditional` steps: evaluate the condition and report the chosen branch.

use conductor_types::context::ExecutionContext;
use conductor_types::error::{ErrorCode, OrchestratorError};
use conductor_types::workflow::{StepKind, StepType, WorkflowStep};
use serde_json::{json, Value};

use crate::workflow::expression::evaluate_condition;
use crate::workflow::step_runner::StepExecutor;

#[derive(Debug, Default)]
pub struct ConditionalStepExecutor;

impl StepExecutor for ConditionalStepExecutor {
    fn step_type(&self) -> StepType {
        StepType::Conditional
    }

    async fn execute(
        &self,
        step: &WorkflowStep,
        _input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, OrchestratorError> {
        let StepKind::Conditional {
            condition,
            true_step_id,
            false_step_id,
        } = &step.kind
        else {
            return Err(OrchestratorError::new(
                ErrorCode::WorkflowInvalidDefinition,
                format!("step '{}' is not a conditional step", step.id),
            ));
        };

        let result = evaluate_condition(condition, ctx);
        let selected = if result { true_step_id } else { false_step_id };
        tracing::debug!(
            step_id = %step.id,
            condition = %condition,
            result,
            selected = ?selected,
            "condition evaluated"
        );

        Ok(json!({
            "conditionResult": result,
            "selectedStepId": selected,
        }))
    }
}
