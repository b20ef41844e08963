//! `loop` steps: run a body step once per element of an array.
//!
//! The body runs with a per-iteration copy of the context that binds the
//! element and its index as variables. Iterations are sequential; the first
//! failure fails the whole step.

use std::collections::HashMap;
use std::sync::Arc;

use conductor_types::context::ExecutionContext;
use conductor_types::error::{ErrorCode, OrchestratorError};
use conductor_types::workflow::{StepKind, StepType, WorkflowStep};
use serde_json::{json, Value};

use crate::workflow::context::{prepare_step_input, resolve_path, single_token, update_variable};
use crate::workflow::step_runner::{ExecutorRegistry, StepExecutor};

pub struct LoopStepExecutor {
    /// Executors for body steps. Never contains a loop executor.
    body_executors: Arc<ExecutorRegistry>,
}

impl LoopStepExecutor {
    pub fn new(body_executors: Arc<ExecutorRegistry>) -> Self {
        Self { body_executors }
    }
}

impl StepExecutor for LoopStepExecutor {
    fn step_type(&self) -> StepType {
        StepType::Loop
    }

    async fn execute(
        &self,
        step: &WorkflowStep,
        _input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, OrchestratorError> {
        let StepKind::Loop {
            iterable,
            item_variable,
            index_variable,
            max_iterations,
            body,
        } = &step.kind
        else {
            return Err(OrchestratorError::new(
                ErrorCode::WorkflowInvalidDefinition,
                format!("step '{}' is not a loop step", step.id),
            ));
        };

        let path = single_token(iterable).unwrap_or(iterable.as_str());
        let items = match resolve_path(path, ctx) {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(OrchestratorError::new(
                    ErrorCode::ValidationInvalidInput,
                    format!(
                        "loop '{}' iterable '{iterable}' is not an array (got {})",
                        step.id,
                        json_kind(&other)
                    ),
                ));
            }
            None => {
                return Err(OrchestratorError::new(
                    ErrorCode::ValidationInvalidInput,
                    format!("loop '{}' iterable '{iterable}' did not resolve", step.id),
                ));
            }
        };

        if items.len() > *max_iterations as usize {
            return Err(OrchestratorError::new(
                ErrorCode::WorkflowLoopLimitExceeded,
                format!(
                    "loop '{}' has {} items, limit is {max_iterations}",
                    step.id,
                    items.len()
                ),
            ));
        }

        let executor = self.body_executors.resolve(body.step_type())?;
        let mut results = Vec::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            let iteration_ctx = update_variable(ctx.clone(), item_variable.clone(), item);
            let iteration_ctx = update_variable(iteration_ctx, index_variable.clone(), json!(index));

            let body_step = WorkflowStep {
                id: format!("{}[{index}]", step.id),
                name: format!("{} #{index}", step.name),
                position: step.position,
                next_step_id: None,
                on_error: None,
                timeout_secs: None,
                output_mapping: HashMap::new(),
                kind: (**body).clone(),
            };
            let body_input = prepare_step_input(&body.parameters(), &iteration_ctx);

            let output = executor
                .execute(&body_step, body_input, &iteration_ctx)
                .await
                .map_err(|e| e.with_step_id(body_step.id.clone()))?;
            results.push(output);
        }

        tracing::debug!(step_id = %step.id, iterations = results.len(), "loop finished");

        Ok(json!({
            "iterations": results.len(),
            "results": results,
        }))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
