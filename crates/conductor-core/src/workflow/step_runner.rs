//! Step executor contract and the type-keyed executor registry.
//!
//! Executors receive the step definition, the step input (its parameters with
//! templates already resolved against the context) and a read-only view of
//! the run's context. They return the step output as JSON.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use conductor_types::context::ExecutionContext;
use conductor_types::error::{ErrorCode, OrchestratorError};
use conductor_types::workflow::{StepType, WorkflowStep};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Runtime behavior of one step type.
pub trait StepExecutor: Send + Sync {
    fn step_type(&self) -> StepType;

    fn execute(
        &self,
        step: &WorkflowStep,
        input: Value,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<Value, OrchestratorError>> + Send;
}

pub type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, OrchestratorError>> + Send + 'a>>;

/// Object-safe mirror of [`StepExecutor`].
pub trait StepExecutorDyn: Send + Sync {
    fn step_type(&self) -> StepType;

    fn execute_boxed<'a>(
        &'a self,
        step: &'a WorkflowStep,
        input: Value,
        ctx: &'a ExecutionContext,
    ) -> StepFuture<'a>;
}

impl<T: StepExecutor> StepExecutorDyn for T {
    fn step_type(&self) -> StepType {
        StepExecutor::step_type(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        step: &'a WorkflowStep,
        input: Value,
        ctx: &'a ExecutionContext,
    ) -> StepFuture<'a> {
        Box::pin(self.execute(step, input, ctx))
    }
}

/// Type-erased step executor.
pub struct BoxStepExecutor {
    inner: Box<dyn StepExecutorDyn>,
}

impl BoxStepExecutor {
    pub fn new<T: StepExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub fn step_type(&self) -> StepType {
        self.inner.step_type()
    }

    pub async fn execute(
        &self,
        step: &WorkflowStep,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, OrchestratorError> {
        self.inner.execute_boxed(step, input, ctx).await
    }
}

impl std::fmt::Debug for BoxStepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxStepExecutor")
            .field("step_type", &self.step_type())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<StepType, BoxStepExecutor>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor for its step type, replacing any previous one.
    pub fn register(&mut self, executor: BoxStepExecutor) {
        self.executors.insert(executor.step_type(), executor);
    }

    pub fn get(&self, step_type: StepType) -> Option<&BoxStepExecutor> {
        self.executors.get(&step_type)
    }

    pub fn resolve(&self, step_type: StepType) -> Result<&BoxStepExecutor, OrchestratorError> {
        self.executors.get(&step_type).ok_or_else(|| {
            OrchestratorError::new(
                ErrorCode::WorkflowExecutorNotFound,
                format!("no executor registered for step type '{step_type}'"),
            )
        })
    }

    pub fn contains(&self, step_type: StepType) -> bool {
        self.executors.contains_key(&step_type)
    }

    pub fn step_types(&self) -> Vec<StepType> {
        StepType::ALL
            .into_iter()
            .filter(|t| self.executors.contains_key(t))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Input helpers
// ---------------------------------------------------------------------------

/// String field of a resolved step input, falling back to `default`.
pub(crate) fn input_str(input: &Value, key: &str, default: &str) -> String {
    match input.get(key) {
        Some(Value::Null) | None => default.to_string(),
        Some(v) => super::context::value_to_string(v),
    }
}

pub(crate) fn input_opt_str(input: &Value, key: &str) -> Option<String> {
    match input.get(key) {
        Some(Value::Null) | None => None,
        Some(v) => Some(super::context::value_to_string(v)),
    }
}
