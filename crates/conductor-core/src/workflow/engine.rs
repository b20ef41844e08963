//! Workflow engine: run queue, bounded concurrency and the per-run step loop.
//!
//! # Scheduling
//!
//! `start_workflow` records a `queued` run and drains the FIFO queue while
//! fewer than `max_concurrent_runs` runs are active. The drain pass holds the
//! scheduler mutex, so concurrent drains cannot overfill the active set. Each
//! dequeued run is driven by its own tokio task; when the task ends a slot
//! guard frees its slot and drains again.
//!
//! # Step loop
//!
//! A run starts at the step with the lowest `position` and follows
//! `nextStepId` (or the chosen branch of a conditional). Between steps the
//! loop checks for cancellation, pause and the run deadline. Step failures go
//! through the step's `onError` policy.
//!
//! # Events
//!
//! Every transition appends one `RunEvent`: `run.started` on submission,
//! `run.running` when dequeued, one `step.started` and one terminal step
//! event per step (plus `step.retrying` per re-attempt) and exactly one
//! terminal run event.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use conductor_types::config::EngineSettings;
use conductor_types::context::ExecutionContext;
use conductor_types::error::{ErrorCode, OrchestratorError};
use conductor_types::event::{RunEvent, RunEventType};
use conductor_types::workflow::{
    ErrorStrategy, RunStatus, StepKind, StepResult, StepStatus, Workflow, WorkflowRun,
    WorkflowStatus, WorkflowStep,
};
use dashmap::DashMap;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::RunEventStore;
use crate::resilience::RetryPolicy;

use super::context::{add_step_result, map_step_outputs, new_context, prepare_step_input};
use super::definition::validate_workflow;
use super::expression::evaluate_condition;
use super::step_runner::ExecutorRegistry;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Re-attempts for the `retry` strategy when `maxRetries` is not set.
pub const DEFAULT_STEP_MAX_RETRIES: u32 = 3;

/// Initial backoff for the `retry` strategy when `retryDelayMs` is not set.
pub const DEFAULT_STEP_RETRY_DELAY_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// Configuration and public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub max_concurrent_runs: usize,
    /// Applied to steps without their own `timeoutSecs`.
    pub default_step_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&EngineSettings::default())
    }
}

impl From<&EngineSettings> for EngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            max_concurrent_runs: settings.max_concurrent_runs.max(1),
            default_step_timeout: settings.default_step_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Caller-supplied run options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptions {
    /// Generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatistics {
    pub registered_workflows: usize,
    pub registered_executors: usize,
    pub queued_runs: usize,
    pub active_runs: usize,
    pub max_concurrent_runs: usize,
    pub total_runs: usize,
    pub runs_by_status: BTreeMap<RunStatus, usize>,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct RunControl {
    cancel: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
}

struct RunEntry {
    run: WorkflowRun,
    workflow: Arc<Workflow>,
    status_tx: watch::Sender<RunStatus>,
    control: RunControl,
}

#[derive(Default)]
struct Scheduler {
    queue: VecDeque<String>,
    active: HashSet<String>,
}

struct EngineInner {
    config: EngineConfig,
    workflows: DashMap<String, Arc<Workflow>>,
    runs: DashMap<String, RunEntry>,
    scheduler: Mutex<Scheduler>,
    executors: Arc<ExecutorRegistry>,
    events: Arc<RunEventStore>,
    accepting: AtomicBool,
}

/// How one step ended, as seen by the run loop.
enum StepOutcome {
    Completed {
        result: StepResult,
        output: Value,
    },
    Skipped {
        result: StepResult,
    },
    Fallback {
        result: StepResult,
        target: String,
    },
    Failed {
        result: StepResult,
        error: OrchestratorError,
    },
    DeadlineExceeded {
        result: StepResult,
    },
}

enum Attempt {
    Done(Result<Value, OrchestratorError>),
    Deadline,
}

/// Frees the run's concurrency slot when its task ends, including by panic
/// or abort.
struct SlotGuard {
    engine: WorkflowEngine,
    run_id: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.engine.release_slot(&self.run_id);
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Cheap to clone; clones share the same queue, runs and registries.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl WorkflowEngine {
    pub fn new(
        config: EngineConfig,
        executors: Arc<ExecutorRegistry>,
        events: Arc<RunEventStore>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                workflows: DashMap::new(),
                runs: DashMap::new(),
                scheduler: Mutex::new(Scheduler::default()),
                executors,
                events,
                accepting: AtomicBool::new(true),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &Arc<RunEventStore> {
        &self.inner.events
    }

    pub fn executors(&self) -> &Arc<ExecutorRegistry> {
        &self.inner.executors
    }

    // -----------------------------------------------------------------------
    // Workflow definitions
    // -----------------------------------------------------------------------

    /// Validate and store a definition. A lower version than the registered
    /// one is rejected; an equal or higher version replaces it. Runs already
    /// started keep the copy they pinned.
    pub fn register_workflow(&self, workflow: Workflow) -> Result<(), OrchestratorError> {
        validate_workflow(&workflow)
            .map_err(|e| OrchestratorError::from(e).with_resource_id(workflow.id.clone()))?;

        if let Some(existing) = self.inner.workflows.get(&workflow.id) {
            if workflow.version < existing.version {
                return Err(OrchestratorError::new(
                    ErrorCode::WorkflowInvalidDefinition,
                    format!(
                        "workflow '{}' version {} is older than registered version {}",
                        workflow.id, workflow.version, existing.version
                    ),
                )
                .with_resource_id(workflow.id.clone()));
            }
        }

        tracing::info!(
            workflow_id = %workflow.id,
            version = workflow.version,
            steps = workflow.steps.len(),
            status = %workflow.status,
            "workflow registered"
        );
        self.inner
            .workflows
            .insert(workflow.id.clone(), Arc::new(workflow));
        Ok(())
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.inner
            .workflows
            .get(workflow_id)
            .map(|w| w.value().as_ref().clone())
    }

    /// All definitions, sorted by id.
    pub fn list_workflows(&self) -> Vec<Workflow> {
        let mut workflows: Vec<Workflow> = self
            .inner
            .workflows
            .iter()
            .map(|w| w.value().as_ref().clone())
            .collect();
        workflows.sort_by(|a, b| a.id.cmp(&b.id));
        workflows
    }

    pub fn set_workflow_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
    ) -> Result<Workflow, OrchestratorError> {
        let mut entry = self
            .inner
            .workflows
            .get_mut(workflow_id)
            .ok_or_else(|| workflow_not_found(workflow_id))?;
        Arc::make_mut(entry.value_mut()).status = status;
        tracing::info!(workflow_id, status = %status, "workflow status changed");
        Ok(entry.value().as_ref().clone())
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Create a queued run and trigger the queue drain. Never waits for the
    /// run itself.
    pub fn start_workflow(
        &self,
        workflow_id: &str,
        input: Value,
        options: StartOptions,
    ) -> Result<WorkflowRun, OrchestratorError> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(OrchestratorError::new(
                ErrorCode::WorkflowInvalidState,
                "engine is shutting down",
            ));
        }

        let workflow = self
            .inner
            .workflows
            .get(workflow_id)
            .map(|w| w.value().clone())
            .ok_or_else(|| workflow_not_found(workflow_id))?;
        if workflow.status != WorkflowStatus::Active {
            return Err(OrchestratorError::new(
                ErrorCode::WorkflowInvalidState,
                format!(
                    "workflow '{workflow_id}' is {} and cannot be started",
                    workflow.status
                ),
            )
            .with_resource_id(workflow_id));
        }

        let run_id = Uuid::now_v7().to_string();
        let correlation_id = options
            .correlation_id
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let context = new_context(
            run_id.clone(),
            workflow_id,
            correlation_id.clone(),
            options.user_id,
            &input,
        );

        let run = WorkflowRun {
            id: run_id.clone(),
            workflow_id: workflow_id.to_string(),
            workflow_version: workflow.version,
            status: RunStatus::Queued,
            input: input.clone(),
            output: None,
            context,
            current_step_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        };

        let (status_tx, _) = watch::channel(RunStatus::Queued);
        let (paused_tx, _) = watch::channel(false);
        self.inner.runs.insert(
            run_id.clone(),
            RunEntry {
                run: run.clone(),
                workflow: workflow.clone(),
                status_tx,
                control: RunControl {
                    cancel: CancellationToken::new(),
                    paused: Arc::new(paused_tx),
                },
            },
        );

        self.emit(RunEvent::new(
            &run_id,
            RunEventType::RunStarted,
            &correlation_id,
            json!({
                "workflowId": workflow_id,
                "workflowVersion": workflow.version,
                "input": input,
            }),
        ));

        tracing::info!(
            run_id = %run_id,
            workflow_id,
            correlation_id = %correlation_id,
            "run queued"
        );

        self.scheduler().queue.push_back(run_id);
        self.process_queue();
        Ok(run)
    }

    /// Move queued runs into the active set while slots are free and spawn a
    /// task for each.
    pub fn process_queue(&self) {
        let mut dequeued = Vec::new();
        {
            let mut scheduler = self.scheduler();
            while scheduler.active.len() < self.inner.config.max_concurrent_runs {
                let Some(run_id) = scheduler.queue.pop_front() else {
                    break;
                };
                scheduler.active.insert(run_id.clone());
                dequeued.push(run_id);
            }
        }

        for run_id in dequeued {
            self.spawn_run(run_id);
        }
    }

    fn spawn_run(&self, run_id: String) {
        let engine = self.clone();
        tokio::spawn(async move {
            let _slot = SlotGuard {
                engine: engine.clone(),
                run_id: run_id.clone(),
            };
            let outcome = AssertUnwindSafe(engine.execute_workflow_run(&run_id))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                tracing::error!(run_id = %run_id, "run task panicked");
                engine.finish_run(
                    &run_id,
                    RunStatus::Failed,
                    None,
                    Some(
                        OrchestratorError::new(ErrorCode::SystemInternal, "run task panicked")
                            .with_run_id(run_id.clone()),
                    ),
                    None,
                );
            }
        });
    }

    fn release_slot(&self, run_id: &str) {
        let released = self.scheduler().active.remove(run_id);
        if released {
            tracing::debug!(run_id, "run slot released");
        }
        self.process_queue();
    }

    /// Drive one run to a terminal state.
    async fn execute_workflow_run(&self, run_id: &str) {
        let Some((workflow, mut ctx, control)) = self.begin_run(run_id) else {
            return;
        };
        let deadline = workflow
            .timeout_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        let mut current = workflow.entry_step().map(|s| s.id.clone());
        let mut visited: HashSet<String> = HashSet::new();
        let mut output = Map::new();

        loop {
            if control.cancel.is_cancelled() || self.is_finished(run_id) {
                return;
            }
            let paused = *control.paused.borrow();
            if paused {
                wait_while_paused(&control).await;
                if control.cancel.is_cancelled() || self.is_finished(run_id) {
                    return;
                }
            }

            let Some(step_id) = current.take() else {
                self.finish_run(
                    run_id,
                    RunStatus::Completed,
                    Some(Value::Object(output)),
                    None,
                    Some(ctx),
                );
                return;
            };

            if deadline.is_some_and(|d| Instant::now() >= d) {
                let error = workflow_timeout(&workflow, run_id);
                self.finish_run(run_id, RunStatus::Failed, None, Some(error), Some(ctx));
                return;
            }

            if !visited.insert(step_id.clone()) {
                let error = OrchestratorError::new(
                    ErrorCode::WorkflowInvalidState,
                    format!("step '{step_id}' was reached twice in one run"),
                )
                .with_run_id(run_id)
                .with_step_id(step_id.as_str());
                self.finish_run(run_id, RunStatus::Failed, None, Some(error), Some(ctx));
                return;
            }

            let Some(step) = workflow.step(&step_id) else {
                let error = OrchestratorError::new(
                    ErrorCode::WorkflowInvalidDefinition,
                    format!("step '{step_id}' does not exist"),
                )
                .with_run_id(run_id);
                self.finish_run(run_id, RunStatus::Failed, None, Some(error), Some(ctx));
                return;
            };

            self.set_current_step(run_id, &step_id);
            let outcome = self.run_step(step, &ctx, &control, deadline).await;

            let next = match outcome {
                StepOutcome::Completed { result, output: step_output } => {
                    ctx = add_step_result(ctx, result);
                    ctx = map_step_outputs(ctx, &step.output_mapping, &step_output);
                    if let Value::Object(fields) = &step_output {
                        for (k, v) in fields {
                            output.insert(k.clone(), v.clone());
                        }
                    }
                    next_step(step, &step_output, &ctx)
                }
                StepOutcome::Skipped { result } => {
                    ctx = add_step_result(ctx, result);
                    step.next_step_id.clone()
                }
                StepOutcome::Fallback { result, target } => {
                    ctx = add_step_result(ctx, result);
                    Some(target)
                }
                StepOutcome::Failed { result, error } => {
                    ctx = add_step_result(ctx, result);
                    let run_error = OrchestratorError::new(
                        ErrorCode::WorkflowStepFailed,
                        format!("step '{}' failed: {}", step.id, error),
                    )
                    .with_run_id(run_id)
                    .with_step_id(step.id.as_str())
                    .with_correlation_id(ctx.correlation_id.as_str())
                    .with_cause(error);
                    self.finish_run(run_id, RunStatus::Failed, None, Some(run_error), Some(ctx));
                    return;
                }
                StepOutcome::DeadlineExceeded { result } => {
                    ctx = add_step_result(ctx, result);
                    let error = workflow_timeout(&workflow, run_id);
                    self.finish_run(run_id, RunStatus::Failed, None, Some(error), Some(ctx));
                    return;
                }
            };

            self.sync_context(run_id, &ctx);
            current = next;
        }
    }

    /// Execute one step with its timeout and `onError` policy, emitting the
    /// step's events.
    async fn run_step(
        &self,
        step: &WorkflowStep,
        ctx: &ExecutionContext,
        control: &RunControl,
        deadline: Option<Instant>,
    ) -> StepOutcome {
        let run_id = ctx.run_id.as_str();
        let correlation_id = ctx.correlation_id.as_str();
        let started_at = Utc::now();
        let input = prepare_step_input(&step.kind.parameters(), ctx);

        self.emit(
            RunEvent::new(
                run_id,
                RunEventType::StepStarted,
                correlation_id,
                json!({
                    "stepType": step.step_type(),
                    "stepName": step.name,
                    "input": input,
                }),
            )
            .with_step(&step.id),
        );
        tracing::debug!(run_id, step_id = %step.id, step_type = %step.step_type(), "step started");

        let strategy = step
            .on_error
            .as_ref()
            .map(|h| h.strategy)
            .unwrap_or_default();
        let policy = match (&step.on_error, strategy) {
            (Some(handler), ErrorStrategy::Retry) => RetryPolicy::exponential(
                handler.max_retries.unwrap_or(DEFAULT_STEP_MAX_RETRIES),
                Duration::from_millis(handler.retry_delay_ms.unwrap_or(DEFAULT_STEP_RETRY_DELAY_MS)),
            ),
            _ => RetryPolicy::exponential(0, Duration::ZERO),
        };
        let step_timeout = step
            .timeout_secs
            .map(Duration::from_secs)
            .or(self.inner.config.default_step_timeout);

        let mut attempts = 0u32;
        let attempt = loop {
            attempts += 1;
            let attempt = self
                .attempt_step(step, input.clone(), ctx, step_timeout, deadline)
                .await;

            let error = match attempt {
                Attempt::Done(Err(error)) => error,
                other => break other,
            };
            if !error.is_retryable()
                || attempts > policy.max_retries
                || control.cancel.is_cancelled()
            {
                break Attempt::Done(Err(error));
            }

            let delay = policy.delay_for_attempt(attempts - 1);
            if deadline.is_some_and(|d| Instant::now() + delay >= d) {
                break Attempt::Deadline;
            }
            self.emit(
                RunEvent::new(
                    run_id,
                    RunEventType::StepRetrying,
                    correlation_id,
                    json!({
                        "attempt": attempts + 1,
                        "maxRetries": policy.max_retries,
                        "delayMs": delay.as_millis() as u64,
                        "error": error.to_record(),
                    }),
                )
                .with_step(&step.id),
            );
            tracing::info!(
                run_id,
                step_id = %step.id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "step failed, retrying"
            );
            tokio::time::sleep(delay).await;
        };

        let mut result = StepResult {
            step_id: step.id.clone(),
            status: StepStatus::Completed,
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
            input: Some(input),
            output: None,
            error: None,
            attempts,
        };

        match attempt {
            Attempt::Done(Ok(output)) => {
                result.output = Some(output.clone());
                self.emit_step_end(
                    &result,
                    ctx,
                    RunEventType::StepCompleted,
                    json!({
                        "output": output,
                        "attempts": attempts,
                        "durationMs": result.duration_ms(),
                    }),
                );
                tracing::debug!(run_id, step_id = %step.id, attempts, "step completed");
                StepOutcome::Completed { result, output }
            }
            Attempt::Deadline => {
                let error = OrchestratorError::new(
                    ErrorCode::WorkflowTimeout,
                    format!("run deadline expired during step '{}'", step.id),
                )
                .with_run_id(run_id)
                .with_step_id(step.id.as_str());
                result.status = StepStatus::Failed;
                result.error = Some(error.to_record());
                self.emit_step_end(
                    &result,
                    ctx,
                    RunEventType::StepFailed,
                    json!({ "error": error.to_record(), "attempts": attempts }),
                );
                StepOutcome::DeadlineExceeded { result }
            }
            Attempt::Done(Err(error)) => {
                let error = error
                    .with_run_id(run_id)
                    .with_step_id(step.id.as_str())
                    .with_correlation_id(correlation_id);
                let record = error.to_record();
                result.error = Some(record.clone());
                tracing::warn!(
                    run_id,
                    step_id = %step.id,
                    attempts,
                    strategy = ?strategy,
                    error = %error,
                    "step failed"
                );

                match strategy {
                    ErrorStrategy::Skip => {
                        result.status = StepStatus::Skipped;
                        self.emit_step_end(
                            &result,
                            ctx,
                            RunEventType::StepSkipped,
                            json!({ "error": record, "attempts": attempts }),
                        );
                        StepOutcome::Skipped { result }
                    }
                    ErrorStrategy::Fallback => {
                        result.status = StepStatus::Failed;
                        let target = step
                            .on_error
                            .as_ref()
                            .and_then(|h| h.fallback_step_id.clone());
                        self.emit_step_end(
                            &result,
                            ctx,
                            RunEventType::StepFailed,
                            json!({
                                "error": record,
                                "attempts": attempts,
                                "fallbackStepId": target,
                            }),
                        );
                        match target {
                            Some(target) => StepOutcome::Fallback { result, target },
                            None => StepOutcome::Failed { result, error },
                        }
                    }
                    ErrorStrategy::Retry | ErrorStrategy::Fail => {
                        result.status = StepStatus::Failed;
                        self.emit_step_end(
                            &result,
                            ctx,
                            RunEventType::StepFailed,
                            json!({ "error": record, "attempts": attempts }),
                        );
                        StepOutcome::Failed { result, error }
                    }
                }
            }
        }
    }

    /// One attempt, bounded by the step timeout and the run deadline.
    async fn attempt_step(
        &self,
        step: &WorkflowStep,
        input: Value,
        ctx: &ExecutionContext,
        step_timeout: Option<Duration>,
        deadline: Option<Instant>,
    ) -> Attempt {
        let executors = &self.inner.executors;
        let call = async {
            let executor = executors.resolve(step.step_type())?;
            executor.execute(step, input, ctx).await
        };
        let bounded = async {
            match step_timeout {
                Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                    Err(OrchestratorError::new(
                        ErrorCode::WorkflowStepTimeout,
                        format!("step '{}' exceeded {}s", step.id, limit.as_secs_f64()),
                    ))
                }),
                None => call.await,
            }
        };
        match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, bounded).await {
                Ok(result) => Attempt::Done(result),
                Err(_) => Attempt::Deadline,
            },
            None => Attempt::Done(bounded.await),
        }
    }

    /// Cooperative cancellation. Queued runs leave the queue; active runs
    /// give up their slot and stop before their next step. Returns false when
    /// the run is already terminal.
    pub fn cancel_run(&self, run_id: &str) -> Result<bool, OrchestratorError> {
        let control = self
            .inner
            .runs
            .get(run_id)
            .map(|e| e.control.clone())
            .ok_or_else(|| run_not_found(run_id))?;

        let cancelled = self.finish_run(
            run_id,
            RunStatus::Cancelled,
            None,
            Some(OrchestratorError::new(ErrorCode::WorkflowCancelled, "run cancelled").with_run_id(run_id)),
            None,
        );
        if !cancelled {
            return Ok(false);
        }

        control.cancel.cancel();
        {
            let mut scheduler = self.scheduler();
            scheduler.queue.retain(|id| id != run_id);
            scheduler.active.remove(run_id);
        }
        tracing::info!(run_id, "run cancelled");
        self.process_queue();
        Ok(true)
    }

    /// Pause a running run before its next step. Returns false unless the
    /// run was `running`.
    pub fn pause_run(&self, run_id: &str) -> Result<bool, OrchestratorError> {
        let mut entry = self
            .inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| run_not_found(run_id))?;
        if entry.run.status != RunStatus::Running {
            return Ok(false);
        }
        entry.run.status = RunStatus::Paused;
        let event = RunEvent::new(
            run_id,
            RunEventType::RunPaused,
            &entry.run.context.correlation_id,
            json!({ "currentStepId": entry.run.current_step_id }),
        );
        self.emit(event);
        entry.control.paused.send_replace(true);
        entry.status_tx.send_replace(RunStatus::Paused);
        tracing::info!(run_id, "run paused");
        Ok(true)
    }

    /// Resume a paused run. Returns false unless the run was `paused`.
    pub fn resume_run(&self, run_id: &str) -> Result<bool, OrchestratorError> {
        let mut entry = self
            .inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| run_not_found(run_id))?;
        if entry.run.status != RunStatus::Paused {
            return Ok(false);
        }
        entry.run.status = RunStatus::Running;
        let event = RunEvent::new(
            run_id,
            RunEventType::RunResumed,
            &entry.run.context.correlation_id,
            json!({ "currentStepId": entry.run.current_step_id }),
        );
        self.emit(event);
        entry.control.paused.send_replace(false);
        entry.status_tx.send_replace(RunStatus::Running);
        tracing::info!(run_id, "run resumed");
        Ok(true)
    }

    /// Resolve once the run is terminal and return its final snapshot.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<WorkflowRun, OrchestratorError> {
        let mut rx = self
            .inner
            .runs
            .get(run_id)
            .map(|e| e.status_tx.subscribe())
            .ok_or_else(|| run_not_found(run_id))?;
        // The sender lives as long as the entry, so this only errors if the
        // run was removed.
        let _ = rx.wait_for(|status| status.is_terminal()).await;
        self.get_run(run_id).ok_or_else(|| run_not_found(run_id))
    }

    pub fn get_run(&self, run_id: &str) -> Option<WorkflowRun> {
        self.inner.runs.get(run_id).map(|e| e.run.clone())
    }

    pub fn get_run_status(&self, run_id: &str) -> Option<RunStatus> {
        self.inner.runs.get(run_id).map(|e| e.run.status)
    }

    /// Runs, oldest first, optionally for one workflow.
    pub fn list_runs(&self, workflow_id: Option<&str>) -> Vec<WorkflowRun> {
        let mut runs: Vec<WorkflowRun> = self
            .inner
            .runs
            .iter()
            .filter(|e| workflow_id.is_none_or(|id| e.run.workflow_id == id))
            .map(|e| e.run.clone())
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        runs
    }

    pub fn get_statistics(&self) -> EngineStatistics {
        let (queued_runs, active_runs) = {
            let scheduler = self.scheduler();
            (scheduler.queue.len(), scheduler.active.len())
        };
        let mut runs_by_status = BTreeMap::new();
        for entry in self.inner.runs.iter() {
            *runs_by_status.entry(entry.run.status).or_insert(0) += 1;
        }
        EngineStatistics {
            registered_workflows: self.inner.workflows.len(),
            registered_executors: self.inner.executors.len(),
            queued_runs,
            active_runs,
            max_concurrent_runs: self.inner.config.max_concurrent_runs,
            total_runs: self.inner.runs.len(),
            runs_by_status,
        }
    }

    /// Stop accepting runs and cancel every queued or active run.
    pub fn shutdown(&self) -> usize {
        self.inner.accepting.store(false, Ordering::SeqCst);
        let pending: Vec<String> = self
            .inner
            .runs
            .iter()
            .filter(|e| !e.run.status.is_terminal())
            .map(|e| e.key().clone())
            .collect();
        let cancelled = pending
            .iter()
            .filter(|id| matches!(self.cancel_run(id), Ok(true)))
            .count();
        tracing::info!(cancelled, "workflow engine shut down");
        cancelled
    }

    /// Drop terminal runs that finished before `cutoff`. Queued, running and
    /// paused runs are never touched.
    pub fn purge_finished_runs(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.inner.runs.len();
        self.inner.runs.retain(|_, entry| {
            !entry.run.status.is_terminal()
                || entry.run.completed_at.is_none_or(|done| done >= cutoff)
        });
        let removed = before.saturating_sub(self.inner.runs.len());
        if removed > 0 {
            tracing::debug!(removed, %cutoff, "purged finished runs");
        }
        removed
    }

    /// Purge runs that finished more than `max_age` ago every `interval`
    /// until `cancel` fires.
    pub fn spawn_run_retention_sweeper(
        &self,
        max_age: Duration,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let engine = self.clone();
        let period = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("run retention sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Ok(age) = chrono::Duration::from_std(max_age) else {
                            tracing::warn!("run retention age out of range, sweeper disabled");
                            break;
                        };
                        if let Some(cutoff) = Utc::now().checked_sub_signed(age) {
                            engine.purge_finished_runs(cutoff);
                        }
                    }
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // Internal transitions
    // -----------------------------------------------------------------------

    /// `queued -> running`. Returns `None` when the run left the queue some
    /// other way (cancelled).
    fn begin_run(&self, run_id: &str) -> Option<(Arc<Workflow>, ExecutionContext, RunControl)> {
        let mut entry = self.inner.runs.get_mut(run_id)?;
        if entry.run.status != RunStatus::Queued {
            return None;
        }
        entry.run.status = RunStatus::Running;
        entry.run.started_at = Some(Utc::now());
        let event = RunEvent::new(
            run_id,
            RunEventType::RunRunning,
            &entry.run.context.correlation_id,
            json!({ "workflowVersion": entry.run.workflow_version }),
        );
        self.emit(event);
        entry.status_tx.send_replace(RunStatus::Running);
        tracing::info!(run_id, workflow_id = %entry.run.workflow_id, "run started");

        Some((
            entry.workflow.clone(),
            entry.run.context.clone(),
            entry.control.clone(),
        ))
    }

    /// The single terminal transition. The status check, the update and the
    /// terminal event happen under the run's entry lock, so only the first
    /// caller wins.
    fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        output: Option<Value>,
        error: Option<OrchestratorError>,
        ctx: Option<ExecutionContext>,
    ) -> bool {
        let Some(mut entry) = self.inner.runs.get_mut(run_id) else {
            return false;
        };
        if entry.run.status.is_terminal() {
            return false;
        }

        let run = &mut entry.run;
        run.status = status;
        run.completed_at = Some(Utc::now());
        if let Some(ctx) = ctx {
            run.context = ctx;
        }
        run.output = output;
        run.error = error.as_ref().map(OrchestratorError::to_record);

        let (event_type, payload) = match status {
            RunStatus::Completed => (
                RunEventType::RunCompleted,
                json!({ "output": run.output, "metrics": run.context.metrics }),
            ),
            RunStatus::Cancelled => (
                RunEventType::RunCancelled,
                json!({ "currentStepId": run.current_step_id }),
            ),
            _ => (RunEventType::RunFailed, json!({ "error": run.error })),
        };
        let event = RunEvent::new(run_id, event_type, &run.context.correlation_id, payload);
        match &error {
            Some(e) if status == RunStatus::Failed => {
                tracing::warn!(run_id, workflow_id = %run.workflow_id, error = %e, "run failed")
            }
            _ => tracing::info!(run_id, workflow_id = %run.workflow_id, status = %status, "run finished"),
        }

        self.emit(event);
        entry.status_tx.send_replace(status);
        true
    }

    fn is_finished(&self, run_id: &str) -> bool {
        self.inner
            .runs
            .get(run_id)
            .is_none_or(|e| e.run.status.is_terminal())
    }

    fn set_current_step(&self, run_id: &str, step_id: &str) {
        if let Some(mut entry) = self.inner.runs.get_mut(run_id) {
            entry.run.current_step_id = Some(step_id.to_string());
        }
    }

    fn sync_context(&self, run_id: &str, ctx: &ExecutionContext) {
        if let Some(mut entry) = self.inner.runs.get_mut(run_id) {
            entry.run.context = ctx.clone();
        }
    }

    fn emit_step_end(
        &self,
        result: &StepResult,
        ctx: &ExecutionContext,
        event_type: RunEventType,
        payload: Value,
    ) {
        self.emit(
            RunEvent::new(&ctx.run_id, event_type, &ctx.correlation_id, payload)
                .with_step(&result.step_id),
        );
    }

    fn emit(&self, event: RunEvent) {
        if let Err(e) = self.inner.events.append_event(event) {
            tracing::warn!(error = %e, "failed to record run event");
        }
    }

    fn scheduler(&self) -> std::sync::MutexGuard<'_, Scheduler> {
        self.inner
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn wait_while_paused(control: &RunControl) {
    let mut rx = control.paused.subscribe();
    tokio::select! {
        _ = rx.wait_for(|paused| !*paused) => {}
        _ = control.cancel.cancelled() => {}
    }
}

/// Next step after a completed step: the chosen branch for conditionals
/// (falling back to `nextStepId` when that branch is unset), otherwise
/// `nextStepId`.
fn next_step(step: &WorkflowStep, output: &Value, ctx: &ExecutionContext) -> Option<String> {
    match &step.kind {
        StepKind::Conditional {
            condition,
            true_step_id,
            false_step_id,
        } => {
            let taken = output
                .get("conditionResult")
                .and_then(Value::as_bool)
                .unwrap_or_else(|| evaluate_condition(condition, ctx));
            let branch = if taken { true_step_id } else { false_step_id };
            branch.clone().or_else(|| step.next_step_id.clone())
        }
        _ => step.next_step_id.clone(),
    }
}

fn workflow_timeout(workflow: &Workflow, run_id: &str) -> OrchestratorError {
    OrchestratorError::new(
        ErrorCode::WorkflowTimeout,
        format!(
            "workflow '{}' exceeded its {}s deadline",
            workflow.id,
            workflow.timeout_secs.unwrap_or_default()
        ),
    )
    .with_run_id(run_id)
}

fn workflow_not_found(workflow_id: &str) -> OrchestratorError {
    OrchestratorError::new(
        ErrorCode::WorkflowNotFound,
        format!("workflow '{workflow_id}' is not registered"),
    )
    .with_resource_id(workflow_id)
}

fn run_not_found(run_id: &str) -> OrchestratorError {
    OrchestratorError::new(ErrorCode::WorkflowRunNotFound, format!("run '{run_id}' not found"))
        .with_run_id(run_id)
}
