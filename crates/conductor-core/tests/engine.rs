//! End-to-end engine scenarios: traversal, failure policies, timeouts, run
//! control and the event log as the record of every transition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conductor_core::event::RunEventStore;
use conductor_core::integration::{BoxIntegrationAdapter, IntegrationAdapter, IntegrationRegistry};
use conductor_core::llm::{BoxLlmClient, LlmClient, LlmRegistry};
use conductor_core::resilience::CircuitBreakerManager;
use conductor_core::workflow::executors::builtin_registry;
use conductor_core::workflow::{
    BoxStepExecutor, EngineConfig, ExecutorRegistry, StartOptions, StepExecutor, WorkflowEngine,
};
use conductor_types::context::ExecutionContext;
use conductor_types::error::{ErrorCode, OrchestratorError};
use conductor_types::event::RunEventType;
use conductor_types::integration::{IntegrationError, IntegrationMetadata, IntegrationResult};
use conductor_types::llm::{FinishReason, GenerateTextRequest, GenerateTextResponse, TokenUsage};
use conductor_types::workflow::{
    ErrorHandler, ErrorStrategy, RunStatus, StepKind, StepStatus, StepType, Workflow,
    WorkflowStatus, WorkflowStep,
};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct ScriptedLlm;

impl LlmClient for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-1"
    }

    async fn generate_text(
        &self,
        request: &GenerateTextRequest,
        _correlation_id: &str,
    ) -> Result<GenerateTextResponse, OrchestratorError> {
        Ok(GenerateTextResponse {
            text: format!("analysis of: {}", request.prompt),
            usage: TokenUsage::new(10, 5),
            model: "scripted-1".into(),
            finish_reason: FinishReason::Stop,
        })
    }
}

/// Fails the first `failures` calls of every operation, then succeeds.
struct FlakyCrm {
    calls: Arc<AtomicU32>,
    failures: u32,
}

impl IntegrationAdapter for FlakyCrm {
    fn id(&self) -> &str {
        "crm"
    }

    fn operations(&self) -> Vec<String> {
        vec!["lookup".into()]
    }

    async fn execute_operation(
        &self,
        _operation: &str,
        parameters: &Value,
        _ctx: &ExecutionContext,
    ) -> IntegrationResult {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            IntegrationResult::err(
                IntegrationError::new(ErrorCode::IntegrationUnavailable, "crm down"),
                IntegrationMetadata::default(),
            )
        } else {
            IntegrationResult::ok(
                json!({ "contact": parameters["email"], "tier": "gold" }),
                IntegrationMetadata::default(),
            )
        }
    }
}

/// Records how many instances run at once; registered as the `wait` executor.
struct Gauge {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl StepExecutor for Gauge {
    fn step_type(&self) -> StepType {
        StepType::Wait
    }

    async fn execute(
        &self,
        _step: &WorkflowStep,
        _input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, OrchestratorError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({}))
    }
}

struct Panics;

impl StepExecutor for Panics {
    fn step_type(&self) -> StepType {
        StepType::Llm
    }

    async fn execute(
        &self,
        _step: &WorkflowStep,
        _input: Value,
        _ctx: &ExecutionContext,
    ) -> Result<Value, OrchestratorError> {
        panic!("executor bug");
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

fn engine_with(max_concurrent_runs: usize, crm_failures: u32) -> (WorkflowEngine, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let mut llms = LlmRegistry::new();
    llms.register(BoxLlmClient::new(ScriptedLlm));
    let mut integrations = IntegrationRegistry::new();
    integrations.register(BoxIntegrationAdapter::new(FlakyCrm {
        calls: calls.clone(),
        failures: crm_failures,
    }));

    let executors = builtin_registry(
        Arc::new(llms),
        Arc::new(integrations),
        Arc::new(CircuitBreakerManager::default()),
    );
    let engine = WorkflowEngine::new(
        EngineConfig {
            max_concurrent_runs,
            default_step_timeout: None,
        },
        Arc::new(executors),
        Arc::new(RunEventStore::new()),
    );
    (engine, calls)
}

fn engine() -> WorkflowEngine {
    engine_with(4, 0).0
}

fn step(id: &str, position: u32, next: Option<&str>, kind: StepKind) -> WorkflowStep {
    WorkflowStep {
        id: id.into(),
        name: id.into(),
        position,
        next_step_id: next.map(String::from),
        on_error: None,
        timeout_secs: None,
        output_mapping: HashMap::new(),
        kind,
    }
}

fn llm(prompt: &str) -> StepKind {
    StepKind::Llm {
        prompt: prompt.into(),
        system_prompt: None,
        provider: None,
        model: None,
        max_tokens: None,
        temperature: None,
    }
}

fn wait(ms: u64) -> StepKind {
    StepKind::Wait { duration_ms: ms }
}

fn lookup() -> StepKind {
    StepKind::Integration {
        integration_id: "crm".into(),
        operation: "lookup".into(),
        parameters: json!({ "email": "{{variables.email}}" }),
    }
}

fn handler(strategy: ErrorStrategy) -> ErrorHandler {
    ErrorHandler {
        strategy,
        fallback_step_id: None,
        max_retries: None,
        retry_delay_ms: Some(1),
    }
}

fn workflow(id: &str, steps: Vec<WorkflowStep>) -> Workflow {
    Workflow {
        id: id.into(),
        name: id.into(),
        description: None,
        version: 1,
        status: WorkflowStatus::Active,
        steps,
        timeout_secs: None,
        metadata: HashMap::new(),
    }
}

fn branching() -> Workflow {
    workflow(
        "triage",
        vec![
            step("S1", 1, Some("C2"), llm("Assess ticket {{variables.ticket}}")),
            step(
                "C2",
                2,
                None,
                StepKind::Conditional {
                    condition: "score > 50".into(),
                    true_step_id: Some("S3".into()),
                    false_step_id: Some("S4".into()),
                },
            ),
            step("S3", 3, None, llm("Escalate")),
            step("S4", 4, None, llm("Close")),
        ],
    )
}

fn count(engine: &WorkflowEngine, run_id: &str, event_type: RunEventType) -> usize {
    engine
        .events()
        .get_events_by_run_id(run_id, None)
        .iter()
        .filter(|e| e.event_type == event_type)
        .count()
}

/// Every step.started has exactly one terminal step event, and the attempt
/// total matches started + retrying events. At most one terminal run event.
fn assert_event_invariants(engine: &WorkflowEngine, run_id: &str) {
    let run = engine.get_run(run_id).unwrap();
    let started = count(engine, run_id, RunEventType::StepStarted);
    let retrying = count(engine, run_id, RunEventType::StepRetrying);
    let terminal = count(engine, run_id, RunEventType::StepCompleted)
        + count(engine, run_id, RunEventType::StepFailed)
        + count(engine, run_id, RunEventType::StepSkipped);
    let attempts: u32 = run.context.step_results.values().map(|r| r.attempts).sum();

    assert_eq!(started, run.context.step_results.len());
    assert_eq!(started, terminal);
    assert_eq!(started + retrying, attempts as usize);
    assert!(count(engine, run_id, RunEventType::RunCompleted) <= 1);
    assert!(count(engine, run_id, RunEventType::RunFailed) <= 1);
    let terminal_runs = count(engine, run_id, RunEventType::RunCompleted)
        + count(engine, run_id, RunEventType::RunFailed)
        + count(engine, run_id, RunEventType::RunCancelled);
    assert_eq!(terminal_runs, usize::from(run.status.is_terminal()));
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn branching_workflow_takes_true_branch() {
    let engine = engine();
    engine.register_workflow(branching()).unwrap();

    let run = engine
        .start_workflow("triage", json!({ "score": 60, "ticket": "T-1" }), StartOptions::default())
        .unwrap();
    assert!(matches!(run.status, RunStatus::Queued | RunStatus::Running));

    let done = engine.wait_for_run(&run.id).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed);

    let results = &done.context.step_results;
    assert!(results.contains_key("S1"));
    assert!(results.contains_key("C2"));
    assert!(results.contains_key("S3"));
    assert!(!results.contains_key("S4"));
    assert_eq!(
        results["S1"].output.as_ref().unwrap()["text"],
        "analysis of: Assess ticket T-1"
    );

    let output = done.output.unwrap();
    assert_eq!(output["conditionResult"], true);
    assert_eq!(output["selectedStepId"], "S3");
    assert_eq!(done.context.metrics.completed_steps, 3);

    assert_event_invariants(&engine, &run.id);
    assert_eq!(count(&engine, &run.id, RunEventType::StepStarted), 3);
    assert_eq!(count(&engine, &run.id, RunEventType::RunCompleted), 1);
}

#[tokio::test]
async fn branching_workflow_takes_false_branch() {
    let engine = engine();
    engine.register_workflow(branching()).unwrap();

    let run = engine
        .start_workflow("triage", json!({ "score": 10 }), StartOptions::default())
        .unwrap();
    let done = engine.wait_for_run(&run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Completed);
    assert!(done.context.step_results.contains_key("S4"));
    assert!(!done.context.step_results.contains_key("S3"));
    assert_eq!(done.output.unwrap()["conditionResult"], false);
}

#[tokio::test]
async fn run_history_is_reconstructable_from_events() {
    let engine = engine();
    engine.register_workflow(branching()).unwrap();
    let run = engine
        .start_workflow(
            "triage",
            json!({ "score": 99 }),
            StartOptions {
                correlation_id: Some("corr-42".into()),
                user_id: Some("u-1".into()),
            },
        )
        .unwrap();
    engine.wait_for_run(&run.id).await.unwrap();

    let events = engine.events().get_events_by_correlation_id("corr-42", None);
    let timeline: Vec<(RunEventType, Option<&str>)> = events
        .iter()
        .map(|e| (e.event_type, e.step_id.as_deref()))
        .collect();
    assert_eq!(
        timeline,
        vec![
            (RunEventType::RunStarted, None),
            (RunEventType::RunRunning, None),
            (RunEventType::StepStarted, Some("S1")),
            (RunEventType::StepCompleted, Some("S1")),
            (RunEventType::StepStarted, Some("C2")),
            (RunEventType::StepCompleted, Some("C2")),
            (RunEventType::StepStarted, Some("S3")),
            (RunEventType::StepCompleted, Some("S3")),
            (RunEventType::RunCompleted, None),
        ]
    );
    assert!(events.iter().all(|e| e.run_id == run.id));
}

#[tokio::test]
async fn output_mapping_and_templates_flow_between_steps() {
    let engine = engine();
    let mut first = step("I1", 1, Some("S2"), lookup());
    first.output_mapping = HashMap::from([("tier".to_string(), "tier".to_string())]);
    engine
        .register_workflow(workflow(
            "enrich",
            vec![first, step("S2", 2, None, llm("Write a {{variables.tier}} greeting"))],
        ))
        .unwrap();

    let run = engine
        .start_workflow("enrich", json!({ "email": "ada@example.com" }), StartOptions::default())
        .unwrap();
    let done = engine.wait_for_run(&run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.context.variables["tier"], "gold");
    let output = done.output.unwrap();
    assert_eq!(output["contact"], "ada@example.com");
    assert_eq!(output["text"], "analysis of: Write a gold greeting");
}

#[tokio::test]
async fn loop_step_iterates_inside_a_run() {
    let engine = engine();
    engine
        .register_workflow(workflow(
            "fanout",
            vec![step(
                "L1",
                1,
                None,
                StepKind::Loop {
                    iterable: "{{variables.tickets}}".into(),
                    item_variable: "ticket".into(),
                    index_variable: "i".into(),
                    max_iterations: 10,
                    body: Box::new(llm("Summarize #{{variables.i}}: {{variables.ticket}}")),
                },
            )],
        ))
        .unwrap();

    let run = engine
        .start_workflow("fanout", json!({ "tickets": ["a", "b"] }), StartOptions::default())
        .unwrap();
    let done = engine.wait_for_run(&run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Completed);
    let output = done.output.unwrap();
    assert_eq!(output["iterations"], 2);
    assert_eq!(output["results"][1]["text"], "analysis of: Summarize #1: b");
}

#[tokio::test]
async fn revisiting_a_step_fails_the_run() {
    let engine = engine();
    engine
        .register_workflow(workflow(
            "cycle",
            vec![
                step("A", 1, Some("B"), wait(0)),
                step("B", 2, Some("A"), wait(0)),
            ],
        ))
        .unwrap();

    let run = engine
        .start_workflow("cycle", json!({}), StartOptions::default())
        .unwrap();
    let done = engine.wait_for_run(&run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Failed);
    assert_eq!(done.error.unwrap().code, ErrorCode::WorkflowInvalidState);
    assert_eq!(count(&engine, &run.id, RunEventType::StepStarted), 2);
}

// ---------------------------------------------------------------------------
// Failure policies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn default_policy_fails_the_run() {
    let (engine, calls) = engine_with(1, u32::MAX);
    engine
        .register_workflow(workflow(
            "fragile",
            vec![step("I1", 1, Some("S2"), lookup()), step("S2", 2, None, llm("never"))],
        ))
        .unwrap();

    let run = engine
        .start_workflow("fragile", json!({ "email": "x" }), StartOptions::default())
        .unwrap();
    let done = engine.wait_for_run(&run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Failed);
    let error = done.error.unwrap();
    assert_eq!(error.code, ErrorCode::WorkflowStepFailed);
    assert_eq!(error.context.step_id.as_deref(), Some("I1"));
    assert!(error.cause.unwrap().contains("INTEGRATION_UNAVAILABLE"));

    let failed = &done.context.step_results["I1"];
    assert_eq!(failed.status, StepStatus::Failed);
    assert_eq!(failed.error.as_ref().unwrap().code, ErrorCode::IntegrationUnavailable);
    assert!(!done.context.step_results.contains_key("S2"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_event_invariants(&engine, &run.id);
    assert_eq!(count(&engine, &run.id, RunEventType::RunFailed), 1);
}

#[tokio::test]
async fn retry_policy_reattempts_until_success() {
    let (engine, calls) = engine_with(1, 2);
    let mut flaky = step("I1", 1, None, lookup());
    flaky.on_error = Some(ErrorHandler {
        max_retries: Some(3),
        ..handler(ErrorStrategy::Retry)
    });
    engine
        .register_workflow(workflow("retrying", vec![flaky]))
        .unwrap();

    let run = engine
        .start_workflow("retrying", json!({ "email": "a@b.c" }), StartOptions::default())
        .unwrap();
    let done = engine.wait_for_run(&run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.context.step_results["I1"].attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(count(&engine, &run.id, RunEventType::StepStarted), 1);
    assert_eq!(count(&engine, &run.id, RunEventType::StepRetrying), 2);
    assert_eq!(count(&engine, &run.id, RunEventType::StepCompleted), 1);
    assert_event_invariants(&engine, &run.id);
}

#[tokio::test]
async fn exhausted_retries_fail_the_run() {
    let (engine, calls) = engine_with(1, u32::MAX);
    let mut flaky = step("I1", 1, None, lookup());
    flaky.on_error = Some(ErrorHandler {
        max_retries: Some(2),
        ..handler(ErrorStrategy::Retry)
    });
    engine
        .register_workflow(workflow("retrying", vec![flaky]))
        .unwrap();

    let run = engine
        .start_workflow("retrying", json!({}), StartOptions::default())
        .unwrap();
    let done = engine.wait_for_run(&run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Failed);
    assert_eq!(done.context.step_results["I1"].attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_event_invariants(&engine, &run.id);
}

#[tokio::test]
async fn retry_policy_does_not_repeat_non_retryable_failures() {
    let (engine, _) = engine_with(1, 0);
    let mut unknown = step(
        "S1",
        1,
        None,
        StepKind::Llm {
            prompt: "hello".into(),
            system_prompt: None,
            provider: Some("missing".into()),
            model: None,
            max_tokens: None,
            temperature: None,
        },
    );
    unknown.on_error = Some(ErrorHandler {
        max_retries: Some(3),
        ..handler(ErrorStrategy::Retry)
    });
    engine
        .register_workflow(workflow("misconfigured", vec![unknown]))
        .unwrap();

    let run = engine
        .start_workflow("misconfigured", json!({}), StartOptions::default())
        .unwrap();
    let done = engine.wait_for_run(&run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Failed);
    let failed = &done.context.step_results["S1"];
    assert_eq!(failed.attempts, 1);
    let error = failed.error.as_ref().unwrap();
    assert_eq!(error.code, ErrorCode::LlmProviderNotFound);
    assert!(!error.retryable);
    assert_eq!(count(&engine, &run.id, RunEventType::StepRetrying), 0);
    assert_event_invariants(&engine, &run.id);
}

#[tokio::test]
async fn skip_policy_continues_to_next_step() {
    let (engine, _) = engine_with(1, u32::MAX);
    let mut optional = step("I1", 1, Some("S2"), lookup());
    optional.on_error = Some(handler(ErrorStrategy::Skip));
    engine
        .register_workflow(workflow(
            "lenient",
            vec![optional, step("S2", 2, None, llm("carry on"))],
        ))
        .unwrap();

    let run = engine
        .start_workflow("lenient", json!({}), StartOptions::default())
        .unwrap();
    let done = engine.wait_for_run(&run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.context.step_results["I1"].status, StepStatus::Skipped);
    assert_eq!(done.context.step_results["S2"].status, StepStatus::Completed);
    assert_eq!(done.context.metrics.skipped_steps, 1);
    assert_eq!(count(&engine, &run.id, RunEventType::StepSkipped), 1);
    assert_event_invariants(&engine, &run.id);
}

#[tokio::test]
async fn fallback_policy_redirects() {
    let (engine, _) = engine_with(1, u32::MAX);
    let mut primary = step("I1", 1, Some("S2"), lookup());
    primary.on_error = Some(ErrorHandler {
        fallback_step_id: Some("F1".into()),
        ..handler(ErrorStrategy::Fallback)
    });
    engine
        .register_workflow(workflow(
            "degrading",
            vec![
                primary,
                step("S2", 2, None, llm("normal path")),
                step("F1", 3, None, llm("fallback path")),
            ],
        ))
        .unwrap();

    let run = engine
        .start_workflow("degrading", json!({}), StartOptions::default())
        .unwrap();
    let done = engine.wait_for_run(&run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.context.step_results["I1"].status, StepStatus::Failed);
    assert!(done.context.step_results.contains_key("F1"));
    assert!(!done.context.step_results.contains_key("S2"));
    assert_eq!(done.output.unwrap()["text"], "analysis of: fallback path");
    assert_event_invariants(&engine, &run.id);
}

#[tokio::test]
async fn missing_executor_fails_the_step() {
    let engine = WorkflowEngine::new(
        EngineConfig::default(),
        Arc::new(ExecutorRegistry::new()),
        Arc::new(RunEventStore::new()),
    );
    engine
        .register_workflow(workflow("bare", vec![step("W1", 1, None, wait(0))]))
        .unwrap();

    let run = engine
        .start_workflow("bare", json!({}), StartOptions::default())
        .unwrap();
    let done = engine.wait_for_run(&run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Failed);
    assert_eq!(
        done.context.step_results["W1"].error.as_ref().unwrap().code,
        ErrorCode::WorkflowExecutorNotFound
    );
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn step_timeout_goes_through_error_policy() {
    let engine = engine();
    let mut slow = step("W1", 1, Some("W2"), wait(5_000));
    slow.timeout_secs = Some(1);
    slow.on_error = Some(handler(ErrorStrategy::Skip));
    engine
        .register_workflow(workflow("slow", vec![slow, step("W2", 2, None, wait(10))]))
        .unwrap();

    let run = engine
        .start_workflow("slow", json!({}), StartOptions::default())
        .unwrap();
    let done = engine.wait_for_run(&run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Completed);
    let timed_out = &done.context.step_results["W1"];
    assert_eq!(timed_out.status, StepStatus::Skipped);
    assert_eq!(
        timed_out.error.as_ref().unwrap().code,
        ErrorCode::WorkflowStepTimeout
    );
}

#[tokio::test(start_paused = true)]
async fn workflow_deadline_fails_the_run() {
    let engine = engine();
    let mut wf = workflow(
        "deadline",
        vec![
            step("W1", 1, Some("W2"), wait(600)),
            step("W2", 2, Some("W3"), wait(600)),
            step("W3", 3, None, wait(600)),
        ],
    );
    wf.timeout_secs = Some(1);
    engine.register_workflow(wf).unwrap();

    let run = engine
        .start_workflow("deadline", json!({}), StartOptions::default())
        .unwrap();
    let done = engine.wait_for_run(&run.id).await.unwrap();

    assert_eq!(done.status, RunStatus::Failed);
    assert_eq!(done.error.unwrap().code, ErrorCode::WorkflowTimeout);
    assert_eq!(done.context.step_results["W1"].status, StepStatus::Completed);
    assert_eq!(done.context.step_results["W2"].status, StepStatus::Failed);
    assert!(!done.context.step_results.contains_key("W3"));
    assert_event_invariants(&engine, &run.id);
}

// ---------------------------------------------------------------------------
// Run control and scheduling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_stops_before_next_step() {
    let engine = engine();
    engine
        .register_workflow(workflow(
            "long",
            vec![step("W1", 1, Some("W2"), wait(150)), step("W2", 2, None, wait(0))],
        ))
        .unwrap();

    let run = engine
        .start_workflow("long", json!({}), StartOptions::default())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(engine.cancel_run(&run.id).unwrap());

    let done = engine.wait_for_run(&run.id).await.unwrap();
    assert_eq!(done.status, RunStatus::Cancelled);

    // The in-flight wait finishes but nothing after it starts.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let events = engine.events().get_events_by_run_id(&run.id, None);
    assert!(!events.iter().any(|e| e.step_id.as_deref() == Some("W2")));
    assert_eq!(engine.get_run_status(&run.id), Some(RunStatus::Cancelled));
    assert_eq!(count(&engine, &run.id, RunEventType::RunCancelled), 1);
    assert_eq!(count(&engine, &run.id, RunEventType::RunCompleted), 0);
    assert!(!engine.cancel_run(&run.id).unwrap());
}

#[tokio::test]
async fn pause_holds_run_between_steps() {
    let engine = engine();
    engine
        .register_workflow(workflow(
            "pausable",
            vec![step("W1", 1, Some("W2"), wait(80)), step("W2", 2, None, wait(0))],
        ))
        .unwrap();

    let run = engine
        .start_workflow("pausable", json!({}), StartOptions::default())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(engine.pause_run(&run.id).unwrap());
    assert!(!engine.pause_run(&run.id).unwrap());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.get_run_status(&run.id), Some(RunStatus::Paused));
    assert_eq!(count(&engine, &run.id, RunEventType::StepStarted), 1);

    assert!(engine.resume_run(&run.id).unwrap());
    let done = engine.wait_for_run(&run.id).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(count(&engine, &run.id, RunEventType::RunPaused), 1);
    assert_eq!(count(&engine, &run.id, RunEventType::RunResumed), 1);
    assert_event_invariants(&engine, &run.id);
}

#[tokio::test]
async fn cancel_wakes_a_paused_run() {
    let engine = engine();
    engine
        .register_workflow(workflow(
            "pausable",
            vec![step("W1", 1, Some("W2"), wait(40)), step("W2", 2, None, wait(0))],
        ))
        .unwrap();

    let run = engine
        .start_workflow("pausable", json!({}), StartOptions::default())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.pause_run(&run.id).unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert!(engine.cancel_run(&run.id).unwrap());
    let done = engine.wait_for_run(&run.id).await.unwrap();
    assert_eq!(done.status, RunStatus::Cancelled);
    assert_eq!(engine.get_statistics().active_runs, 0);
}

#[tokio::test]
async fn concurrency_never_exceeds_limit() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut executors = ExecutorRegistry::new();
    executors.register(BoxStepExecutor::new(Gauge {
        current: current.clone(),
        peak: peak.clone(),
    }));
    let engine = WorkflowEngine::new(
        EngineConfig {
            max_concurrent_runs: 2,
            default_step_timeout: None,
        },
        Arc::new(executors),
        Arc::new(RunEventStore::new()),
    );
    engine
        .register_workflow(workflow("gauge", vec![step("W1", 1, None, wait(0))]))
        .unwrap();

    let runs: Vec<_> = (0..6)
        .map(|_| {
            engine
                .start_workflow("gauge", json!({}), StartOptions::default())
                .unwrap()
        })
        .collect();
    for run in &runs {
        let done = engine.wait_for_run(&run.id).await.unwrap();
        assert_eq!(done.status, RunStatus::Completed);
    }

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    let stats = engine.get_statistics();
    assert_eq!(stats.total_runs, 6);
    assert_eq!(stats.runs_by_status.get(&RunStatus::Completed), Some(&6));
    assert_eq!(engine.list_runs(Some("gauge")).len(), 6);
    assert!(engine.list_runs(Some("other")).is_empty());
}

#[tokio::test]
async fn panicking_executor_fails_run_and_frees_slot() {
    let mut executors = ExecutorRegistry::new();
    executors.register(BoxStepExecutor::new(Panics));
    executors.register(BoxStepExecutor::new(Gauge {
        current: Arc::new(AtomicUsize::new(0)),
        peak: Arc::new(AtomicUsize::new(0)),
    }));
    let engine = WorkflowEngine::new(
        EngineConfig {
            max_concurrent_runs: 1,
            default_step_timeout: None,
        },
        Arc::new(executors),
        Arc::new(RunEventStore::new()),
    );
    engine
        .register_workflow(workflow("boom", vec![step("S1", 1, None, llm("x"))]))
        .unwrap();
    engine
        .register_workflow(workflow("calm", vec![step("W1", 1, None, wait(0))]))
        .unwrap();

    let bad = engine
        .start_workflow("boom", json!({}), StartOptions::default())
        .unwrap();
    let good = engine
        .start_workflow("calm", json!({}), StartOptions::default())
        .unwrap();

    let failed = engine.wait_for_run(&bad.id).await.unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.error.unwrap().code, ErrorCode::SystemInternal);

    let done = engine.wait_for_run(&good.id).await.unwrap();
    assert_eq!(done.status, RunStatus::Completed);
}
