//! Workflow domain types for Conductor.
//!
//! A [`Workflow`] is a graph of typed steps linked by `nextStepId` (and the
//! branch ids of conditional steps). A [`WorkflowRun`] is one execution of a
//! pinned workflow version and owns its [`ExecutionContext`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::error::ErrorRecord;

// ---------------------------------------------------------------------------
// Workflow definition
// ---------------------------------------------------------------------------

/// A registered workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Monotonic version; runs pin the version registered when they start.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub status: WorkflowStatus,
    pub steps: Vec<WorkflowStep>,
    /// Run deadline in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_version() -> u32 {
    1
}

impl Workflow {
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// The step with the lowest `position`; ties keep declaration order.
    pub fn entry_step(&self) -> Option<&WorkflowStep> {
        self.steps.iter().min_by_key(|s| s.position)
    }
}

/// Lifecycle status of a workflow definition. Only `active` workflows run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    Archived,
    Deprecated,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Draft => write!(f, "draft"),
            WorkflowStatus::Active => write!(f, "active"),
            WorkflowStatus::Archived => write!(f, "archived"),
            WorkflowStatus::Deprecated => write!(f, "deprecated"),
        }
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(WorkflowStatus::Draft),
            "active" => Ok(WorkflowStatus::Active),
            "archived" => Ok(WorkflowStatus::Archived),
            "deprecated" => Ok(WorkflowStatus::Deprecated),
            other => Err(format!("invalid workflow status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// A single step. The variant payload is flattened next to the common fields
/// and discriminated by `type`:
///
/// ```yaml
/// id: summarize
/// name: Summarize
/// type: llm
/// position: 1
/// prompt: "Summarize {{variables.text}}"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub position: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<ErrorHandler>,
    /// Per-attempt timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Output key (dot path into the step output) -> context variable name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub output_mapping: HashMap<String, String>,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl WorkflowStep {
    pub fn step_type(&self) -> StepType {
        self.kind.step_type()
    }
}

/// Variant payload of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Prompt a language model.
    Llm {
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none", rename = "systemPrompt")]
        system_prompt: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none", rename = "maxTokens")]
        max_tokens: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temperature: Option<f64>,
    },
    /// Invoke an operation on a registered integration.
    Integration {
        #[serde(rename = "integrationId")]
        integration_id: String,
        operation: String,
        #[serde(default)]
        parameters: serde_json::Value,
    },
    /// Branch on a condition expression.
    Conditional {
        condition: String,
        #[serde(default, skip_serializing_if = "Option::is_none", rename = "trueStepId")]
        true_step_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none", rename = "falseStepId")]
        false_step_id: Option<String>,
    },
    /// Run `body` once per element of `iterable`.
    Loop {
        iterable: String,
        #[serde(default = "default_item_variable", rename = "itemVariable")]
        item_variable: String,
        #[serde(default = "default_index_variable", rename = "indexVariable")]
        index_variable: String,
        #[serde(default = "default_max_iterations", rename = "maxIterations")]
        max_iterations: u32,
        body: Box<StepKind>,
    },
    /// Suspend the run for a fixed duration.
    Wait {
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },
}

fn default_item_variable() -> String {
    "item".to_string()
}

fn default_index_variable() -> String {
    "index".to_string()
}

fn default_max_iterations() -> u32 {
    100
}

impl StepKind {
    pub fn step_type(&self) -> StepType {
        match self {
            StepKind::Llm { .. } => StepType::Llm,
            StepKind::Integration { .. } => StepType::Integration,
            StepKind::Conditional { .. } => StepType::Conditional,
            StepKind::Loop { .. } => StepType::Loop,
            StepKind::Wait { .. } => StepType::Wait,
        }
    }

    /// The templated parameters of this step as JSON. The engine resolves
    /// templates in this value and hands the result to the executor as input.
    pub fn parameters(&self) -> serde_json::Value {
        use serde_json::json;

        match self {
            StepKind::Llm {
                prompt,
                system_prompt,
                provider,
                model,
                max_tokens,
                temperature,
            } => json!({
                "prompt": prompt,
                "systemPrompt": system_prompt,
                "provider": provider,
                "model": model,
                "maxTokens": max_tokens,
                "temperature": temperature,
            }),
            StepKind::Integration {
                integration_id,
                operation,
                parameters,
            } => json!({
                "integrationId": integration_id,
                "operation": operation,
                "parameters": parameters,
            }),
            StepKind::Conditional { condition, .. } => json!({ "condition": condition }),
            // The iterable is resolved by the loop executor itself and the
            // body per iteration, so nothing is templated up front.
            StepKind::Loop {
                iterable,
                max_iterations,
                ..
            } => json!({ "iterable": iterable, "maxIterations": max_iterations }),
            StepKind::Wait { duration_ms } => json!({ "durationMs": duration_ms }),
        }
    }
}

/// Step type discriminant used for executor dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Llm,
    Integration,
    Conditional,
    Loop,
    Wait,
}

impl StepType {
    pub const ALL: [StepType; 5] = [
        StepType::Llm,
        StepType::Integration,
        StepType::Conditional,
        StepType::Loop,
        StepType::Wait,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepType::Llm => "llm",
            StepType::Integration => "integration",
            StepType::Conditional => "conditional",
            StepType::Loop => "loop",
            StepType::Wait => "wait",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when a step fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorHandler {
    #[serde(default)]
    pub strategy: ErrorStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_step_id: Option<String>,
    /// Additional attempts for the `retry` strategy (default 3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Initial backoff between retries in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStrategy {
    Retry,
    Skip,
    #[default]
    Fail,
    Fallback,
}

impl fmt::Display for ErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorStrategy::Retry => write!(f, "retry"),
            ErrorStrategy::Skip => write!(f, "skip"),
            ErrorStrategy::Fail => write!(f, "fail"),
            ErrorStrategy::Fallback => write!(f, "fallback"),
        }
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// One execution of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: String,
    pub workflow_id: String,
    pub workflow_version: u32,
    pub status: RunStatus,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    pub context: ExecutionContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

/// Run lifecycle. `completed`, `failed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Queued => write!(f, "queued"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Paused => write!(f, "paused"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "paused" => Ok(RunStatus::Paused),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("invalid run status: '{other}'")),
        }
    }
}

/// Outcome of one step within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    #[serde(default)]
    pub attempts: u32,
}

impl StepResult {
    /// Wall-clock duration, only when both timestamps are present.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}
