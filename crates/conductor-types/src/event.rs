//! Run event types for the append-only audit log.
//!
//! A `RunEvent` is immutable once appended. Every run and step transition the
//! engine performs is mirrored by exactly one event.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle event kinds, serialized as `run.*` / `step.*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RunEventType {
    #[serde(rename = "run.started")]
    RunStarted,
    #[serde(rename = "run.running")]
    RunRunning,
    #[serde(rename = "run.paused")]
    RunPaused,
    #[serde(rename = "run.resumed")]
    RunResumed,
    #[serde(rename = "run.completed")]
    RunCompleted,
    #[serde(rename = "run.failed")]
    RunFailed,
    #[serde(rename = "run.cancelled")]
    RunCancelled,
    #[serde(rename = "step.started")]
    StepStarted,
    #[serde(rename = "step.retrying")]
    StepRetrying,
    #[serde(rename = "step.completed")]
    StepCompleted,
    #[serde(rename = "step.failed")]
    StepFailed,
    #[serde(rename = "step.skipped")]
    StepSkipped,
}

impl RunEventType {
    pub const ALL: [RunEventType; 12] = [
        RunEventType::RunStarted,
        RunEventType::RunRunning,
        RunEventType::RunPaused,
        RunEventType::RunResumed,
        RunEventType::RunCompleted,
        RunEventType::RunFailed,
        RunEventType::RunCancelled,
        RunEventType::StepStarted,
        RunEventType::StepRetrying,
        RunEventType::StepCompleted,
        RunEventType::StepFailed,
        RunEventType::StepSkipped,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RunEventType::RunStarted => "run.started",
            RunEventType::RunRunning => "run.running",
            RunEventType::RunPaused => "run.paused",
            RunEventType::RunResumed => "run.resumed",
            RunEventType::RunCompleted => "run.completed",
            RunEventType::RunFailed => "run.failed",
            RunEventType::RunCancelled => "run.cancelled",
            RunEventType::StepStarted => "step.started",
            RunEventType::StepRetrying => "step.retrying",
            RunEventType::StepCompleted => "step.completed",
            RunEventType::StepFailed => "step.failed",
            RunEventType::StepSkipped => "step.skipped",
        }
    }

    /// Terminal step events: exactly one per `step.started`.
    pub fn is_step_terminal(self) -> bool {
        matches!(
            self,
            RunEventType::StepCompleted | RunEventType::StepFailed | RunEventType::StepSkipped
        )
    }
}

impl fmt::Display for RunEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunEventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("invalid run event type: '{s}'"))
    }
}

/// An immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    /// Caller-assigned, unique across the store.
    pub id: String,
    pub run_id: String,
    #[serde(rename = "type")]
    pub event_type: RunEventType,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RunEvent {
    /// New event with a fresh UUIDv7 id and the current time.
    pub fn new(
        run_id: impl Into<String>,
        event_type: RunEventType,
        correlation_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            run_id: run_id.into(),
            event_type,
            timestamp: Utc::now(),
            correlation_id: correlation_id.into(),
            step_id: None,
            payload,
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }
}
