//! Client-facing shapes for runs and events.
//!
//! Stored runs and events carry full [`ErrorRecord`]s (diagnostic message,
//! cause, context). Responses carry only the [`SafeError`] projection.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use conductor_core::event::EventPage;
use conductor_types::context::{ExecutionContext, ExecutionMetrics};
use conductor_types::error::{ErrorRecord, SafeError};
use conductor_types::event::{RunEvent, RunEventType};
use conductor_types::workflow::{RunStatus, StepResult, StepStatus, WorkflowRun};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    pub id: String,
    pub workflow_id: String,
    pub workflow_version: u32,
    pub status: RunStatus,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub context: ContextView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SafeError>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextView {
    pub run_id: String,
    pub workflow_id: String,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub variables: Map<String, Value>,
    pub step_results: HashMap<String, StepResultView>,
    pub metrics: ExecutionMetrics,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResultView {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SafeError>,
    pub attempts: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub id: String,
    pub run_id: String,
    #[serde(rename = "type")]
    pub event_type: RunEventType,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub struct EventPageView {
    pub events: Vec<EventView>,
    pub total: usize,
}

impl From<WorkflowRun> for RunView {
    fn from(run: WorkflowRun) -> Self {
        Self {
            id: run.id,
            workflow_id: run.workflow_id,
            workflow_version: run.workflow_version,
            status: run.status,
            input: run.input,
            output: run.output,
            context: run.context.into(),
            current_step_id: run.current_step_id,
            created_at: run.created_at,
            started_at: run.started_at,
            completed_at: run.completed_at,
            error: run.error.as_ref().map(ErrorRecord::to_safe),
        }
    }
}

impl From<ExecutionContext> for ContextView {
    fn from(ctx: ExecutionContext) -> Self {
        Self {
            run_id: ctx.run_id,
            workflow_id: ctx.workflow_id,
            correlation_id: ctx.correlation_id,
            user_id: ctx.user_id,
            variables: ctx.variables,
            step_results: ctx
                .step_results
                .into_iter()
                .map(|(id, result)| (id, result.into()))
                .collect(),
            metrics: ctx.metrics,
        }
    }
}

impl From<StepResult> for StepResultView {
    fn from(result: StepResult) -> Self {
        Self {
            duration_ms: result.duration_ms(),
            error: result.error.as_ref().map(ErrorRecord::to_safe),
            step_id: result.step_id,
            status: result.status,
            started_at: result.started_at,
            completed_at: result.completed_at,
            input: result.input,
            output: result.output,
            attempts: result.attempts,
        }
    }
}

impl From<RunEvent> for EventView {
    fn from(event: RunEvent) -> Self {
        Self {
            id: event.id,
            run_id: event.run_id,
            event_type: event.event_type,
            timestamp: event.timestamp,
            correlation_id: event.correlation_id,
            step_id: event.step_id,
            payload: safe_payload(event.payload),
        }
    }
}

impl From<EventPage> for EventPageView {
    fn from(page: EventPage) -> Self {
        Self {
            events: page.events.into_iter().map(EventView::from).collect(),
            total: page.total,
        }
    }
}

/// Replace a payload's `error` record with its safe projection. A value that
/// is not a record is dropped rather than passed through.
fn safe_payload(mut payload: Value) -> Value {
    let Some(fields) = payload.as_object_mut() else {
        return payload;
    };
    let Some(error) = fields.remove("error") else {
        return payload;
    };
    if error.is_null() {
        fields.insert("error".into(), Value::Null);
    } else if let Ok(record) = serde_json::from_value::<ErrorRecord>(error) {
        if let Ok(safe) = serde_json::to_value(record.to_safe()) {
            fields.insert("error".into(), safe);
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::error::{ErrorCode, OrchestratorError};
    use serde_json::json;

    fn internal_error() -> OrchestratorError {
        OrchestratorError::new(ErrorCode::IntegrationUnavailable, "crm at 10.0.0.7 refused")
            .with_cause("connection reset")
            .with_step_id("S1")
    }

    #[test]
    fn test_event_payload_error_is_projected() {
        let event = RunEvent::new(
            "run-1",
            RunEventType::StepFailed,
            "corr",
            json!({ "error": internal_error().to_record(), "attempts": 2 }),
        );
        let view = serde_json::to_value(EventView::from(event)).unwrap();

        assert_eq!(view["payload"]["attempts"], 2);
        assert_eq!(
            view["payload"]["error"],
            serde_json::to_value(internal_error().to_safe()).unwrap()
        );
        let text = view.to_string();
        assert!(!text.contains("10.0.0.7"));
        assert!(!text.contains("connection reset"));
    }

    #[test]
    fn test_unrecognized_error_value_is_dropped() {
        let payload = safe_payload(json!({ "error": { "stack": "secret" }, "ok": true }));
        assert_eq!(payload, json!({ "ok": true }));
        assert_eq!(safe_payload(json!({ "error": null })), json!({ "error": null }));
        assert_eq!(safe_payload(json!([1, 2])), json!([1, 2]));
    }

    #[test]
    fn test_step_result_error_is_projected() {
        let result = StepResult {
            step_id: "S1".into(),
            status: StepStatus::Failed,
            started_at: None,
            completed_at: None,
            input: None,
            output: None,
            error: Some(internal_error().to_record()),
            attempts: 1,
        };
        let view = StepResultView::from(result);
        assert_eq!(view.error, Some(internal_error().to_safe()));
    }
}
