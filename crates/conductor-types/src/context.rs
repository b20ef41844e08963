//! Per-run execution context.
//!
//! The context is owned by exactly one run loop. Helper functions in
//! `conductor-core::workflow::context` take it by value and hand back the
//! updated value.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::workflow::StepResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub run_id: String,
    pub workflow_id: String,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub variables: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub step_results: HashMap<String, StepResult>,
    #[serde(default)]
    pub metrics: ExecutionMetrics,
}

/// Running totals accumulated as step results are added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub total_steps: u32,
    pub completed_steps: u32,
    pub failed_steps: u32,
    pub skipped_steps: u32,
    pub total_duration_ms: u64,
    #[serde(default)]
    pub step_durations_ms: HashMap<String, u64>,
}
