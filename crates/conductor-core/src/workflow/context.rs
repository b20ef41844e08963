//! Execution context helpers: variable storage, dot-path resolution, template
//! interpolation and step-result accumulation.
//!
//! Mutators take the context by value and return the updated one. The run
//! loop is the only owner, so no copy is made.

use std::collections::HashMap;

use conductor_types::context::{ExecutionContext, ExecutionMetrics};
use conductor_types::workflow::{StepResult, StepStatus};
use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum serialized size of a single step output (1 MB).
pub const MAX_STEP_OUTPUT_SIZE: usize = 1_048_576;

// ---------------------------------------------------------------------------
// Construction and mutation
// ---------------------------------------------------------------------------

/// Build a fresh context seeded with the run input.
///
/// Top-level keys of an object input become variables; the whole input is
/// also available as `variables.input`.
pub fn new_context(
    run_id: impl Into<String>,
    workflow_id: impl Into<String>,
    correlation_id: impl Into<String>,
    user_id: Option<String>,
    input: &Value,
) -> ExecutionContext {
    let mut variables = Map::new();
    if let Value::Object(fields) = input {
        for (k, v) in fields {
            variables.insert(k.clone(), v.clone());
        }
    }
    variables.insert("input".to_string(), input.clone());

    ExecutionContext {
        run_id: run_id.into(),
        workflow_id: workflow_id.into(),
        correlation_id: correlation_id.into(),
        user_id,
        variables,
        step_results: HashMap::new(),
        metrics: ExecutionMetrics::default(),
    }
}

pub fn update_variable(
    mut ctx: ExecutionContext,
    name: impl Into<String>,
    value: Value,
) -> ExecutionContext {
    ctx.variables.insert(name.into(), value);
    ctx
}

/// Record a step result and refresh the running totals.
///
/// Outputs larger than [`MAX_STEP_OUTPUT_SIZE`] are replaced by a truncation
/// marker. Durations only count when both timestamps are present.
pub fn add_step_result(mut ctx: ExecutionContext, mut result: StepResult) -> ExecutionContext {
    if let Some(output) = &result.output {
        let size = serde_json::to_string(output).map(|s| s.len()).unwrap_or(0);
        if size > MAX_STEP_OUTPUT_SIZE {
            tracing::warn!(
                step_id = result.step_id.as_str(),
                size,
                max = MAX_STEP_OUTPUT_SIZE,
                "step output exceeds size limit, truncating"
            );
            result.output = Some(json!({
                "_truncated": true,
                "_originalSize": size,
            }));
        }
    }

    ctx.step_results.insert(result.step_id.clone(), result);
    ctx.metrics = tally(&ctx.step_results);
    ctx
}

fn tally(results: &HashMap<String, StepResult>) -> ExecutionMetrics {
    let mut metrics = ExecutionMetrics::default();
    for (id, result) in results {
        metrics.total_steps += 1;
        match result.status {
            StepStatus::Completed => metrics.completed_steps += 1,
            StepStatus::Failed => metrics.failed_steps += 1,
            StepStatus::Skipped => metrics.skipped_steps += 1,
            StepStatus::Pending | StepStatus::Running => {}
        }
        if let Some(ms) = result.duration_ms() {
            metrics.step_durations_ms.insert(id.clone(), ms);
            metrics.total_duration_ms += ms;
        }
    }
    metrics
}

/// Copy selected keys of a step output into context variables.
///
/// `mapping` is output path -> variable name. Paths missing from the output
/// are skipped.
pub fn map_step_outputs(
    mut ctx: ExecutionContext,
    mapping: &HashMap<String, String>,
    output: &Value,
) -> ExecutionContext {
    for (output_path, variable) in mapping {
        match walk(output, output_path) {
            Some(value) => {
                ctx.variables.insert(variable.clone(), value.clone());
            }
            None => {
                tracing::debug!(
                    output_path = output_path.as_str(),
                    variable = variable.as_str(),
                    "output mapping source missing, skipping"
                );
            }
        }
    }
    ctx
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve a dot path against the context. Never fails: any missing link
/// yields `None`.
///
/// - `variables.a.b`, `steps.<id>.output.x`, `metrics.completedSteps`
/// - a bare path (`score`, `user.name`) is looked up in `variables`
/// - numeric segments and `[n]` index into arrays
pub fn resolve_path(path: &str, ctx: &ExecutionContext) -> Option<Value> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }

    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    match head {
        "variables" => {
            let root = Value::Object(ctx.variables.clone());
            match rest {
                Some(rest) => walk(&root, rest).cloned(),
                None => Some(root),
            }
        }
        "steps" => {
            let rest = rest?;
            let (step_id, field_path) = match rest.split_once('.') {
                Some((id, p)) => (id, Some(p)),
                None => (rest, None),
            };
            let result = serde_json::to_value(ctx.step_results.get(step_id)?).ok()?;
            match field_path {
                Some(p) => walk(&result, p).cloned(),
                None => Some(result),
            }
        }
        "metrics" => {
            let metrics = serde_json::to_value(&ctx.metrics).ok()?;
            match rest {
                Some(rest) => walk(&metrics, rest).cloned(),
                None => Some(metrics),
            }
        }
        _ => {
            let root = Value::Object(ctx.variables.clone());
            walk(&root, path).cloned()
        }
    }
}

/// Walk a dot path (with optional `[n]` indexes) inside a JSON value.
fn walk<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let normalized = path.replace('[', ".").replace(']', "");
    let mut current = root;
    for segment in normalized.split('.') {
        if segment.is_empty() {
            return None;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Replace every `{{ path }}` with the resolved value.
///
/// Unresolved tokens are left verbatim. Substituted text is not rescanned.
pub fn resolve_template(template: &str, ctx: &ExecutionContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + len + 2;
        out.push_str(&rest[..start]);

        let token = &rest[start..end];
        let path = &token[2..token.len() - 2];
        match resolve_path(path, ctx) {
            Some(value) => out.push_str(&value_to_string(&value)),
            None => out.push_str(token),
        }
        rest = &rest[end..];
    }

    out.push_str(rest);
    out
}

/// Recursively resolve templates through a step's parameters.
///
/// A string that is exactly one `{{ path }}` token is replaced by the raw
/// resolved value so arrays, numbers and objects keep their type.
pub fn prepare_step_input(params: &Value, ctx: &ExecutionContext) -> Value {
    match params {
        Value::String(s) => {
            if let Some(path) = single_token(s) {
                if let Some(value) = resolve_path(path, ctx) {
                    return value;
                }
            }
            Value::String(resolve_template(s, ctx))
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| prepare_step_input(item, ctx))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), prepare_step_input(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// The inner path when `s` is a single `{{ ... }}` token and nothing else.
pub(crate) fn single_token(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert a JSON value to a display string for template resolution.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
