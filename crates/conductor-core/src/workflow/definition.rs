//! Workflow definition parsing, validation and file loading.
//!
//! Definitions are accepted as YAML or JSON. Validation checks structure only
//! (ids, references, loop shape); executability is checked at run time.

use std::collections::HashSet;
use std::path::Path;

use conductor_types::error::{ErrorCode, OrchestratorError};
use conductor_types::workflow::{ErrorStrategy, StepKind, Workflow};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("workflow has no steps")]
    Empty,

    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),

    /// A step field names a step that does not exist.
    #[error("step '{step}' {field} references unknown step '{target}'")]
    UnknownStep {
        step: String,
        field: &'static str,
        target: String,
    },

    #[error("loop step '{0}' has a loop body; nested loops are not supported")]
    NestedLoop(String),

    #[error("invalid definition: {0}")]
    Invalid(String),
}

impl From<DefinitionError> for OrchestratorError {
    fn from(err: DefinitionError) -> Self {
        match err {
            DefinitionError::Io(io) => OrchestratorError::from(io),
            other => OrchestratorError::new(ErrorCode::WorkflowInvalidDefinition, other.to_string())
                .with_cause(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse and validate a YAML definition. JSON is valid YAML, so this accepts
/// both.
pub fn parse_workflow_yaml(source: &str) -> Result<Workflow, DefinitionError> {
    let workflow: Workflow =
        serde_yaml_ng::from_str(source).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_workflow(&workflow)?;
    Ok(workflow)
}

pub fn parse_workflow_json(source: &str) -> Result<Workflow, DefinitionError> {
    let workflow: Workflow =
        serde_json::from_str(source).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_workflow(&workflow)?;
    Ok(workflow)
}

/// Load a definition from disk, choosing the parser by extension.
pub fn load_workflow_file(path: &Path) -> Result<Workflow, DefinitionError> {
    let source = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_workflow_json(&source),
        _ => parse_workflow_yaml(&source),
    }
}

pub fn serialize_workflow_yaml(workflow: &Workflow) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(workflow).map_err(|e| DefinitionError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check structural constraints:
///
/// - non-empty id, name and step list, version >= 1
/// - unique step ids
/// - `nextStepId`, `trueStepId`, `falseStepId`, `fallbackStepId` reference
///   existing steps
/// - a `fallback` handler names its fallback step
/// - loop bodies are not loops and `maxIterations > 0`
/// - timeouts are non-zero
pub fn validate_workflow(workflow: &Workflow) -> Result<(), DefinitionError> {
    if workflow.id.trim().is_empty() {
        return Err(DefinitionError::Invalid("workflow id must not be empty".into()));
    }
    if workflow.name.trim().is_empty() {
        return Err(DefinitionError::Invalid("workflow name must not be empty".into()));
    }
    if workflow.version == 0 {
        return Err(DefinitionError::Invalid("version must be at least 1".into()));
    }
    if workflow.timeout_secs == Some(0) {
        return Err(DefinitionError::Invalid("workflow timeout must be > 0".into()));
    }
    if workflow.steps.is_empty() {
        return Err(DefinitionError::Empty);
    }

    let mut ids = HashSet::new();
    for step in &workflow.steps {
        if step.id.trim().is_empty() {
            return Err(DefinitionError::Invalid("step id must not be empty".into()));
        }
        if !ids.insert(step.id.as_str()) {
            return Err(DefinitionError::DuplicateStep(step.id.clone()));
        }
    }

    let check = |step: &str, field: &'static str, target: Option<&String>| {
        match target {
            Some(target) if !ids.contains(target.as_str()) => Err(DefinitionError::UnknownStep {
                step: step.to_string(),
                field,
                target: target.clone(),
            }),
            _ => Ok(()),
        }
    };

    for step in &workflow.steps {
        check(&step.id, "nextStepId", step.next_step_id.as_ref())?;

        if step.timeout_secs == Some(0) {
            return Err(DefinitionError::Invalid(format!(
                "step '{}' timeout must be > 0",
                step.id
            )));
        }

        if let Some(handler) = &step.on_error {
            check(&step.id, "fallbackStepId", handler.fallback_step_id.as_ref())?;
            if handler.strategy == ErrorStrategy::Fallback && handler.fallback_step_id.is_none() {
                return Err(DefinitionError::Invalid(format!(
                    "step '{}' uses the fallback strategy without a fallbackStepId",
                    step.id
                )));
            }
        }

        match &step.kind {
            StepKind::Conditional {
                condition,
                true_step_id,
                false_step_id,
            } => {
                if condition.trim().is_empty() {
                    return Err(DefinitionError::Invalid(format!(
                        "conditional step '{}' has an empty condition",
                        step.id
                    )));
                }
                check(&step.id, "trueStepId", true_step_id.as_ref())?;
                check(&step.id, "falseStepId", false_step_id.as_ref())?;
            }
            StepKind::Loop {
                body,
                max_iterations,
                iterable,
                ..
            } => {
                if matches!(**body, StepKind::Loop { .. }) {
                    return Err(DefinitionError::NestedLoop(step.id.clone()));
                }
                if *max_iterations == 0 {
                    return Err(DefinitionError::Invalid(format!(
                        "loop step '{}' maxIterations must be > 0",
                        step.id
                    )));
                }
                if iterable.trim().is_empty() {
                    return Err(DefinitionError::Invalid(format!(
                        "loop step '{}' has an empty iterable",
                        step.id
                    )));
                }
            }
            StepKind::Llm { .. } | StepKind::Integration { .. } | StepKind::Wait { .. } => {}
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
