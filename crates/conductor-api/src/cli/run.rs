//! `conductor run`: execute a workflow file once in-process.

use std::path::Path;

use anyhow::Context;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use conductor_core::workflow::definition::load_workflow_file;
use conductor_core::workflow::StartOptions;
use conductor_types::event::{RunEvent, RunEventType};
use conductor_types::workflow::{RunStatus, StepStatus, WorkflowRun, WorkflowStatus};
use console::style;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::state::AppState;

pub async fn run_workflow(
    state: &AppState,
    file: &Path,
    input: Option<&str>,
    follow: bool,
    correlation_id: Option<String>,
    json: bool,
) -> anyhow::Result<RunStatus> {
    let mut workflow = load_workflow_file(file)
        .with_context(|| format!("failed to load workflow {}", file.display()))?;
    if workflow.status != WorkflowStatus::Active {
        tracing::info!(
            workflow_id = %workflow.id,
            status = %workflow.status,
            "activating workflow for a one-off run"
        );
        workflow.status = WorkflowStatus::Active;
    }
    let workflow_id = workflow.id.clone();
    state.engine.register_workflow(workflow)?;

    let input = parse_input(input)?;

    // Subscribe before starting so run.started is not missed.
    let events = if follow {
        state.events.bus().map(|bus| bus.subscribe())
    } else {
        None
    };

    let options = StartOptions {
        correlation_id,
        user_id: None,
    };
    let run = state.engine.start_workflow(&workflow_id, input, options)?;
    tracing::debug!(run_id = %run.id, workflow_id = %workflow_id, "run queued");

    let finished = match events {
        Some(rx) => follow_run(state, &run.id, rx, json).await?,
        None => state.engine.wait_for_run(&run.id).await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&finished)?);
    } else {
        print_run(&finished);
    }
    Ok(finished.status)
}

/// Inline JSON, `@path` to a JSON file, or an empty object.
fn parse_input(input: Option<&str>) -> anyhow::Result<Value> {
    let Some(raw) = input else {
        return Ok(Value::Object(serde_json::Map::new()));
    };
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {path}"))?,
        None => raw.to_string(),
    };
    let value: Value = serde_json::from_str(&text).context("run input is not valid JSON")?;
    anyhow::ensure!(value.is_object(), "run input must be a JSON object");
    Ok(value)
}

async fn follow_run(
    state: &AppState,
    run_id: &str,
    mut rx: broadcast::Receiver<RunEvent>,
    json: bool,
) -> anyhow::Result<WorkflowRun> {
    let wait = state.engine.wait_for_run(run_id);
    tokio::pin!(wait);

    loop {
        tokio::select! {
            finished = &mut wait => {
                // Terminal events are published before the run status flips.
                while let Ok(event) = rx.try_recv() {
                    if event.run_id == run_id {
                        print_event(&event, json)?;
                    }
                }
                return Ok(finished?);
            }
            received = rx.recv() => match received {
                Ok(event) if event.run_id == run_id => print_event(&event, json)?,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event follower fell behind");
                }
                Err(RecvError::Closed) => return Ok((&mut wait).await?),
            }
        }
    }
}

fn print_event(event: &RunEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    let kind = event.event_type.as_str();
    let kind = match event.event_type {
        RunEventType::RunCompleted | RunEventType::StepCompleted => style(kind).green(),
        RunEventType::RunFailed | RunEventType::StepFailed => style(kind).red(),
        RunEventType::StepRetrying | RunEventType::StepSkipped | RunEventType::RunPaused => {
            style(kind).yellow()
        }
        RunEventType::RunCancelled => style(kind).magenta(),
        _ => style(kind).cyan(),
    };
    println!(
        "  {} {:<16} {}",
        style(event.timestamp.format("%H:%M:%S%.3f")).dim(),
        kind,
        event.step_id.as_deref().unwrap_or("")
    );
    Ok(())
}

fn print_run(run: &WorkflowRun) {
    println!();
    let status = match run.status {
        RunStatus::Completed => style(run.status.to_string()).green().bold(),
        RunStatus::Failed => style(run.status.to_string()).red().bold(),
        _ => style(run.status.to_string()).yellow().bold(),
    };
    println!(
        "  Run {} of {} {}",
        style(&run.id).dim(),
        style(&run.workflow_id).cyan(),
        status
    );
    println!();

    let mut results: Vec<_> = run.context.step_results.values().collect();
    results.sort_by_key(|r| r.started_at);

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status").fg(Color::Cyan),
            Cell::new("Attempts").fg(Color::Cyan),
            Cell::new("Duration").fg(Color::Cyan),
            Cell::new("Error").fg(Color::Cyan),
        ]);

    for result in results {
        let status_color = match result.status {
            StepStatus::Completed => Color::Green,
            StepStatus::Failed => Color::Red,
            StepStatus::Skipped => Color::Yellow,
            StepStatus::Pending | StepStatus::Running => Color::White,
        };
        table.add_row(vec![
            Cell::new(&result.step_id),
            Cell::new(result.status.to_string()).fg(status_color),
            Cell::new(result.attempts),
            Cell::new(
                result
                    .duration_ms()
                    .map(|ms| format!("{ms}ms"))
                    .unwrap_or_else(|| "-".into()),
            ),
            Cell::new(
                result
                    .error
                    .as_ref()
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .unwrap_or_default(),
            ),
        ]);
    }
    println!("{table}");

    if let Some(error) = &run.error {
        println!();
        println!("  {} {}: {}", style("✗").red(), error.code, error.message);
    }
    if let Some(output) = &run.output {
        println!();
        println!("  {}", style("Output").bold());
        match serde_json::to_string_pretty(output) {
            Ok(text) => {
                for line in text.lines() {
                    println!("  {line}");
                }
            }
            Err(_) => println!("  {output}"),
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::integration::IntegrationRegistry;
    use conductor_core::llm::LlmRegistry;
    use conductor_types::config::ConductorConfig;
    use serde_json::json;

    const FLOW: &str = r#"
id: cli-flow
name: CLI flow
steps:
  - id: pause
    name: Pause
    type: wait
    durationMs: 1
"#;

    #[test]
    fn test_parse_input_variants() {
        assert_eq!(parse_input(None).unwrap(), json!({}));
        assert_eq!(parse_input(Some(r#"{"a":1}"#)).unwrap(), json!({ "a": 1 }));
        assert!(parse_input(Some("[1,2]")).is_err());
        assert!(parse_input(Some("{oops")).is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        std::fs::write(&path, r#"{"ticket": 42}"#).unwrap();
        let arg = format!("@{}", path.display());
        assert_eq!(parse_input(Some(&arg)).unwrap(), json!({ "ticket": 42 }));
    }

    #[tokio::test]
    async fn test_run_draft_file_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("flow.yaml");
        std::fs::write(&file, FLOW).unwrap();

        let state = AppState::assemble(
            ConductorConfig::default(),
            dir.path().to_path_buf(),
            LlmRegistry::new(),
            IntegrationRegistry::new(),
        );
        let status = run_workflow(&state, &file, None, true, Some("cli-corr".into()), true)
            .await
            .unwrap();
        assert_eq!(status, RunStatus::Completed);
        assert_eq!(state.events.get_events_by_correlation_id("cli-corr", None).len(), 5);
    }
}
