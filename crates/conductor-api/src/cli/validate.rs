//! `conductor validate`: structural checks on a workflow file.

use std::path::Path;

use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use conductor_core::workflow::definition::load_workflow_file;
use conductor_types::workflow::Workflow;
use console::style;
use serde_json::json;

/// Returns whether the file is valid. Problems are reported on stdout, not as
/// errors, so `--json` output stays machine-readable.
pub fn validate_file(file: &Path, json: bool) -> anyhow::Result<bool> {
    match load_workflow_file(file) {
        Ok(workflow) => {
            if json {
                let report = json!({
                    "valid": true,
                    "file": file.display().to_string(),
                    "workflowId": workflow.id,
                    "version": workflow.version,
                    "steps": workflow.steps.len(),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_summary(&workflow);
            }
            Ok(true)
        }
        Err(err) => {
            if json {
                let report = json!({
                    "valid": false,
                    "file": file.display().to_string(),
                    "error": err.to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!();
                println!(
                    "  {} {} is not a valid workflow",
                    style("✗").red().bold(),
                    style(file.display()).cyan()
                );
                println!("    {err}");
                println!();
            }
            Ok(false)
        }
    }
}

fn print_summary(workflow: &Workflow) {
    println!();
    println!(
        "  {} {} v{} ({})",
        style("✓").green().bold(),
        style(&workflow.name).cyan().bold(),
        workflow.version,
        workflow.status
    );
    println!();

    let mut steps: Vec<_> = workflow.steps.iter().collect();
    steps.sort_by_key(|s| s.position);

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Type").fg(Color::Cyan),
            Cell::new("Next").fg(Color::Cyan),
            Cell::new("On error").fg(Color::Cyan),
        ]);
    for step in steps {
        table.add_row(vec![
            Cell::new(&step.id),
            Cell::new(step.step_type().as_str()),
            Cell::new(step.next_step_id.as_deref().unwrap_or("-")),
            Cell::new(
                step.on_error
                    .as_ref()
                    .map(|h| h.strategy.to_string())
                    .unwrap_or_else(|| "fail".into()),
            ),
        ]);
    }
    println!("{table}");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.yaml");
        std::fs::write(
            &good,
            "id: ok\nname: Ok\nsteps:\n  - id: a\n    name: A\n    type: wait\n    durationMs: 5\n",
        )
        .unwrap();
        let bad = dir.path().join("bad.yaml");
        std::fs::write(
            &bad,
            "id: bad\nname: Bad\nsteps:\n  - id: a\n    name: A\n    type: wait\n    durationMs: 5\n    nextStepId: z\n",
        )
        .unwrap();

        assert!(validate_file(&good, true).unwrap());
        assert!(!validate_file(&bad, true).unwrap());
        assert!(!validate_file(&dir.path().join("missing.yaml"), false).unwrap());
    }

    #[test]
    fn test_demo_workflow_is_valid() {
        let demo = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/support-triage.yaml");
        assert!(validate_file(&demo, true).unwrap());
    }
}
