//! End-of-run artifacts: the human-readable markdown report and the
//! machine-readable metrics export. Both are derived views over the state
//! document and are regenerated wholesale on every run completion.

use crate::config::RunPaths;
use crate::state::{DeploymentState, StageMetrics, StageStatus};
use crate::ui::format_duration;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;

#[derive(Debug, Serialize)]
struct MetricsDocument<'a> {
    deployment_id: &'a str,
    start_time: DateTime<Utc>,
    generated_at: DateTime<Utc>,
    total_duration_secs: f64,
    completed_stages: &'a [u32],
    failed_stages: &'a [u32],
    skipped_stages: &'a [u32],
    stages: &'a BTreeMap<u32, StageMetrics>,
}

pub fn write_metrics(paths: &RunPaths, state: &DeploymentState) -> Result<()> {
    let doc = MetricsDocument {
        deployment_id: &state.deployment_id,
        start_time: state.start_time,
        generated_at: Utc::now(),
        total_duration_secs: state.total_duration_secs(),
        completed_stages: &state.completed_stages,
        failed_stages: &state.failed_stages,
        skipped_stages: &state.skipped_stages,
        stages: &state.stage_metrics,
    };
    let json = serde_json::to_string_pretty(&doc).context("Failed to serialize metrics")?;
    fs::write(&paths.metrics_file, json)
        .with_context(|| format!("Failed to write {}", paths.metrics_file.display()))?;
    Ok(())
}

pub fn write_report(paths: &RunPaths, state: &DeploymentState) -> Result<()> {
    let report = render_report(state);
    fs::write(&paths.report_file, report)
        .with_context(|| format!("Failed to write {}", paths.report_file.display()))?;
    Ok(())
}

fn render_report(state: &DeploymentState) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail; unwraps below never fire.
    writeln!(out, "# Deployment Report").unwrap();
    writeln!(out).unwrap();
    writeln!(out, "- **Deployment:** {}", state.deployment_id).unwrap();
    writeln!(out, "- **Mode:** {}", state.mode).unwrap();
    writeln!(out, "- **Target:** {}", state.target).unwrap();
    writeln!(
        out,
        "- **Started:** {}",
        state.start_time.format("%Y-%m-%d %H:%M:%S UTC")
    )
    .unwrap();
    writeln!(
        out,
        "- **Total duration:** {}",
        format_duration(state.total_duration_secs() as u64)
    )
    .unwrap();
    writeln!(
        out,
        "- **Stages:** {} completed, {} failed, {} skipped",
        state.completed_stages.len(),
        state.failed_stages.len(),
        state.skipped_stages.len()
    )
    .unwrap();
    writeln!(out).unwrap();

    writeln!(out, "## Stage results").unwrap();
    writeln!(out).unwrap();
    writeln!(out, "| Stage | Name | Status | Duration |").unwrap();
    writeln!(out, "|-------|------|--------|----------|").unwrap();
    for (stage_id, metrics) in &state.stage_metrics {
        let status = match metrics.status {
            StageStatus::Success => "✓ success",
            StageStatus::Failed => "✗ failed",
            StageStatus::Skipped => "– skipped",
        };
        writeln!(
            out,
            "| {} | {} | {} | {} |",
            stage_id,
            metrics.name,
            status,
            format_duration(metrics.duration_secs as u64)
        )
        .unwrap();
    }
    writeln!(out).unwrap();

    if !state.errors.is_empty() {
        writeln!(out, "## Errors").unwrap();
        writeln!(out).unwrap();
        for error in &state.errors {
            writeln!(
                out,
                "- stage {} at {}: {}",
                error.stage_id,
                error.timestamp.format("%H:%M:%S"),
                error.message
            )
            .unwrap();
        }
        writeln!(out).unwrap();
    }

    if !state.warnings.is_empty() {
        writeln!(out, "## Warnings").unwrap();
        writeln!(out).unwrap();
        for warning in &state.warnings {
            writeln!(out, "- {}", warning).unwrap();
        }
        writeln!(out).unwrap();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Mode, RunPaths};
    use crate::stage::Target;
    use crate::state::StageMetrics;
    use tempfile::tempdir;

    fn sample_state() -> DeploymentState {
        let mut state = DeploymentState::new(
            "deploy-20260830-120000-abcd1234".to_string(),
            Mode::Automated,
            Target::Local,
        );
        state.mark_completed(0);
        state.record_metrics(
            0,
            StageMetrics {
                name: "Environment Setup".to_string(),
                duration_secs: 42.0,
                completed_at: Utc::now(),
                status: StageStatus::Success,
            },
        );
        state.mark_skipped(4);
        state.record_metrics(
            4,
            StageMetrics {
                name: "Toxicity Training".to_string(),
                duration_secs: 0.0,
                completed_at: Utc::now(),
                status: StageStatus::Skipped,
            },
        );
        state.record_error(1, "preprocessing crashed".to_string());
        state.record_warning("Low disk space: 4.2GB free, recommend 10GB+".to_string());
        state
    }

    #[test]
    fn report_lists_stages_errors_and_warnings() {
        let state = sample_state();
        let report = render_report(&state);
        assert!(report.contains("deploy-20260830-120000-abcd1234"));
        assert!(report.contains("Environment Setup"));
        assert!(report.contains("✓ success"));
        assert!(report.contains("– skipped"));
        assert!(report.contains("preprocessing crashed"));
        assert!(report.contains("Low disk space"));
    }

    #[test]
    fn report_and_metrics_land_in_run_paths() {
        let dir = tempdir().unwrap();
        let paths = RunPaths::new(dir.path(), "deploy-test");
        paths.ensure_directories().unwrap();
        let state = sample_state();

        write_report(&paths, &state).unwrap();
        write_metrics(&paths, &state).unwrap();

        assert!(paths.report_file.exists());
        let metrics: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.metrics_file).unwrap()).unwrap();
        assert_eq!(
            metrics["deployment_id"],
            "deploy-20260830-120000-abcd1234"
        );
        assert_eq!(metrics["completed_stages"][0], 0);
        assert!(metrics["stages"]["0"]["duration_secs"].as_f64().unwrap() > 41.0);
    }
}
