//! Typed error hierarchy for the deployctl orchestrator.
//!
//! Two top-level enums cover the two failure scopes:
//! - `DeployError` — run-level failures (prerequisites, persistence, abort)
//! - `StageError` — a single stage attempt failing

use std::time::Duration;
use thiserror::Error;

/// Run-level errors that terminate the deployment.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Prerequisite checks failed:\n{}", .failures.join("\n"))]
    Prerequisites { failures: Vec<String> },

    #[error(
        "No resumable deployment found. Start a fresh run without --resume, \
         or check that .deployment/current still exists."
    )]
    NoResumableState,

    #[error("Failed to persist {what} at {}: {source}", .path.display())]
    StatePersistence {
        what: &'static str,
        path: std::path::PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Deployment aborted at stage {stage_id} ({stage_name})")]
    Aborted { stage_id: u32, stage_name: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from a single stage attempt.
///
/// `PostconditionFailed` is routed through recovery exactly like
/// `ExecutionFailed` — a successful exit code is not proof of correctness.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Failed to spawn `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "`{command}` exited with code {}\n{output_tail}",
        .exit_code.map_or_else(|| "unknown (killed by signal)".to_string(), |c| c.to_string())
    )]
    ExecutionFailed {
        command: String,
        /// `None` when the process was killed by a signal.
        exit_code: Option<i32>,
        output_tail: String,
    },

    #[error("Postcondition check failed: {detail}")]
    PostconditionFailed { detail: String },

    #[error("Stage timed out after {}s", .limit.as_secs())]
    TimedOut { limit: Duration },

    #[error("Stage interrupted by operator")]
    Interrupted,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StageError {
    /// True when the operator hit Ctrl-C — the controller aborts without
    /// consulting the recovery policy in that case.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, StageError::Interrupted)
    }
}
