//! Failure recovery: the per-stage decision loop and the policies behind it.
//!
//! A failed stage lands in `AwaitingDecision` and the active policy produces
//! one of three actions. Interactive mode defers to the operator through a
//! terminal prompt; automated mode is deterministic and never blocks on
//! input, so unattended runs always make progress or stop cleanly.

use crate::errors::StageError;
use crate::stage::Stage;
use anyhow::Result;
use console::style;
use dialoguer::{theme::ColorfulTheme, Select};
use std::fmt;

/// Lifecycle of a stage attempt inside the recovery loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Running,
    AwaitingDecision,
    Retrying,
    Skipped,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Retry,
    Skip,
    Abort,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryAction::Retry => write!(f, "retry"),
            RecoveryAction::Skip => write!(f, "skip"),
            RecoveryAction::Abort => write!(f, "abort"),
        }
    }
}

/// Source of recovery decisions. Production uses [`InteractivePrompt`];
/// tests script the sequence of actions instead.
pub trait DecisionPrompt: Send + Sync {
    fn decide(&self, stage: &Stage, error: &StageError, attempt: u32) -> Result<RecoveryAction>;
}

/// Terminal prompt backed by `dialoguer`. Interrupting the prompt (Ctrl-C,
/// closed stdin) is treated as abort rather than an error.
pub struct InteractivePrompt;

impl DecisionPrompt for InteractivePrompt {
    fn decide(&self, stage: &Stage, error: &StageError, attempt: u32) -> Result<RecoveryAction> {
        println!();
        println!(
            "{} Stage {} ({}) failed on attempt {}: {}",
            style("✗").red().bold(),
            style(stage.id).yellow(),
            stage.name,
            attempt,
            error
        );

        let choices = &[
            "Retry this stage",
            "Skip this stage and continue",
            "Abort the deployment",
        ];
        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("How do you want to proceed?")
            .items(choices)
            .default(0)
            .interact_opt()?;

        Ok(match selection {
            Some(0) => RecoveryAction::Retry,
            Some(1) => RecoveryAction::Skip,
            _ => RecoveryAction::Abort,
        })
    }
}

/// Deterministic policy for unattended runs: optional stages are skipped
/// with a warning, required stages abort the deployment. Never retries and
/// never waits for input.
pub struct AutomatedPolicy;

impl DecisionPrompt for AutomatedPolicy {
    fn decide(&self, stage: &Stage, _error: &StageError, _attempt: u32) -> Result<RecoveryAction> {
        if stage.optional {
            Ok(RecoveryAction::Skip)
        } else {
            Ok(RecoveryAction::Abort)
        }
    }
}
