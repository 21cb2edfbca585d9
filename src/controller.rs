//! The execution controller: drives the selected stages in order, one at a
//! time, persisting progress after every transition.
//!
//! Ordering on the success path is deliberate: metrics, then the checkpoint,
//! then the state document. Checkpoints are the canonical completion record,
//! so a crash between checkpoint and state heals on the next run by folding
//! the checkpoint back into the state (see `reconcile_checkpoint`).

use crate::checkpoint::CheckpointStore;
use crate::config::{generate_deployment_id, Config, RunPaths};
use crate::errors::{DeployError, StageError};
use crate::logger::DeployLogger;
use crate::prereq::PrerequisiteValidator;
use crate::recovery::{DecisionPrompt, RecoveryAction, RecoveryState};
use crate::report;
use crate::stage::{select, Stage, StageContext, StageFilter, StageRegistry};
use crate::state::{DeploymentState, StageMetrics, StageStatus, StateStore};
use crate::ui::{format_duration, DeployUI};
use anyhow::anyhow;
use chrono::Utc;
use console::style;
use std::time::{Duration, Instant};

/// Execution timeout is derived from the catalog estimate with a floor, so
/// even a 10-second stage gets a meaningful grace window.
const TIMEOUT_MULTIPLIER: u64 = 4;
const TIMEOUT_FLOOR_SECS: u64 = 60;

fn stage_timeout(stage: &Stage) -> Duration {
    Duration::from_secs((stage.estimated_secs * TIMEOUT_MULTIPLIER).max(TIMEOUT_FLOOR_SECS))
}

/// What happened to one stage inside the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageOutcome {
    Completed,
    AlreadyDone,
    Skipped,
    Aborted,
}

/// Final accounting handed back to `main` for the exit message.
#[derive(Debug)]
pub struct RunSummary {
    pub deployment_id: String,
    pub completed: usize,
    pub skipped: usize,
    pub total: usize,
    pub duration_secs: f64,
}

pub struct ExecutionController {
    config: Config,
    registry: StageRegistry,
    prompt: Box<dyn DecisionPrompt>,
}

impl ExecutionController {
    pub fn new(config: Config, registry: StageRegistry, prompt: Box<dyn DecisionPrompt>) -> Self {
        Self {
            config,
            registry,
            prompt,
        }
    }

    /// Run preflight checks and fail the deployment if any hard check fails.
    /// Warnings are logged and returned but never block the run.
    pub async fn check_prerequisites(&self, logger: &DeployLogger) -> Result<Vec<String>, DeployError> {
        let validator = PrerequisiteValidator::new(&self.config);
        let report = validator.validate(logger).await;
        if report.passed() {
            Ok(report.warnings)
        } else {
            Err(DeployError::Prerequisites {
                failures: report.failure_lines(),
            })
        }
    }

    /// Execute the filtered plan, fresh or resumed.
    pub async fn run(&self, resume: bool, filter: &StageFilter) -> Result<RunSummary, DeployError> {
        let (mut state, paths) = self.prepare(resume)?;
        let state_store = StateStore::new(paths.state_file.clone());
        let checkpoints = CheckpointStore::new(&paths.checkpoints_dir, &state.deployment_id);
        let logger = DeployLogger::new(paths.log_file.clone(), self.config.verbose);

        let plan = select(self.config.target, filter);
        if plan.is_empty() {
            return Err(DeployError::Other(anyhow!(
                "no stages selected for target {}",
                self.config.target
            )));
        }

        let ui = DeployUI::new(plan.len() as u64);
        ui.print_banner(
            &state.deployment_id,
            &self.config.mode.to_string(),
            &self.config.target.to_string(),
            &self.config.profile.to_string(),
        );
        if resume {
            logger.info(&format!(
                "Resuming deployment {} ({} stage(s) already completed)",
                state.deployment_id,
                state.completed_stages.len()
            ));
        } else {
            logger.info(&format!("Starting deployment {}", state.deployment_id));
        }

        let run_started = Instant::now();
        let mut completed = 0usize;
        let mut skipped = 0usize;
        let mut aborted_at: Option<&'static Stage> = None;

        for &stage in &plan {
            let outcome = self
                .execute_stage(stage, &mut state, &state_store, &checkpoints, &ui, &logger)
                .await?;
            match outcome {
                StageOutcome::Completed | StageOutcome::AlreadyDone => completed += 1,
                StageOutcome::Skipped => skipped += 1,
                StageOutcome::Aborted => {
                    aborted_at = Some(stage);
                    break;
                }
            }
        }

        let duration_secs = run_started.elapsed().as_secs_f64();
        let succeeded = aborted_at.is_none();
        ui.finish(succeeded, completed, plan.len(), state.total_duration_secs());

        report::write_report(&paths, &state)?;
        report::write_metrics(&paths, &state)?;
        logger.info(&format!(
            "Report written to {}",
            paths.report_file.display()
        ));

        if let Some(stage) = aborted_at {
            logger.error(&format!(
                "Deployment aborted at stage {} ({})",
                stage.id, stage.name
            ));
            return Err(DeployError::Aborted {
                stage_id: stage.id,
                stage_name: stage.name.to_string(),
            });
        }

        logger.success(&format!(
            "Deployment {} finished: {}/{} stages in {}",
            state.deployment_id,
            completed,
            plan.len(),
            format_duration(duration_secs as u64)
        ));

        Ok(RunSummary {
            deployment_id: state.deployment_id.clone(),
            completed,
            skipped,
            total: plan.len(),
            duration_secs,
        })
    }

    /// Persist the state document, mapping failures to the typed
    /// persistence error: the run must halt rather than continue with an
    /// un-persisted record, or the resumability contract is broken.
    fn persist_state(
        &self,
        store: &StateStore,
        state: &mut DeploymentState,
    ) -> Result<(), DeployError> {
        store.save(state).map_err(|e| DeployError::StatePersistence {
            what: "deployment state",
            path: store.path().to_path_buf(),
            source: e.into(),
        })
    }

    /// Resolve the run identity and load or create its state document.
    ///
    /// `--resume` without a resumable run is a hard error, never a silent
    /// fresh start: resuming is an explicit claim that prior progress exists.
    fn prepare(&self, resume: bool) -> Result<(DeploymentState, RunPaths), DeployError> {
        if resume {
            let id = self
                .config
                .active_run()
                .ok_or(DeployError::NoResumableState)?;
            let paths = self.config.run_paths(&id);
            let state = StateStore::new(paths.state_file.clone())
                .load()?
                .ok_or(DeployError::NoResumableState)?;
            paths.ensure_directories()?;
            Ok((state, paths))
        } else {
            let id = generate_deployment_id();
            let paths = self.config.run_paths(&id);
            paths.ensure_directories()?;
            self.config.set_active_run(&id)?;
            let state = DeploymentState::new(id, self.config.mode, self.config.target);
            Ok((state, paths))
        }
    }

    async fn execute_stage(
        &self,
        stage: &'static Stage,
        state: &mut DeploymentState,
        state_store: &StateStore,
        checkpoints: &CheckpointStore,
        ui: &DeployUI,
        logger: &DeployLogger,
    ) -> Result<StageOutcome, DeployError> {
        if checkpoints.exists(stage.id) && !self.config.force {
            self.reconcile_checkpoint(stage, state, state_store, checkpoints)?;
            ui.stage_already_done(stage.id, stage.name);
            logger.info(&format!(
                "Stage {} ({}) satisfied by checkpoint",
                stage.id, stage.name
            ));
            return Ok(StageOutcome::AlreadyDone);
        }

        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let mut recovery = RecoveryState::Running;
            logger.debug(&format!(
                "stage {} recovery state: {:?}",
                stage.id, recovery
            ));

            // Persist the attempt marker first so a crash mid-stage leaves a
            // state document pointing at the interrupted stage.
            state.current_stage = Some(stage.id);
            self.persist_state(state_store, state)?;

            ui.print_stage_header(stage.id, stage.name, stage.estimated_secs);
            ui.start_stage(stage.id, stage.name);
            logger.info(&format!(
                "Stage {} ({}) attempt {} starting",
                stage.id, stage.name, attempt
            ));

            let started = Instant::now();
            let result = self.run_attempt(stage, ui, logger).await;
            let elapsed = started.elapsed().as_secs_f64();

            match result {
                Ok(detail) => {
                    state.record_metrics(
                        stage.id,
                        StageMetrics {
                            name: stage.name.to_string(),
                            duration_secs: elapsed,
                            completed_at: Utc::now(),
                            status: StageStatus::Success,
                        },
                    );
                    checkpoints.save(stage.id, stage.name)?;
                    state.mark_completed(stage.id);
                    self.persist_state(state_store, state)?;

                    ui.stage_complete(stage.id, stage.name, elapsed);
                    logger.success(&format!(
                        "✓ Stage {} ({}) complete: {}",
                        stage.id, stage.name, detail
                    ));
                    return Ok(StageOutcome::Completed);
                }
                Err(err) => {
                    state.record_metrics(
                        stage.id,
                        StageMetrics {
                            name: stage.name.to_string(),
                            duration_secs: elapsed,
                            completed_at: Utc::now(),
                            status: StageStatus::Failed,
                        },
                    );
                    state.mark_failed(stage.id);
                    state.record_error(stage.id, err.to_string());
                    self.persist_state(state_store, state)?;

                    ui.stage_failed(stage.id, stage.name, &err.to_string());
                    logger.error(&format!(
                        "✗ Stage {} ({}) failed after {:.1}s: {}",
                        stage.id, stage.name, elapsed, err
                    ));

                    // Ctrl-C skips the decision prompt entirely.
                    if err.is_interrupt() {
                        return Ok(StageOutcome::Aborted);
                    }

                    recovery = RecoveryState::AwaitingDecision;
                    logger.debug(&format!(
                        "stage {} recovery state: {:?}",
                        stage.id, recovery
                    ));
                    let action = self
                        .prompt
                        .decide(stage, &err, attempt)
                        .map_err(DeployError::Other)?;
                    recovery = match action {
                        RecoveryAction::Retry => RecoveryState::Retrying,
                        RecoveryAction::Skip => RecoveryState::Skipped,
                        RecoveryAction::Abort => RecoveryState::Aborted,
                    };
                    logger.debug(&format!(
                        "stage {} recovery state: {:?} ({})",
                        stage.id, recovery, action
                    ));

                    match action {
                        RecoveryAction::Retry => {
                            logger.info(&format!(
                                "Retrying stage {} (attempt {} next)",
                                stage.id,
                                attempt + 1
                            ));
                        }
                        RecoveryAction::Skip => {
                            state.mark_skipped(stage.id);
                            if let Some(metrics) = state.stage_metrics.get_mut(&stage.id) {
                                metrics.status = StageStatus::Skipped;
                            }
                            state.record_warning(format!(
                                "stage {} ({}) skipped after failure",
                                stage.id, stage.name
                            ));
                            self.persist_state(state_store, state)?;
                            ui.stage_skipped(stage.id, stage.name, "operator/policy decision");
                            logger.warning(&format!(
                                "⚠ Stage {} ({}) skipped, continuing",
                                stage.id, stage.name
                            ));
                            return Ok(StageOutcome::Skipped);
                        }
                        RecoveryAction::Abort => {
                            self.persist_state(state_store, state)?;
                            return Ok(StageOutcome::Aborted);
                        }
                    }
                }
            }
        }
    }

    /// Execute one attempt: executor first, then the postcondition validator.
    /// A spinner-refresh ticker runs alongside the executor.
    async fn run_attempt(
        &self,
        stage: &Stage,
        ui: &DeployUI,
        logger: &DeployLogger,
    ) -> Result<String, StageError> {
        let executor = self
            .registry
            .executor(stage.id)
            .ok_or_else(|| StageError::Other(anyhow!("no executor registered for stage {}", stage.id)))?;
        let validator = self
            .registry
            .validator(stage.id)
            .ok_or_else(|| StageError::Other(anyhow!("no validator registered for stage {}", stage.id)))?;

        let ctx = StageContext {
            config: &self.config,
            logger,
            timeout: stage_timeout(stage),
        };

        let started = Instant::now();
        let exec_fut = executor.execute(&ctx);
        tokio::pin!(exec_fut);
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let output = loop {
            tokio::select! {
                result = &mut exec_fut => break result?,
                _ = ticker.tick() => {
                    ui.update_elapsed(stage.id, stage.name, started.elapsed());
                }
            }
        };

        validator.validate(&ctx).await?;
        Ok(output.detail)
    }

    /// Fold a checkpoint the state document does not know about back into it.
    /// Happens when a crash landed between the checkpoint write and the state
    /// write; the checkpoint wins because it is the canonical record.
    fn reconcile_checkpoint(
        &self,
        stage: &Stage,
        state: &mut DeploymentState,
        state_store: &StateStore,
        checkpoints: &CheckpointStore,
    ) -> Result<(), DeployError> {
        if state.completed_stages.contains(&stage.id) {
            return Ok(());
        }
        let record = checkpoints.load(stage.id)?;
        state.mark_completed(stage.id);
        if !state.stage_metrics.contains_key(&stage.id) {
            state.record_metrics(
                stage.id,
                StageMetrics {
                    name: stage.name.to_string(),
                    // Attempt duration was lost with the crash.
                    duration_secs: 0.0,
                    completed_at: record.map(|r| r.completed_at).unwrap_or_else(Utc::now),
                    status: StageStatus::Success,
                },
            );
        }
        self.persist_state(state_store, state)?;
        Ok(())
    }
}

/// Print the execution plan without touching the filesystem. `--dry-run`
/// promises zero writes, so this goes straight to stdout and never opens the
/// log or the state store.
pub fn print_plan(config: &Config, filter: &StageFilter) {
    let plan = select(config.target, filter);
    println!(
        "{} Dry run: {} stage(s) for target {} (profile {})",
        style("▶").green().bold(),
        plan.len(),
        config.target,
        config.profile
    );
    println!();
    let mut cumulative = 0u64;
    for stage in &plan {
        cumulative += stage.estimated_secs;
        println!(
            "  {:>2}. {:<22} ~{:<8} (cumulative {})",
            stage.id,
            stage.name,
            format_duration(stage.estimated_secs),
            format_duration(cumulative)
        );
    }
    println!();
    println!(
        "Estimated total: {}. Nothing was executed or written.",
        format_duration(cumulative)
    );
}
