use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Mode;
use crate::stage::Target;

/// Current on-disk schema version for `state.json`.
pub const SCHEMA_VERSION: u32 = 1;

/// Outcome of one attempted stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Success,
    Failed,
    Skipped,
}

/// Metrics for one attempted stage. Overwritten on forced re-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageMetrics {
    pub name: String,
    pub duration_secs: f64,
    pub completed_at: DateTime<Utc>,
    pub status: StageStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageErrorRecord {
    pub stage_id: u32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// The single mutable aggregate describing overall run progress.
///
/// Mutated only by the execution controller and persisted after every
/// stage-transition event. Stage executors never see this value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentState {
    pub deployment_id: String,
    pub start_time: DateTime<Utc>,
    pub mode: Mode,
    pub target: Target,
    /// Most recently *attempted* stage, not necessarily completed.
    pub current_stage: Option<u32>,
    pub completed_stages: Vec<u32>,
    pub failed_stages: Vec<u32>,
    pub skipped_stages: Vec<u32>,
    pub stage_metrics: BTreeMap<u32, StageMetrics>,
    pub errors: Vec<StageErrorRecord>,
    pub warnings: Vec<String>,
    pub schema_version: u32,
    pub last_updated: DateTime<Utc>,
}

impl DeploymentState {
    pub fn new(deployment_id: String, mode: Mode, target: Target) -> Self {
        let now = Utc::now();
        Self {
            deployment_id,
            start_time: now,
            mode,
            target,
            current_stage: None,
            completed_stages: Vec::new(),
            failed_stages: Vec::new(),
            skipped_stages: Vec::new(),
            stage_metrics: BTreeMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            schema_version: SCHEMA_VERSION,
            last_updated: now,
        }
    }

    /// Add `stage_id` to the completed set (set semantics — no duplicates).
    pub fn mark_completed(&mut self, stage_id: u32) {
        if !self.completed_stages.contains(&stage_id) {
            self.completed_stages.push(stage_id);
        }
        self.failed_stages.retain(|id| *id != stage_id);
    }

    pub fn mark_failed(&mut self, stage_id: u32) {
        if !self.failed_stages.contains(&stage_id) {
            self.failed_stages.push(stage_id);
        }
    }

    pub fn mark_skipped(&mut self, stage_id: u32) {
        if !self.skipped_stages.contains(&stage_id) {
            self.skipped_stages.push(stage_id);
        }
    }

    pub fn record_metrics(&mut self, stage_id: u32, metrics: StageMetrics) {
        self.stage_metrics.insert(stage_id, metrics);
    }

    pub fn record_error(&mut self, stage_id: u32, message: String) {
        self.errors.push(StageErrorRecord {
            stage_id,
            message,
            timestamp: Utc::now(),
        });
    }

    pub fn record_warning(&mut self, message: String) {
        self.warnings.push(message);
    }

    pub fn total_duration_secs(&self) -> f64 {
        (Utc::now() - self.start_time).num_milliseconds() as f64 / 1000.0
    }
}

/// Crash-safe persistence for the state document.
///
/// Saves write to a temp file and atomically rename over the prior document,
/// so a kill at any instant leaves either the old state or the new one —
/// never a torn file.
pub struct StateStore {
    state_file: PathBuf,
}

impl StateStore {
    pub fn new(state_file: PathBuf) -> Self {
        Self { state_file }
    }

    pub fn save(&self, state: &mut DeploymentState) -> Result<()> {
        state.last_updated = Utc::now();

        if let Some(parent) = self.state_file.parent() {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        let tmp_path = self.state_file.with_extension("json.tmp");
        let json =
            serde_json::to_string_pretty(state).context("Failed to serialize deployment state")?;
        fs::write(&tmp_path, json).context("Failed to write state temp file")?;
        fs::rename(&tmp_path, &self.state_file).context("Failed to commit deployment state")?;
        Ok(())
    }

    /// Load the prior state document, if one exists.
    ///
    /// A schema-version mismatch appends a warning to the loaded state rather
    /// than failing — forward compatibility, not corruption tolerance: an
    /// unparsable document is still an error.
    pub fn load(&self) -> Result<Option<DeploymentState>> {
        if !self.state_file.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.state_file)
            .with_context(|| format!("Failed to read {}", self.state_file.display()))?;
        let mut state: DeploymentState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.state_file.display()))?;

        if state.schema_version != SCHEMA_VERSION {
            state.record_warning(format!(
                "state schema version {} differs from current {}",
                state.schema_version, SCHEMA_VERSION
            ));
        }
        Ok(Some(state))
    }

    pub fn path(&self) -> &Path {
        &self.state_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_state() -> DeploymentState {
        DeploymentState::new(
            "deploy-test-00000000".to_string(),
            Mode::Automated,
            Target::Local,
        )
    }

    fn success_metrics(name: &str) -> StageMetrics {
        StageMetrics {
            name: name.to_string(),
            duration_secs: 1.5,
            completed_at: Utc::now(),
            status: StageStatus::Success,
        }
    }

    #[test]
    fn load_returns_none_without_prior_state() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let mut state = make_state();
        state.current_stage = Some(2);
        state.mark_completed(0);
        state.mark_completed(1);
        state.record_metrics(0, success_metrics("Environment Setup"));
        store.save(&mut state).unwrap();

        let loaded = store.load().unwrap().expect("state must load");
        assert_eq!(loaded.deployment_id, "deploy-test-00000000");
        assert_eq!(loaded.completed_stages, vec![0, 1]);
        assert_eq!(loaded.current_stage, Some(2));
        assert_eq!(loaded.stage_metrics[&0].status, StageStatus::Success);
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        store.save(&mut make_state()).unwrap();
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn schema_drift_appends_warning_not_error() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let mut state = make_state();
        state.schema_version = 99;
        store.save(&mut state).unwrap();

        let loaded = store.load().unwrap().expect("state must load");
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].contains("99"));
    }

    #[test]
    fn corrupt_state_file_is_an_error_not_a_fresh_start() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        let store = StateStore::new(path);
        assert!(store.load().is_err());
    }

    #[test]
    fn mark_completed_is_idempotent_and_clears_failed() {
        let mut state = make_state();
        state.mark_failed(2);
        state.mark_completed(2);
        state.mark_completed(2);
        assert_eq!(state.completed_stages, vec![2]);
        assert!(state.failed_stages.is_empty());
    }

    #[test]
    fn completed_stages_grow_monotonically() {
        let mut state = make_state();
        state.mark_completed(0);
        let before = state.completed_stages.clone();
        state.mark_failed(1);
        state.mark_skipped(2);
        state.record_error(1, "boom".into());
        assert!(
            state.completed_stages.starts_with(&before),
            "completion set must only grow"
        );
    }

    #[test]
    fn forced_rerun_overwrites_metrics_entry() {
        let mut state = make_state();
        state.record_metrics(3, success_metrics("Transformer Training"));
        let rerun = StageMetrics {
            duration_secs: 9.0,
            ..success_metrics("Transformer Training")
        };
        state.record_metrics(3, rerun);
        assert_eq!(state.stage_metrics.len(), 1);
        assert!((state.stage_metrics[&3].duration_secs - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn errors_are_append_only() {
        let mut state = make_state();
        state.record_error(1, "first".into());
        state.record_error(1, "second".into());
        assert_eq!(state.errors.len(), 2);
        assert_eq!(state.errors[0].message, "first");
    }

    #[test]
    fn save_updates_last_updated() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let mut state = make_state();
        let before = state.last_updated;
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.save(&mut state).unwrap();
        assert!(state.last_updated > before);
    }
}
