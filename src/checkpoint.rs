use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Durable marker that a stage completed successfully under a deployment id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub stage_id: u32,
    pub stage_name: String,
    pub completed_at: DateTime<Utc>,
    pub deployment_id: String,
}

/// Per-stage completion markers, one JSON file per completed stage.
///
/// Checkpoints are the canonical "already done" source: even if the state
/// document is lost, the checkpoint files alone determine which stages do not
/// need to re-run. Writes go through a temp file and an atomic rename so a
/// kill mid-write can never leave a record that `exists()` reports present
/// but `save()` left unreadable.
pub struct CheckpointStore {
    checkpoints_dir: PathBuf,
    deployment_id: String,
}

impl CheckpointStore {
    pub fn new(checkpoints_dir: &Path, deployment_id: &str) -> Self {
        Self {
            checkpoints_dir: checkpoints_dir.to_path_buf(),
            deployment_id: deployment_id.to_string(),
        }
    }

    fn record_path(&self, stage_id: u32) -> PathBuf {
        self.checkpoints_dir.join(format!("stage{}.json", stage_id))
    }

    pub fn exists(&self, stage_id: u32) -> bool {
        self.record_path(stage_id).exists()
    }

    pub fn save(&self, stage_id: u32, stage_name: &str) -> Result<()> {
        let record = CheckpointRecord {
            stage_id,
            stage_name: stage_name.to_string(),
            completed_at: Utc::now(),
            deployment_id: self.deployment_id.clone(),
        };

        fs::create_dir_all(&self.checkpoints_dir)
            .context("Failed to create checkpoints directory")?;

        let final_path = self.record_path(stage_id);
        let tmp_path = final_path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&record)
            .context("Failed to serialize checkpoint record")?;
        fs::write(&tmp_path, json).context("Failed to write checkpoint temp file")?;
        fs::rename(&tmp_path, &final_path).context("Failed to commit checkpoint record")?;
        Ok(())
    }

    pub fn load(&self, stage_id: u32) -> Result<Option<CheckpointRecord>> {
        let path = self.record_path(stage_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).context("Failed to read checkpoint record")?;
        let record = serde_json::from_str(&content).context("Failed to parse checkpoint record")?;
        Ok(Some(record))
    }

    /// Remove every record in this store's scope. Used by explicit `--clean`.
    pub fn clear_all(&self) -> Result<()> {
        if self.checkpoints_dir.exists() {
            fs::remove_dir_all(&self.checkpoints_dir)
                .context("Failed to remove checkpoints directory")?;
        }
        fs::create_dir_all(&self.checkpoints_dir)
            .context("Failed to recreate checkpoints directory")?;
        Ok(())
    }
}
