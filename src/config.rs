use anyhow::{Context, Result};
use chrono::Utc;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::stage::Target;

/// Execution mode: whether stage failures prompt the operator or are
/// resolved deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Interactive,
    Automated,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Interactive => write!(f, "interactive"),
            Mode::Automated => write!(f, "automated"),
        }
    }
}

/// Training profile for the transformer stage. Selects which config file the
/// stage executor passes to the training module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Quick,
    Full,
    Cloud,
}

impl Profile {
    pub fn transformer_config(&self) -> &'static str {
        match self {
            Profile::Quick => "config/config_transformer_quick.yaml",
            Profile::Full => "config/config_transformer.yaml",
            Profile::Cloud => "config/config_transformer_cloud.yaml",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Profile::Quick => "quick deployment for testing (1-3 epochs)",
            Profile::Full => "full deployment for production (15 epochs)",
            Profile::Cloud => "cloud-optimized deployment (10 epochs)",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Quick => write!(f, "quick"),
            Profile::Full => write!(f, "full"),
            Profile::Cloud => write!(f, "cloud"),
        }
    }
}

/// Runtime configuration for a deployment run.
///
/// Bridges the CLI arguments with the durable-storage layout. All paths are
/// derived from `root_dir`; nothing outside `.deployment/` is ever written by
/// the orchestrator itself.
#[derive(Debug, Clone)]
pub struct Config {
    pub root_dir: PathBuf,
    pub deployment_dir: PathBuf,
    pub mode: Mode,
    pub target: Target,
    pub profile: Profile,
    pub cloud_project: Option<String>,
    pub cloud_zone: String,
    pub verbose: bool,
    pub force: bool,
    pub dry_run: bool,
}

impl Config {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        root_dir: PathBuf,
        mode: Mode,
        target: Target,
        profile: Profile,
        cloud_project: Option<String>,
        cloud_zone: String,
        verbose: bool,
        force: bool,
        dry_run: bool,
    ) -> Result<Self> {
        let root_dir = root_dir
            .canonicalize()
            .context("Failed to resolve root directory")?;
        let deployment_dir = root_dir.join(".deployment");

        Ok(Self {
            root_dir,
            deployment_dir,
            mode,
            target,
            profile,
            cloud_project,
            cloud_zone,
            verbose,
            force,
            dry_run,
        })
    }

    fn current_file(&self) -> PathBuf {
        self.deployment_dir.join("current")
    }

    /// The id of the active (resumable) run, if any.
    pub fn active_run(&self) -> Option<String> {
        let id = fs::read_to_string(self.current_file()).ok()?;
        let id = id.trim().to_string();
        if id.is_empty() { None } else { Some(id) }
    }

    /// Record `id` as the active run.
    pub fn set_active_run(&self, id: &str) -> Result<()> {
        fs::create_dir_all(&self.deployment_dir)
            .context("Failed to create .deployment directory")?;
        fs::write(self.current_file(), id).context("Failed to write active-run pointer")?;
        Ok(())
    }

    /// Discard the active run: its directory and the pointer. Historical runs
    /// are left untouched.
    pub fn clear_active_run(&self) -> Result<()> {
        if let Some(id) = self.active_run() {
            let run_dir = self.run_paths(&id).run_dir;
            if run_dir.exists() {
                fs::remove_dir_all(&run_dir).context("Failed to remove active run directory")?;
            }
        }
        let current = self.current_file();
        if current.exists() {
            fs::remove_file(&current).context("Failed to remove active-run pointer")?;
        }
        Ok(())
    }

    pub fn run_paths(&self, deployment_id: &str) -> RunPaths {
        RunPaths::new(&self.deployment_dir, deployment_id)
    }
}

/// Generate a fresh deployment id: timestamp plus a short uuid suffix so two
/// runs started within the same second cannot collide.
pub fn generate_deployment_id() -> String {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("deploy-{}-{}", stamp, &suffix[..8])
}

/// Durable-storage layout for one run, namespaced by deployment id.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub run_dir: PathBuf,
    pub state_file: PathBuf,
    pub checkpoints_dir: PathBuf,
    pub log_file: PathBuf,
    pub report_file: PathBuf,
    pub metrics_file: PathBuf,
}

impl RunPaths {
    pub fn new(deployment_dir: &Path, deployment_id: &str) -> Self {
        let run_dir = deployment_dir.join("runs").join(deployment_id);
        Self {
            state_file: run_dir.join("state.json"),
            checkpoints_dir: run_dir.join("checkpoints"),
            log_file: run_dir.join("deploy.log"),
            report_file: run_dir.join("report.md"),
            metrics_file: run_dir.join("metrics.json"),
            run_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.run_dir).context("Failed to create run directory")?;
        fs::create_dir_all(&self.checkpoints_dir)
            .context("Failed to create checkpoints directory")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Target;
    use tempfile::tempdir;

    fn make_config(dir: &Path) -> Config {
        Config::new(
            dir.to_path_buf(),
            Mode::Automated,
            Target::Local,
            Profile::Quick,
            None,
            "us-central1-a".to_string(),
            false,
            false,
            false,
        )
        .unwrap()
    }

    #[test]
    fn deployment_id_has_expected_shape() {
        let id = generate_deployment_id();
        assert!(id.starts_with("deploy-"), "unexpected id: {id}");
        // deploy-YYYYmmdd-HHMMSS-xxxxxxxx
        assert_eq!(id.split('-').count(), 4, "unexpected id shape: {id}");
    }

    #[test]
    fn deployment_ids_are_unique() {
        assert_ne!(generate_deployment_id(), generate_deployment_id());
    }

    #[test]
    fn active_run_round_trip() {
        let dir = tempdir().unwrap();
        let config = make_config(dir.path());
        assert!(config.active_run().is_none());

        config.set_active_run("deploy-20260830-120000-abcd1234").unwrap();
        assert_eq!(
            config.active_run().as_deref(),
            Some("deploy-20260830-120000-abcd1234")
        );
    }

    #[test]
    fn clear_active_run_removes_pointer_and_run_dir() {
        let dir = tempdir().unwrap();
        let config = make_config(dir.path());
        let id = "deploy-20260830-120000-abcd1234";
        config.set_active_run(id).unwrap();
        let paths = config.run_paths(id);
        paths.ensure_directories().unwrap();
        std::fs::write(&paths.state_file, "{}").unwrap();

        config.clear_active_run().unwrap();
        assert!(config.active_run().is_none());
        assert!(!paths.run_dir.exists());
    }

    #[test]
    fn clear_active_run_leaves_historical_runs() {
        let dir = tempdir().unwrap();
        let config = make_config(dir.path());
        let old = config.run_paths("deploy-20260101-000000-old00000");
        old.ensure_directories().unwrap();

        config.set_active_run("deploy-20260830-120000-abcd1234").unwrap();
        config.clear_active_run().unwrap();
        assert!(old.run_dir.exists(), "historical run must survive clean");
    }

    #[test]
    fn run_paths_are_namespaced_by_id() {
        let dir = tempdir().unwrap();
        let config = make_config(dir.path());
        let a = config.run_paths("deploy-a");
        let b = config.run_paths("deploy-b");
        assert_ne!(a.state_file, b.state_file);
        assert!(a.checkpoints_dir.starts_with(&a.run_dir));
    }

    #[test]
    fn profile_selects_transformer_config() {
        assert!(Profile::Quick.transformer_config().contains("quick"));
        assert!(Profile::Cloud.transformer_config().contains("cloud"));
        assert_eq!(
            Profile::Full.transformer_config(),
            "config/config_transformer.yaml"
        );
    }
}
