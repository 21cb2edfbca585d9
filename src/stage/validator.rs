//! Postcondition validators: artifact presence and command probes.

use crate::errors::StageError;
use crate::stage::registry::{StageContext, StageValidator};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Checks that expected artifacts exist under the pipeline root after a
/// stage reports success. `required` paths must all exist; each `any_of`
/// group is satisfied by any one of its members (model weights ship as
/// either `pytorch_model.bin` or `model.safetensors` depending on the
/// library version).
pub struct ArtifactValidator {
    required: Vec<PathBuf>,
    any_of_groups: Vec<Vec<PathBuf>>,
}

impl ArtifactValidator {
    pub fn required(paths: &[&str]) -> Self {
        Self {
            required: paths.iter().map(PathBuf::from).collect(),
            any_of_groups: Vec::new(),
        }
    }

    pub fn any_of(mut self, group: &[&str]) -> Self {
        self.any_of_groups
            .push(group.iter().map(PathBuf::from).collect());
        self
    }
}

#[async_trait]
impl StageValidator for ArtifactValidator {
    async fn validate(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
        let mut missing = Vec::new();

        for path in &self.required {
            if !ctx.config.root_dir.join(path).exists() {
                missing.push(path.display().to_string());
            }
        }

        for group in &self.any_of_groups {
            let satisfied = group.iter().any(|p| ctx.config.root_dir.join(p).exists());
            if !satisfied {
                let alternatives: Vec<String> =
                    group.iter().map(|p| p.display().to_string()).collect();
                missing.push(format!("one of [{}]", alternatives.join(", ")));
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(StageError::PostconditionFailed {
                detail: format!("missing artifacts: {}", missing.join("; ")),
            })
        }
    }
}

/// Runs a probe command and requires its stdout to contain a marker string.
/// Used after the container build to confirm the images actually landed.
pub struct CommandProbeValidator {
    program: String,
    args: Vec<String>,
    expect: String,
}

impl CommandProbeValidator {
    pub fn new(program: &str, args: &[&str], expect: &str) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            expect: expect.to_string(),
        }
    }
}

#[async_trait]
impl StageValidator for CommandProbeValidator {
    async fn validate(&self, ctx: &StageContext<'_>) -> Result<(), StageError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&ctx.config.root_dir)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|source| StageError::SpawnFailed {
                command: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(StageError::PostconditionFailed {
                detail: format!("probe `{}` exited non-zero", self.program),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains(&self.expect) {
            Ok(())
        } else {
            Err(StageError::PostconditionFailed {
                detail: format!(
                    "probe `{}` output does not mention `{}`",
                    self.program, self.expect
                ),
            })
        }
    }
}

/// For stages whose executor already proves the postcondition (smoke test,
/// pytest run, remote deploy scripts with their own verification).
pub struct NoopValidator;

#[async_trait]
impl StageValidator for NoopValidator {
    async fn validate(&self, _ctx: &StageContext<'_>) -> Result<(), StageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Mode, Profile};
    use crate::logger::DeployLogger;
    use crate::stage::Target;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn make_ctx(dir: &Path) -> (Config, DeployLogger) {
        let config = Config::new(
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
        .unwrap();
        let logger = DeployLogger::new(dir.join("deploy.log"), false);
        (config, logger)
    }

    #[tokio::test]
    async fn artifact_validator_passes_when_everything_exists() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("models/transformer")).unwrap();
        fs::write(dir.path().join("models/transformer/config.json"), "{}").unwrap();
        fs::write(dir.path().join("models/transformer/model.safetensors"), "w").unwrap();

        let (config, logger) = make_ctx(dir.path());
        let ctx = StageContext {
            config: &config,
            logger: &logger,
            timeout: Duration::from_secs(60),
        };

        let validator = ArtifactValidator::required(&["models/transformer/config.json"]).any_of(&[
            "models/transformer/pytorch_model.bin",
            "models/transformer/model.safetensors",
        ]);
        assert!(validator.validate(&ctx).await.is_ok());
    }

    #[tokio::test]
    async fn artifact_validator_names_missing_paths() {
        let dir = tempdir().unwrap();
        let (config, logger) = make_ctx(dir.path());
        let ctx = StageContext {
            config: &config,
            logger: &logger,
            timeout: Duration::from_secs(60),
        };

        let validator = ArtifactValidator::required(&["data/processed/train.csv"]);
        match validator.validate(&ctx).await {
            Err(StageError::PostconditionFailed { detail }) => {
                assert!(detail.contains("data/processed/train.csv"));
            }
            other => panic!("expected PostconditionFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn any_of_group_fails_only_when_no_alternative_exists() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("models/toxicity")).unwrap();
        fs::write(dir.path().join("models/toxicity/pytorch_model.bin"), "w").unwrap();

        let (config, logger) = make_ctx(dir.path());
        let ctx = StageContext {
            config: &config,
            logger: &logger,
            timeout: Duration::from_secs(60),
        };

        let satisfied = ArtifactValidator::required(&[]).any_of(&[
            "models/toxicity/pytorch_model.bin",
            "models/toxicity/model.safetensors",
        ]);
        assert!(satisfied.validate(&ctx).await.is_ok());

        let unsatisfied = ArtifactValidator::required(&[])
            .any_of(&["models/other/a.bin", "models/other/b.safetensors"]);
        match unsatisfied.validate(&ctx).await {
            Err(StageError::PostconditionFailed { detail }) => {
                assert!(detail.contains("one of"));
            }
            other => panic!("expected PostconditionFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn command_probe_matches_marker_in_stdout() {
        let dir = tempdir().unwrap();
        let (config, logger) = make_ctx(dir.path());
        let ctx = StageContext {
            config: &config,
            logger: &logger,
            timeout: Duration::from_secs(60),
        };

        let hit = CommandProbeValidator::new("echo", &["sentiment-api latest"], "sentiment");
        assert!(hit.validate(&ctx).await.is_ok());

        let miss = CommandProbeValidator::new("echo", &["nothing here"], "sentiment");
        assert!(miss.validate(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn noop_validator_always_passes() {
        let dir = tempdir().unwrap();
        let (config, logger) = make_ctx(dir.path());
        let ctx = StageContext {
            config: &config,
            logger: &logger,
            timeout: Duration::from_secs(60),
        };
        assert!(NoopValidator.validate(&ctx).await.is_ok());
    }
}
