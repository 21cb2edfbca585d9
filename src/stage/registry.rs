//! Maps stage ids to their executor/validator pairs.
//!
//! The orchestrator treats executors as opaque: it knows how to run,
//! checkpoint, and recover a stage, never what the stage does. The default
//! registry wires up the pipeline's real commands; tests register stubs.

use crate::config::Config;
use crate::errors::StageError;
use crate::logger::DeployLogger;
use crate::stage::command::{CommandExecutor, CommandSpec, SmokeTestExecutor};
use crate::stage::validator::{ArtifactValidator, CommandProbeValidator, NoopValidator};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// Everything an executor may consult while running. Executors receive the
/// context per attempt, so a retry observes current settings.
pub struct StageContext<'a> {
    pub config: &'a Config,
    pub logger: &'a DeployLogger,
    /// Wall-clock limit for this attempt. Enforced by the executor's process
    /// plumbing, not by the orchestrator loop.
    pub timeout: Duration,
}

/// What a successful executor hands back for logging and the report.
#[derive(Debug, Default)]
pub struct StageOutput {
    /// One-line human summary, e.g. "3 commands completed".
    pub detail: String,
    /// Tail of captured process output, kept for the run log.
    pub captured: String,
}

#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError>;
}

/// Postcondition check run after a successful execute. A validator failure
/// fails the stage exactly like an execution failure.
#[async_trait]
pub trait StageValidator: Send + Sync {
    async fn validate(&self, ctx: &StageContext<'_>) -> Result<(), StageError>;
}

struct Entry {
    executor: Box<dyn StageExecutor>,
    validator: Box<dyn StageValidator>,
}

#[derive(Default)]
pub struct StageRegistry {
    entries: BTreeMap<u32, Entry>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        stage_id: u32,
        executor: Box<dyn StageExecutor>,
        validator: Box<dyn StageValidator>,
    ) {
        self.entries.insert(stage_id, Entry { executor, validator });
    }

    pub fn executor(&self, stage_id: u32) -> Option<&dyn StageExecutor> {
        self.entries.get(&stage_id).map(|e| e.executor.as_ref())
    }

    pub fn validator(&self, stage_id: u32) -> Option<&dyn StageValidator> {
        self.entries.get(&stage_id).map(|e| e.validator.as_ref())
    }

    pub fn contains(&self, stage_id: u32) -> bool {
        self.entries.contains_key(&stage_id)
    }
}

/// Build the production registry for the sentiment pipeline. Commands are
/// resolved against `config.root_dir` at execution time.
pub fn default_registry(config: &Config) -> StageRegistry {
    let mut registry = StageRegistry::new();

    registry.register(
        0,
        Box::new(CommandExecutor::new(vec![
            CommandSpec::new("python3", &["-m", "venv", "venv"]),
            CommandSpec::new("venv/bin/pip", &["install", "-r", "requirements.txt"]),
        ])),
        Box::new(ArtifactValidator::required(&["venv"])),
    );

    registry.register(
        1,
        Box::new(CommandExecutor::new(vec![CommandSpec::new(
            "python3",
            &["-m", "src.data.preprocess"],
        )])),
        Box::new(ArtifactValidator::required(&[
            "data/processed/train.csv",
            "data/processed/val.csv",
            "data/processed/test.csv",
        ])),
    );

    registry.register(
        2,
        Box::new(CommandExecutor::new(vec![CommandSpec::new(
            "python3",
            &["-m", "src.models.train_baselines"],
        )])),
        Box::new(ArtifactValidator::required(&[
            "models/baselines/logistic_regression.joblib",
            "models/baselines/linear_svm.joblib",
        ])),
    );

    registry.register(
        3,
        Box::new(CommandExecutor::new(vec![CommandSpec::new(
            "python3",
            &[
                "-m",
                "src.models.transformer_training",
                "--config",
                config.profile.transformer_config(),
            ],
        )])),
        Box::new(
            ArtifactValidator::required(&["models/transformer/config.json"]).any_of(&[
                "models/transformer/pytorch_model.bin",
                "models/transformer/model.safetensors",
            ]),
        ),
    );

    registry.register(
        4,
        Box::new(CommandExecutor::new(vec![CommandSpec::new(
            "python3",
            &["-m", "src.models.train_toxicity"],
        )])),
        Box::new(
            ArtifactValidator::required(&["models/toxicity/config.json"]).any_of(&[
                "models/toxicity/pytorch_model.bin",
                "models/toxicity/model.safetensors",
            ]),
        ),
    );

    registry.register(
        5,
        Box::new(SmokeTestExecutor::default()),
        Box::new(NoopValidator),
    );

    registry.register(
        6,
        Box::new(CommandExecutor::new(vec![CommandSpec::new(
            "docker-compose",
            &["-f", "docker-compose.fullstack.yml", "build"],
        )])),
        Box::new(CommandProbeValidator::new(
            "docker",
            &["images", "--format", "{{.Repository}}"],
            "sentiment",
        )),
    );

    registry.register(
        7,
        Box::new(CommandExecutor::new(vec![CommandSpec::new(
            "python3",
            &["-m", "pytest", "-v", "--tb=short"],
        )])),
        Box::new(NoopValidator),
    );

    // Cloud stages. The bucket is derived from the project id; the preflight
    // gcloud checks have already confirmed the project before these can run.
    let project = config.cloud_project.as_deref().unwrap_or_default();
    let bucket = format!("gs://{}-models", project);

    registry.register(
        8,
        Box::new(CommandExecutor::new(vec![
            CommandSpec::new(
                "gsutil",
                &[
                    "-m",
                    "rsync",
                    "-r",
                    "models/transformer",
                    &format!("{}/transformer", bucket),
                ],
            ),
            CommandSpec::new(
                "gsutil",
                &[
                    "-m",
                    "rsync",
                    "-r",
                    "models/toxicity",
                    &format!("{}/toxicity", bucket),
                ],
            ),
        ])),
        Box::new(NoopValidator),
    );

    registry.register(
        9,
        Box::new(
            CommandExecutor::new(vec![CommandSpec::new("bash", &["scripts/gcp-deploy.sh"])])
                .env("GCP_PROJECT", project)
                .env("GCP_ZONE", &config.cloud_zone),
        ),
        Box::new(NoopValidator),
    );

    registry.register(
        10,
        Box::new(
            CommandExecutor::new(vec![CommandSpec::new(
                "bash",
                &["scripts/gcp-deploy-ui.sh"],
            )])
            .env("GCP_PROJECT", project)
            .env("GCP_ZONE", &config.cloud_zone),
        ),
        Box::new(NoopValidator),
    );

    registry
}
