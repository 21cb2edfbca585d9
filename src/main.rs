use anyhow::{anyhow, Context};
use clap::Parser;
use console::style;
use std::path::PathBuf;

use deployctl::config::{Config, Mode, Profile};
use deployctl::controller::{print_plan, ExecutionController};
use deployctl::errors::DeployError;
use deployctl::logger::DeployLogger;
use deployctl::recovery::{AutomatedPolicy, DecisionPrompt, InteractivePrompt};
use deployctl::stage::registry::default_registry;
use deployctl::stage::{stage_by_id, StageFilter, Target};

#[derive(Parser)]
#[command(name = "deployctl")]
#[command(
    version,
    about = "Deployment pipeline orchestrator - checkpointed, resumable stage execution"
)]
struct Cli {
    /// How stage failures are handled: prompt the operator or decide automatically
    #[arg(long, value_enum, default_value_t = Mode::Interactive)]
    mode: Mode,

    /// Deployment destination
    #[arg(long, value_enum, default_value_t = Target::Local)]
    target: Target,

    /// Training profile for the transformer stage
    #[arg(long, value_enum, default_value_t = Profile::Quick)]
    profile: Profile,

    /// Resume the active deployment from its checkpoints
    #[arg(long, conflicts_with = "clean")]
    resume: bool,

    /// Run a single stage by id
    #[arg(long)]
    stage: Option<u32>,

    /// Print the execution plan and estimates without running or writing anything
    #[arg(long)]
    dry_run: bool,

    /// Comma-separated stage ids to skip
    #[arg(long, value_delimiter = ',')]
    skip_stages: Vec<u32>,

    /// Re-run stages even when a completion checkpoint exists
    #[arg(long)]
    force: bool,

    #[arg(short, long)]
    verbose: bool,

    /// Skip the optional toxicity-training stage
    #[arg(long)]
    skip_toxicity: bool,

    /// Skip the optional UI-deployment stage
    #[arg(long)]
    skip_ui: bool,

    /// GCP project id, required when the target includes cloud
    #[arg(long)]
    cloud_project: Option<String>,

    #[arg(long, default_value = "us-central1-a")]
    cloud_zone: String,

    /// Discard the active run's checkpoints and state, then start fresh
    #[arg(long)]
    clean: bool,

    /// Pipeline root directory (defaults to the current directory)
    #[arg(long)]
    root_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("{} {}", style("error:").red().bold(), err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), DeployError> {
    if cli.target.includes_cloud() && cli.cloud_project.is_none() {
        return Err(DeployError::Other(anyhow!(
            "--cloud-project is required when --target includes cloud"
        )));
    }
    if let Some(id) = cli.stage {
        if stage_by_id(id).is_none() {
            return Err(DeployError::Other(anyhow!(
                "unknown stage id {} (valid ids are 0-10)",
                id
            )));
        }
    }
    for id in &cli.skip_stages {
        if stage_by_id(*id).is_none() {
            return Err(DeployError::Other(anyhow!(
                "--skip-stages names unknown stage id {}",
                id
            )));
        }
    }

    let root_dir = match cli.root_dir {
        Some(dir) => dir,
        None => std::env::current_dir()
            .context("Failed to determine current directory")
            .map_err(DeployError::Other)?,
    };
    let config = Config::new(
        root_dir,
        cli.mode,
        cli.target,
        cli.profile,
        cli.cloud_project,
        cli.cloud_zone,
        cli.verbose,
        cli.force,
        cli.dry_run,
    )
    .map_err(DeployError::Other)?;

    let filter = StageFilter {
        only_stage: cli.stage,
        skip_stages: cli.skip_stages,
        skip_toxicity: cli.skip_toxicity,
        skip_ui: cli.skip_ui,
    };

    if cli.dry_run {
        print_plan(&config, &filter);
        return Ok(());
    }

    // Fail fast on a bad resume before spending time on preflight probes.
    if cli.resume && config.active_run().is_none() {
        return Err(DeployError::NoResumableState);
    }

    if cli.clean {
        config.clear_active_run()?;
        println!(
            "{} Cleared active deployment state (historical runs preserved)",
            style("✓").green()
        );
    }

    let registry = default_registry(&config);
    let prompt: Box<dyn DecisionPrompt> = match config.mode {
        Mode::Interactive => Box::new(InteractivePrompt),
        Mode::Automated => Box::new(AutomatedPolicy),
    };
    let controller = ExecutionController::new(config.clone(), registry, prompt);

    let preflight_logger = DeployLogger::new(
        config.deployment_dir.join("preflight.log"),
        config.verbose,
    );
    // Preflight warnings are already logged by the validator; hard failures
    // stop us here before any state is written.
    controller.check_prerequisites(&preflight_logger).await?;

    let summary = controller.run(cli.resume, &filter).await?;
    println!(
        "{} {}: {}/{} stages completed{}",
        style("✓").green().bold(),
        summary.deployment_id,
        summary.completed,
        summary.total,
        if summary.skipped > 0 {
            format!(" ({} skipped)", summary.skipped)
        } else {
            String::new()
        }
    );
    Ok(())
}
