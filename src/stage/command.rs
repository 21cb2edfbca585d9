//! External-process execution with timeout, interrupt, and output capture,
//! plus the one background-service stage (local API smoke test).

use crate::errors::StageError;
use crate::stage::registry::{StageContext, StageExecutor, StageOutput};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

/// How many trailing output lines survive into error messages and the log.
const OUTPUT_TAIL_LINES: usize = 20;

/// One command invocation, resolved against the pipeline root at run time.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Runs a fixed sequence of commands in order, stopping at the first failure.
/// The stage's timeout bounds the whole sequence.
pub struct CommandExecutor {
    commands: Vec<CommandSpec>,
    env: Vec<(String, String)>,
}

impl CommandExecutor {
    pub fn new(commands: Vec<CommandSpec>) -> Self {
        Self {
            commands,
            env: Vec::new(),
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }
}

#[async_trait]
impl StageExecutor for CommandExecutor {
    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let deadline = tokio::time::Instant::now() + ctx.timeout;
        let mut captured = String::new();

        for spec in &self.commands {
            ctx.logger.debug(&format!("running: {}", spec.display()));
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or(StageError::TimedOut { limit: ctx.timeout })?;
            let output =
                run_command(spec, &ctx.config.root_dir, &self.env, remaining, ctx.timeout).await?;
            if !output.is_empty() {
                captured.push_str(&output);
                captured.push('\n');
            }
        }

        Ok(StageOutput {
            detail: format!("{} command(s) completed", self.commands.len()),
            captured,
        })
    }
}

/// Spawn `spec`, wait for it, and map every non-success outcome to a
/// `StageError`. The child is killed if the timeout elapses or the run is
/// interrupted; `kill_on_drop` covers the cancelled-future paths.
async fn run_command(
    spec: &CommandSpec,
    cwd: &Path,
    env: &[(String, String)],
    remaining: Duration,
    limit: Duration,
) -> Result<String, StageError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let child = cmd.spawn().map_err(|source| StageError::SpawnFailed {
        command: spec.display(),
        source,
    })?;

    let output = tokio::select! {
        result = child.wait_with_output() => {
            result.map_err(|source| StageError::SpawnFailed {
                command: spec.display(),
                source,
            })?
        }
        _ = tokio::time::sleep(remaining) => {
            return Err(StageError::TimedOut { limit });
        }
        _ = tokio::signal::ctrl_c() => {
            return Err(StageError::Interrupted);
        }
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    let tail = output_tail(&combined);

    if output.status.success() {
        Ok(tail)
    } else {
        Err(StageError::ExecutionFailed {
            command: spec.display(),
            exit_code: output.status.code(),
            output_tail: tail,
        })
    }
}

pub fn output_tail(combined: &str) -> String {
    let lines: Vec<&str> = combined.lines().collect();
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    lines[start..].join("\n")
}

/// Stage 5: boot the API server in the background, probe its endpoints, and
/// guarantee it is gone before the stage reports any outcome.
pub struct SmokeTestExecutor {
    base_url: String,
    startup_timeout: Duration,
}

impl Default for SmokeTestExecutor {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl StageExecutor for SmokeTestExecutor {
    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let mut cmd = Command::new("python3");
        cmd.args([
            "-m",
            "uvicorn",
            "src.api.server:app",
            "--host",
            "127.0.0.1",
            "--port",
            "8000",
        ])
        .current_dir(&ctx.config.root_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| StageError::SpawnFailed {
            command: "python3 -m uvicorn src.api.server:app".to_string(),
            source,
        })?;
        let mut guard = ServiceGuard::new(child);

        // Probe inside the guard's lifetime so every early return tears the
        // server down before the error propagates.
        let probes = tokio::select! {
            result = self.probe(ctx) => result,
            _ = tokio::time::sleep(ctx.timeout) => Err(StageError::TimedOut { limit: ctx.timeout }),
            _ = tokio::signal::ctrl_c() => Err(StageError::Interrupted),
        };

        guard.shutdown().await;
        let probes = probes?;

        Ok(StageOutput {
            detail: format!("{} endpoint probe(s) passed", probes),
            captured: String::new(),
        })
    }
}

impl SmokeTestExecutor {
    async fn probe(&self, ctx: &StageContext<'_>) -> Result<u32, StageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| StageError::Other(e.into()))?;

        self.wait_until_healthy(&client, ctx).await?;
        ctx.logger.debug("health endpoint is up");

        let predict = client
            .post(format!("{}/predict", self.base_url))
            .json(&serde_json::json!({ "text": "this deployment went smoothly" }))
            .send()
            .await
            .map_err(|e| StageError::PostconditionFailed {
                detail: format!("predict probe failed: {}", e),
            })?;
        if !predict.status().is_success() {
            return Err(StageError::PostconditionFailed {
                detail: format!("predict probe returned {}", predict.status()),
            });
        }

        Ok(2)
    }

    async fn wait_until_healthy(
        &self,
        client: &reqwest::Client,
        _ctx: &StageContext<'_>,
    ) -> Result<(), StageError> {
        let deadline = tokio::time::Instant::now() + self.startup_timeout;
        let health_url = format!("{}/health", self.base_url);
        loop {
            match client.get(&health_url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                _ if tokio::time::Instant::now() >= deadline => {
                    return Err(StageError::PostconditionFailed {
                        detail: format!(
                            "API server not healthy within {}s",
                            self.startup_timeout.as_secs()
                        ),
                    });
                }
                _ => tokio::time::sleep(Duration::from_millis(500)).await,
            }
        }
    }
}

/// Owns the background service process. `shutdown` kills it and waits for
/// the reap; if the guard is dropped without a shutdown (panic, cancelled
/// future), `kill_on_drop` on the child still terminates it.
struct ServiceGuard {
    child: Child,
}

impl ServiceGuard {
    fn new(child: Child) -> Self {
        Self { child }
    }

    async fn shutdown(&mut self) {
        // Best effort: the process may already have exited.
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}
