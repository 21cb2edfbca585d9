//! Preflight environment validation.
//!
//! Checks run before any stage executes and aggregate into a report: hard
//! failures block the run with remediation hints, low disk space degrades to
//! a warning. Cloud tooling is only probed when the target includes cloud.

use crate::config::Config;
use crate::logger::DeployLogger;
use std::process::Stdio;
use tokio::process::Command;

const MIN_PYTHON_MINOR: u32 = 10;
const MIN_DISK_BYTES: u64 = 10 * 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct PrereqFinding {
    pub name: String,
    pub passed: bool,
    pub detail: String,
    pub remediation: Option<String>,
}

#[derive(Debug, Default)]
pub struct PrereqReport {
    pub findings: Vec<PrereqFinding>,
    pub warnings: Vec<String>,
}

impl PrereqReport {
    pub fn passed(&self) -> bool {
        self.findings.iter().all(|f| f.passed)
    }

    /// Failure messages with remediation hints, for the aggregate error.
    pub fn failure_lines(&self) -> Vec<String> {
        self.findings
            .iter()
            .filter(|f| !f.passed)
            .map(|f| match &f.remediation {
                Some(hint) => format!("{}: {} ({})", f.name, f.detail, hint),
                None => format!("{}: {}", f.name, f.detail),
            })
            .collect()
    }

    fn pass(&mut self, name: &str, detail: impl Into<String>) {
        self.findings.push(PrereqFinding {
            name: name.to_string(),
            passed: true,
            detail: detail.into(),
            remediation: None,
        });
    }

    fn fail(&mut self, name: &str, detail: impl Into<String>, remediation: &str) {
        self.findings.push(PrereqFinding {
            name: name.to_string(),
            passed: false,
            detail: detail.into(),
            remediation: Some(remediation.to_string()),
        });
    }
}

pub struct PrerequisiteValidator<'a> {
    config: &'a Config,
}

impl<'a> PrerequisiteValidator<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Run every applicable check and log each outcome as it lands.
    pub async fn validate(&self, logger: &DeployLogger) -> PrereqReport {
        let mut report = PrereqReport::default();

        self.check_python(&mut report).await;
        self.check_docker(&mut report).await;
        if self.config.target.includes_cloud() {
            self.check_gcloud(&mut report).await;
        }
        self.check_disk_space(&mut report);

        for finding in &report.findings {
            if finding.passed {
                logger.success(&format!("✓ {}: {}", finding.name, finding.detail));
            } else {
                logger.error(&format!("✗ {}: {}", finding.name, finding.detail));
            }
        }
        for warning in &report.warnings {
            logger.warning(&format!("⚠ {}", warning));
        }

        report
    }

    async fn check_python(&self, report: &mut PrereqReport) {
        match capture_stdout("python3", &["--version"]).await {
            Some(version_line) => match parse_python_version(&version_line) {
                Some((major, minor)) if major > 3 || (major == 3 && minor >= MIN_PYTHON_MINOR) => {
                    report.pass("python3", version_line.trim().to_string());
                }
                Some((major, minor)) => {
                    report.fail(
                        "python3",
                        format!("found {}.{}, need 3.{}+", major, minor, MIN_PYTHON_MINOR),
                        "upgrade Python to 3.10 or later",
                    );
                }
                None => {
                    report.fail(
                        "python3",
                        format!("unrecognized version output: {}", version_line.trim()),
                        "verify python3 --version works",
                    );
                }
            },
            None => {
                report.fail(
                    "python3",
                    "not found on PATH",
                    "install Python 3.10+ and ensure python3 is on PATH",
                );
            }
        }
    }

    async fn check_docker(&self, report: &mut PrereqReport) {
        // `docker info` also proves the daemon is reachable, not just the CLI.
        if run_silent("docker", &["info"]).await {
            report.pass("docker", "daemon reachable");
        } else {
            report.fail(
                "docker",
                "docker daemon not reachable",
                "install Docker and start the daemon",
            );
        }
    }

    async fn check_gcloud(&self, report: &mut PrereqReport) {
        if !run_silent("gcloud", &["--version"]).await {
            report.fail(
                "gcloud",
                "not found on PATH",
                "install the Google Cloud SDK",
            );
            return;
        }
        report.pass("gcloud", "CLI present");

        let active = capture_stdout(
            "gcloud",
            &[
                "auth",
                "list",
                "--filter=status:ACTIVE",
                "--format=value(account)",
            ],
        )
        .await;
        match active {
            Some(accounts) if !accounts.trim().is_empty() => {
                report.pass("gcloud auth", accounts.lines().next().unwrap_or("").trim().to_string());
            }
            _ => {
                report.fail(
                    "gcloud auth",
                    "no active account",
                    "run gcloud auth login",
                );
            }
        }

        match &self.config.cloud_project {
            Some(project) => report.pass("gcloud project", project.clone()),
            None => report.fail(
                "gcloud project",
                "no project configured",
                "pass --cloud-project",
            ),
        }
    }

    fn check_disk_space(&self, report: &mut PrereqReport) {
        match fs2::available_space(&self.config.root_dir) {
            Ok(bytes) if bytes < MIN_DISK_BYTES => {
                report.warnings.push(format!(
                    "Low disk space: {:.1}GB free, recommend 10GB+",
                    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
                ));
            }
            Ok(bytes) => {
                report.pass(
                    "disk space",
                    format!("{:.1}GB free", bytes as f64 / (1024.0 * 1024.0 * 1024.0)),
                );
            }
            Err(_) => {
                // Unreadable filesystems are not worth blocking on.
                report
                    .warnings
                    .push("could not determine free disk space".to_string());
            }
        }
    }
}

async fn run_silent(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

async fn capture_stdout(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `Python X.Y.Z` into (major, minor).
fn parse_python_version(line: &str) -> Option<(u32, u32)> {
    let version = line.trim().strip_prefix("Python ")?;
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_python_version_lines() {
        assert_eq!(parse_python_version("Python 3.12.1\n"), Some((3, 12)));
        assert_eq!(parse_python_version("Python 3.9.18"), Some((3, 9)));
        assert_eq!(parse_python_version("Python 4.0.0"), Some((4, 0)));
        assert_eq!(parse_python_version("pyenv: python3 not found"), None);
    }

    #[test]
    fn report_passes_only_when_all_findings_pass() {
        let mut report = PrereqReport::default();
        report.pass("python3", "Python 3.12.1");
        assert!(report.passed());

        report.fail("docker", "daemon not reachable", "start the daemon");
        assert!(!report.passed());

        let lines = report.failure_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("docker"));
        assert!(lines[0].contains("start the daemon"));
    }

    #[test]
    fn warnings_do_not_fail_the_report() {
        let mut report = PrereqReport::default();
        report.pass("python3", "Python 3.11.4");
        report
            .warnings
            .push("Low disk space: 4.2GB free, recommend 10GB+".to_string());
        assert!(report.passed());
    }
}
