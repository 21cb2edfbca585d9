//! Leveled logger with a styled console sink and a durable file sink.
//!
//! The file sink is append-only and writes raw UTF-8 bytes, so non-ASCII
//! status glyphs (✓ ✗ ⚠) persist correctly regardless of the host locale.
//! Logging never gates control flow: a failed file write degrades to a
//! one-line stderr notice instead of failing the run.

use chrono::Local;
use console::style;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
    Debug,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Success => write!(f, "SUCCESS"),
            LogLevel::Warning => write!(f, "WARNING"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Debug => write!(f, "DEBUG"),
        }
    }
}

pub struct DeployLogger {
    log_file: PathBuf,
    verbose: bool,
    // Serializes file appends; there is one writer process but log calls can
    // come from the elapsed-ticker task as well as the main loop.
    file_lock: Mutex<()>,
}

impl DeployLogger {
    pub fn new(log_file: PathBuf, verbose: bool) -> Self {
        Self {
            log_file,
            verbose,
            file_lock: Mutex::new(()),
        }
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("[{}] [{}] {}", stamp, level, message);

        if level != LogLevel::Debug || self.verbose {
            let styled = match level {
                LogLevel::Info => style(line.clone()).white(),
                LogLevel::Success => style(line.clone()).green(),
                LogLevel::Warning => style(line.clone()).yellow(),
                LogLevel::Error => style(line.clone()).red(),
                LogLevel::Debug => style(line.clone()).dim(),
            };
            println!("{}", styled);
        }

        self.append_to_file(&line);
    }

    fn append_to_file(&self, line: &str) {
        let _guard = self.file_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.log_file.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                eprintln!("warning: could not create log directory");
                return;
            }
        }
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .and_then(|mut f| writeln!(f, "{}", line));
        if let Err(e) = result {
            eprintln!("warning: could not append to {}: {}", self.log_file.display(), e);
        }
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn success(&self, message: &str) {
        self.log(LogLevel::Success, message);
    }

    pub fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn log_appends_leveled_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deploy.log");
        let logger = DeployLogger::new(path.clone(), false);

        logger.info("stage 0 starting");
        logger.error("stage 0 failed");

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[INFO] stage 0 starting"));
        assert!(lines[1].contains("[ERROR] stage 0 failed"));
    }

    #[test]
    fn non_ascii_status_glyphs_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deploy.log");
        let logger = DeployLogger::new(path.clone(), false);

        logger.success("✓ Docker detected");
        logger.error("✗ gcloud not authenticated");
        logger.warning("⚠ Low disk space: 4.2GB free, recommend 10GB+");

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("✓ Docker detected"));
        assert!(content.contains("✗ gcloud not authenticated"));
        assert!(content.contains("⚠ Low disk space"));
    }

    #[test]
    fn debug_lines_still_reach_the_file_when_not_verbose() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deploy.log");
        let logger = DeployLogger::new(path.clone(), false);

        logger.debug("validating stage 1 artifacts");
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("[DEBUG] validating stage 1 artifacts"));
    }

    #[test]
    fn file_is_append_only_across_logger_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deploy.log");
        {
            let logger = DeployLogger::new(path.clone(), false);
            logger.info("first run");
        }
        {
            let logger = DeployLogger::new(path.clone(), false);
            logger.info("second run");
        }
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("first run"));
        assert!(content.contains("second run"));
    }

    #[test]
    fn creates_parent_directory_on_first_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/logs/deploy.log");
        let logger = DeployLogger::new(path.clone(), false);
        logger.info("hello");
        assert!(path.exists());
    }
}
