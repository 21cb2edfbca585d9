//! Terminal UI for the deployment controller, rendered via `indicatif`.
//!
//! Two bars are stacked vertically:
//! - Stage bar tracks how many pipeline stages have completed
//! - Status spinner shows the currently running stage with elapsed time
//!
//! All rendering is presentational; execution outcomes are recorded by the
//! controller and the state store, never read back from this module.

use console::{style, Emoji};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

// Status indicators with plain-terminal fallbacks.
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", ">>");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");

pub struct DeployUI {
    multi: MultiProgress,
    stage_bar: ProgressBar,
    status_bar: ProgressBar,
}

impl DeployUI {
    /// Create the UI sized to the number of stages selected for this run.
    pub fn new(total_stages: u64) -> Self {
        let multi = MultiProgress::new();

        let stage_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let stage_bar = multi.add(ProgressBar::new(total_stages));
        stage_bar.set_style(stage_style);
        stage_bar.set_prefix("Stages");

        let status_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let status_bar = multi.add(ProgressBar::new_spinner());
        status_bar.set_style(status_style);
        status_bar.set_prefix("Status");

        Self {
            multi,
            stage_bar,
            status_bar,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the
    /// rich UI fails. Prevents silent loss of critical messages when stdout
    /// is unavailable.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Print the run banner: deployment id, mode, target, profile.
    pub fn print_banner(&self, deployment_id: &str, mode: &str, target: &str, profile: &str) {
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line(format!(
            "{} Deployment Pipeline {}",
            ROCKET,
            style(deployment_id).yellow().bold()
        ));
        self.print_line(format!(
            "  {} {}   {} {}   {} {}",
            style("mode:").dim(),
            mode,
            style("target:").dim(),
            target,
            style("profile:").dim(),
            profile
        ));
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line("");
    }

    /// Print the header block for a stage before execution begins.
    pub fn print_stage_header(&self, stage_id: u32, name: &str, estimated_secs: u64) {
        self.print_line("");
        self.print_line(format!(
            "{} Stage {}: {}",
            style("▶").green().bold(),
            style(stage_id).yellow().bold(),
            name
        ));
        self.print_line(format!(
            "  {} ~{}",
            style("estimate:").dim(),
            format_duration(estimated_secs)
        ));
        self.print_line("");
    }

    /// Start the status spinner for a stage with a 100 ms tick.
    pub fn start_stage(&self, stage_id: u32, name: &str) {
        self.stage_bar
            .set_message(format!("{}: {}", style(stage_id).yellow(), name));
        self.status_bar
            .set_message(format!("Running stage {} ({})", style(stage_id).cyan(), name));
        self.status_bar
            .enable_steady_tick(Duration::from_millis(100));
    }

    /// Refresh the status spinner message with wall-clock elapsed time.
    ///
    /// Intended to be called from a periodic timer task.
    pub fn update_elapsed(&self, stage_id: u32, name: &str, elapsed: Duration) {
        let secs = elapsed.as_secs();
        self.status_bar.set_message(format!(
            "Running stage {} ({}) {}",
            style(stage_id).cyan(),
            name,
            style(format!("({})", format_duration(secs))).dim()
        ));
    }

    /// Increment the stage bar and announce success.
    pub fn stage_complete(&self, stage_id: u32, name: &str, duration_secs: f64) {
        self.stage_bar.inc(1);
        self.status_bar.set_message(String::new());
        self.print_line(format!(
            "{} Stage {} ({}) complete in {}",
            CHECK,
            style(stage_id).green().bold(),
            name,
            format_duration(duration_secs as u64)
        ));
    }

    /// Announce a stage failure without advancing the stage bar.
    pub fn stage_failed(&self, stage_id: u32, name: &str, reason: &str) {
        self.status_bar.set_message(String::new());
        self.print_line(format!(
            "{} Stage {} ({}) failed: {}",
            CROSS,
            style(stage_id).red().bold(),
            name,
            reason
        ));
    }

    /// Announce a skipped stage and advance the stage bar past it.
    pub fn stage_skipped(&self, stage_id: u32, name: &str, reason: &str) {
        self.stage_bar.inc(1);
        self.print_line(format!(
            "{} Stage {} ({}) skipped: {}",
            SKIP,
            style(stage_id).yellow(),
            name,
            style(reason).dim()
        ));
    }

    /// Announce a stage satisfied by a prior checkpoint.
    pub fn stage_already_done(&self, stage_id: u32, name: &str) {
        self.stage_bar.inc(1);
        self.print_line(format!(
            "{} Stage {} ({}) already completed, checkpoint found",
            CHECK,
            style(stage_id).green(),
            name
        ));
    }

    /// Finish both bars and print the closing summary line.
    pub fn finish(&self, succeeded: bool, completed: usize, total: usize, elapsed_secs: f64) {
        self.status_bar.finish_and_clear();
        self.stage_bar.finish_and_clear();
        self.print_line("");
        if succeeded {
            self.print_line(format!(
                "{} Deployment complete: {}/{} stages in {}",
                CHECK,
                style(completed).green().bold(),
                total,
                format_duration(elapsed_secs as u64)
            ));
        } else {
            self.print_line(format!(
                "{} Deployment stopped: {}/{} stages after {}",
                CROSS,
                style(completed).red().bold(),
                total,
                format_duration(elapsed_secs as u64)
            ));
        }
    }
}

/// Format seconds as `Xs`, `Xm Ys`, or `Xh Ym`.
pub fn format_duration(secs: u64) -> String {
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting_units() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(60), "1m 0s");
        assert_eq!(format_duration(185), "3m 5s");
        assert_eq!(format_duration(3600), "1h 0m");
        assert_eq!(format_duration(5430), "1h 30m");
    }
}
