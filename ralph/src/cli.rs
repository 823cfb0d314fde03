//! CLI command definitions, spec §6.1, grounded on the teacher's
//! `cli.rs` clap-derive layout.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ralph", about = "Autonomous software-delivery orchestrator", version)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true, default_value = "ralph.config.json")]
    pub config: PathBuf,

    /// Execute without writing sandbox changes or calling the tracker.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Filter to a single task id; caps `maxTasksPerRun` to 1.
    #[arg(long, global = true)]
    pub task: Option<String>,

    /// Enable verbose (debug) logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the main loop (default).
    Run,

    /// Extract tasks from a plan document (external, out of core scope).
    Discover {
        /// Path to the plan document.
        path: Option<PathBuf>,
    },

    /// Run pull then push against the configured tracker.
    Sync,

    /// Print task counts and in-progress tasks.
    Status,

    /// Run metrics, detectors, and proposal generation.
    Learn {
        /// Apply generated proposals immediately.
        #[arg(long)]
        apply: bool,
    },

    /// Render the aggregated learning summary.
    Dashboard,
}

impl Cli {
    pub fn command(&self) -> Command {
        match &self.command {
            Some(Command::Run) | None => Command::Run,
            Some(Command::Discover { path }) => Command::Discover { path: path.clone() },
            Some(Command::Sync) => Command::Sync,
            Some(Command::Status) => Command::Status,
            Some(Command::Learn { apply }) => Command::Learn { apply: *apply },
            Some(Command::Dashboard) => Command::Dashboard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_run_when_no_subcommand_given() {
        let cli = Cli::parse_from(["ralph"]);
        assert!(matches!(cli.command(), Command::Run));
    }

    #[test]
    fn task_filter_and_dry_run_parse() {
        let cli = Cli::parse_from(["ralph", "--dry-run", "--task", "RALPH-001", "run"]);
        assert!(cli.dry_run);
        assert_eq!(cli.task.as_deref(), Some("RALPH-001"));
    }
}
