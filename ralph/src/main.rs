//! CLI entry point, grounded on the teacher's `td/src/main.rs`
//! `setup_logging`/dispatch shape.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use ralph::agent::mock::MockAgent;
use ralph::agent::AgentProvider;
use ralph::cli::{Cli, Command};
use ralph::config::Config;
use ralph::{orchestrator, patterns, selector};

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("ralph").join("logs");
    fs::create_dir_all(&log_dir).context("failed to create log directory")?;

    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("ralph.log")).context("failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!(?level, "logging initialized");
    Ok(())
}

/// The concrete LLM client is an external collaborator (spec §1's
/// Out-of-scope list); absent one wired in via configuration, the CLI
/// falls back to a canned agent so the loop is still runnable end to
/// end, logging loudly that nothing it produces should be trusted.
fn build_agent() -> Arc<dyn AgentProvider> {
    warn!("no concrete agent provider configured, using a no-op canned agent");
    Arc::new(MockAgent::new(vec![MockAgent::stop("no agent provider configured; task left untouched")]))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose).context("failed to set up logging")?;

    let config = Config::load(Some(cli.config.as_path())).context("failed to load configuration")?;
    debug!(command = ?cli.command(), "dispatching command");

    match cli.command() {
        Command::Run => {
            let agent = build_agent();
            let summary = orchestrator::run_once(&config, agent, cli.task.as_deref(), cli.dry_run).await?;
            info!(
                processed = summary.tasks_processed,
                succeeded = summary.tasks_succeeded,
                failed = summary.tasks_failed,
                cost = summary.run_cost,
                reason = %summary.stopped_reason,
                "run complete"
            );
            println!(
                "{} task(s) processed ({} succeeded, {} failed), ${:.2} spent — stopped: {}",
                summary.tasks_processed, summary.tasks_succeeded, summary.tasks_failed, summary.run_cost, summary.stopped_reason
            );
        }
        Command::Discover { path } => {
            println!(
                "discover is not implemented in-core; seed {} via an external markdown-to-task extractor that appends `create` operations to {}",
                path.map(|p| p.display().to_string()).unwrap_or_else(|| "a plan document".to_string()),
                config.storage.tasks_log().display()
            );
        }
        Command::Sync => {
            let op_log = oplog::OperationLog::new(config.storage.tasks_log());
            let tasks = op_log.project().context("failed to project operation log")?;
            let audit_log = ralph::logs::JsonlFile::new(config.storage.tracker_ops_log());
            let tracker = ralph::tracker::build(&config.tracker).context("failed to build tracker adapter")?;
            let pull_ops = ralph::tracker::pull_from_tracker(tracker.as_ref(), &config.tracker, &tasks, &audit_log).await;
            let pulled = pull_ops.len();
            for op in pull_ops {
                op_log.append(&op).context("failed to append pulled operation")?;
            }
            println!("sync complete: {pulled} task(s) updated from tracker");
        }
        Command::Status => {
            let op_log = oplog::OperationLog::new(config.storage.tasks_log());
            let tasks = op_log.project().context("failed to project operation log")?;
            let counts = ralph::metrics::count_by_aggregate(&tasks);
            for (status, count) in &counts {
                println!("{status}: {count}");
            }
            if let Some(task) = selector::select(&tasks, cli.task.as_deref()) {
                println!("next up: {} ({})", task.id, task.title);
            } else {
                println!("no selectable task");
            }
        }
        Command::Learn { apply } => {
            let op_log = oplog::OperationLog::new(config.storage.tasks_log());
            let tasks = op_log.project().context("failed to project operation log")?;
            let metrics_recorder = ralph::metrics::MetricsRecorder::new(config.storage.metrics_log());
            let task_metrics = metrics_recorder.all_task_metrics();
            let ctx = patterns::DetectionContext::new(&tasks, &task_metrics, &[])
                .with_thresholds(config.learning.min_confidence, config.learning.min_samples);
            let found = patterns::detect_all(&ctx);
            let summary = patterns::summarize(&found);
            println!("{} pattern(s) detected ({} high-confidence)", summary.total_patterns, summary.high_confidence);

            let ids = ralph::improvements::generator::ProposalIdGenerator::new(1);
            let mut proposals: Vec<_> = found.iter().map(|p| ralph::improvements::generator::generate_from_pattern(p, &ids)).collect();
            for proposal in &proposals {
                println!("{}: {} ({:?})", proposal.id, proposal.title, proposal.priority);
            }

            if apply {
                if let Some(git) = maybe_git(&config) {
                    let learning_log = ralph::logs::JsonlFile::new(config.storage.learning_log());
                    let outcomes =
                        ralph::improvements::applier::apply_proposals(&mut proposals, &git, &config.git.repo_root, chrono::Utc::now(), &learning_log)
                            .await;
                    println!("{} proposal(s) applied", outcomes.iter().filter(|o| o.applied).count());
                } else {
                    println!("{} is not a git repository; skipping apply", config.git.repo_root.display());
                }
            }
        }
        Command::Dashboard => {
            let op_log = oplog::OperationLog::new(config.storage.tasks_log());
            let tasks = op_log.project().context("failed to project operation log")?;
            let metrics_recorder = ralph::metrics::MetricsRecorder::new(config.storage.metrics_log());
            let task_metrics = metrics_recorder.all_task_metrics();
            let aggregate = ralph::metrics::compute_aggregate("all-time", &tasks, &task_metrics);
            println!("{}", serde_json::to_string_pretty(&aggregate)?);
        }
    }

    Ok(())
}

fn maybe_git(config: &Config) -> Option<ralph::git::ShellGit> {
    if ralph::git::is_git_repo(&config.git.repo_root) {
        Some(ralph::git::ShellGit::new(&config.git.repo_root))
    } else {
        None
    }
}
