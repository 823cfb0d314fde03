//! The main loop, spec §4.M, grounded on the teacher's
//! `run_daemon`/`LoopManager` tick shape: a sequential state machine
//! that pulls from the tracker, selects a task, runs it through the
//! iteration engine, records metrics and learning, and pushes back.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use oplog::{LogError, Operation, OperationLog, TaskChanges, TaskMap, TaskStatus};

use crate::agent::AgentProvider;
use crate::config::{Config, OnFailure};
use crate::git::{is_git_repo, GitOps, ShellGit};
use crate::improvements::applier::apply_proposals;
use crate::improvements::generator::{generate_from_aggregate, generate_from_pattern, ProposalIdGenerator};
use crate::improvements::ImprovementProposal;
use crate::iteration::{IterationEngine, RunBudgetState};
use crate::logs::{JsonlFile, LearningEvent, ProgressEvent, TrackerOpRecord};
use crate::metrics::{compute_aggregate, MetricsRecorder};
use crate::patterns::{detect_all, summarize, DetectionContext};
use crate::sandbox::Sandbox;
use crate::selector;
use crate::tracker::{self, push_task_to_tracker};

#[derive(Debug, Clone, Default)]
pub struct MainLoopSummary {
    pub tasks_processed: u32,
    pub tasks_succeeded: u32,
    pub tasks_failed: u32,
    pub run_cost: f64,
    pub stopped_reason: String,
}

fn mark_status(
    log: &OperationLog,
    progress_log: &JsonlFile<ProgressEvent>,
    id: &str,
    from: TaskStatus,
    to: TaskStatus,
) -> Result<(), LogError> {
    let changes = if to == TaskStatus::Done { TaskChanges::status_done(Utc::now()) } else { TaskChanges::status(to) };
    log.append(&Operation::update(Utc::now(), id, changes))?;
    if let Err(e) = progress_log.append(&ProgressEvent::StatusChange {
        task_id: id.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        timestamp: Utc::now(),
    }) {
        tracing::warn!(task_id = %id, error = %e, "failed to append status-change progress event");
    }
    Ok(())
}

/// Run the main loop once to completion (budget exhaustion or no more
/// tasks), spec §4.M.
pub async fn run_once(
    config: &Config,
    agent: Arc<dyn AgentProvider>,
    task_filter: Option<&str>,
    dry_run: bool,
) -> eyre::Result<MainLoopSummary> {
    let op_log = OperationLog::new(config.storage.tasks_log());
    let progress_log: JsonlFile<ProgressEvent> = JsonlFile::new(config.storage.progress_log());
    let learning_log: JsonlFile<LearningEvent> = JsonlFile::new(config.storage.learning_log());
    let tracker_ops_log: JsonlFile<TrackerOpRecord> = JsonlFile::new(config.storage.tracker_ops_log());
    let metrics_recorder = MetricsRecorder::new(config.storage.metrics_log());

    let repo_root = config.git.repo_root.clone();
    let git: Option<ShellGit> = if is_git_repo(&repo_root) { Some(ShellGit::new(&repo_root)) } else { None };

    let engine = IterationEngine::new(agent, config.budgets.clone());
    let mut run_state = RunBudgetState::new();
    let run_start = Instant::now();
    let max_tasks = if task_filter.is_some() { 1 } else { config.budgets.max_tasks_per_run };
    let mut proposal_ids = ProposalIdGenerator::new(1);

    let mut summary = MainLoopSummary::default();

    loop {
        if summary.tasks_processed >= max_tasks {
            summary.stopped_reason = "max_tasks_per_run reached".to_string();
            break;
        }
        if run_start.elapsed() > Duration::from_secs(config.budgets.max_time_per_run_secs) {
            summary.stopped_reason = "max_time_per_run exceeded".to_string();
            break;
        }
        if run_state.run_cost >= config.budgets.max_cost_per_run {
            summary.stopped_reason = "max_cost_per_run exceeded".to_string();
            break;
        }

        let mut tasks = op_log.project()?;

        if config.tracker.enabled && config.tracker.auto_pull {
            if let Err(e) = pull_tick(config, &tasks, &op_log, &tracker_ops_log).await {
                tracing::warn!(error = %e, "tracker pull failed, continuing");
            }
            tasks = op_log.project()?;
        }

        check_guidance_files(config);

        let Some(task) = selector::select(&tasks, task_filter).cloned() else {
            summary.stopped_reason = "no more selectable tasks".to_string();
            break;
        };

        let mut current_status = task.status;
        if current_status != TaskStatus::InProgress {
            mark_status(&op_log, &progress_log, &task.id, current_status, TaskStatus::InProgress)?;
            current_status = TaskStatus::InProgress;
        }

        let mut sandbox = Sandbox::new(&repo_root, config.sandbox.clone());
        let git_ref: Option<&dyn GitOps> = git.as_ref().map(|g| g as &dyn GitOps);
        let result = engine.run_task(&task, &mut sandbox, git_ref, &mut run_state, &progress_log).await;

        let success = result.outcome.is_success();
        let mut stop_after_this_task = false;
        if success {
            mark_status(&op_log, &progress_log, &task.id, current_status, TaskStatus::Done)?;
        } else {
            let reason = match &result.outcome {
                crate::iteration::IterationOutcome::Blocked { reason } => reason.clone(),
                crate::iteration::IterationOutcome::Failed { message } => message.clone(),
                crate::iteration::IterationOutcome::BudgetExceeded { reason } => reason.clone(),
                crate::iteration::IterationOutcome::Complete { .. } => unreachable!(),
            };
            tracing::info!(task_id = %task.id, %reason, "task did not complete, marking blocked");
            mark_status(&op_log, &progress_log, &task.id, current_status, TaskStatus::Blocked)?;
            if config.budgets.on_failure == OnFailure::Stop {
                stop_after_this_task = true;
            }
        }

        let (files_changed, lines_changed) = if success {
            match git.as_ref() {
                Some(g) => match g.diff_stats().await {
                    Ok(stats) => (stats.files_changed, stats.lines_changed),
                    Err(_) => (0, 0),
                },
                None => (0, 0),
            }
        } else {
            (0, 0)
        };

        let final_tasks = op_log.project()?;
        if let Some(final_task) = final_tasks.get(&task.id) {
            if success {
                metrics_recorder.record_task_completion(
                    final_task,
                    result.iterations_used,
                    files_changed,
                    lines_changed,
                    result.blocked_attempts,
                );
            }

            if config.learning.enabled {
                run_learning_tick(config, &final_tasks, &metrics_recorder, &learning_log, git.as_ref(), &repo_root, &mut proposal_ids).await;
            }

            if !dry_run && config.tracker.enabled {
                let tracker_config = &config.tracker;
                match tracker::build(tracker_config) {
                    Ok(tracker) => {
                        let ops = push_task_to_tracker(tracker.as_ref(), tracker_config, final_task, success, &tracker_ops_log).await;
                        for op in ops {
                            op_log.append(&op)?;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to build tracker for push"),
                }
            }
        }

        summary.tasks_processed += 1;
        summary.run_cost += result.cost;
        if success {
            summary.tasks_succeeded += 1;
        } else {
            summary.tasks_failed += 1;
        }

        if stop_after_this_task {
            summary.stopped_reason = "onFailure=stop: ending run after a failed task".to_string();
            break;
        }
    }

    Ok(summary)
}

async fn pull_tick(
    config: &Config,
    tasks: &TaskMap,
    op_log: &OperationLog,
    tracker_ops_log: &JsonlFile<TrackerOpRecord>,
) -> eyre::Result<()> {
    let tracker = tracker::build(&config.tracker)?;
    let ops = tracker::pull_from_tracker(tracker.as_ref(), &config.tracker, tasks, tracker_ops_log).await;
    for op in ops {
        op_log.append(&op)?;
    }
    Ok(())
}

fn check_guidance_files(config: &Config) {
    if !config.learning.guidance_dir.exists() {
        tracing::debug!(dir = %config.learning.guidance_dir.display(), "guidance directory does not exist yet");
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_learning_tick(
    config: &Config,
    tasks: &TaskMap,
    metrics_recorder: &MetricsRecorder,
    learning_log: &JsonlFile<LearningEvent>,
    git: Option<&ShellGit>,
    repo_root: &Path,
    proposal_ids: &mut ProposalIdGenerator,
) {
    let task_metrics = metrics_recorder.all_task_metrics();
    let aggregate = compute_aggregate("run", tasks, &task_metrics);

    let ctx = DetectionContext::new(tasks, &task_metrics, &[])
        .with_thresholds(config.learning.min_confidence, config.learning.min_samples);
    let patterns = detect_all(&ctx);
    let _summary = summarize(&patterns);

    for pattern in &patterns {
        if let Err(e) = learning_log.append(&LearningEvent::PatternDetected {
            pattern_type: format!("{:?}", pattern.pattern_type),
            confidence: pattern.confidence,
            timestamp: Utc::now(),
        }) {
            tracing::warn!(error = %e, "failed to append pattern_detected learning event");
        }
    }

    let mut proposals: Vec<ImprovementProposal> = patterns.iter().map(|p| generate_from_pattern(p, proposal_ids)).collect();
    proposals.extend(generate_from_aggregate(&aggregate, proposal_ids));

    for proposal in &proposals {
        if let Err(e) = learning_log.append(&LearningEvent::ImprovementProposed {
            proposal_id: proposal.id.clone(),
            target: proposal.target.clone(),
            timestamp: Utc::now(),
        }) {
            tracing::warn!(error = %e, "failed to append improvement_proposed learning event");
        }
    }

    if config.learning.auto_apply {
        if let Some(git) = git {
            apply_proposals(&mut proposals, git, repo_root, Utc::now(), learning_log).await;
        }
    }
}
