//! Push (Ralph → tracker) and pull (tracker → Ralph) reconciliation,
//! spec §4.H. Both directions append their attempt — success or
//! failure — to the tracker-ops audit mirror (SPEC_FULL §3), and
//! neither direction ever aborts the main loop on a tracker error.

use chrono::Utc;
use oplog::{Operation, Task, TaskMap, TaskStatus};

use super::{status_map::reverse_map_status, IssueDraft, Tracker};
use crate::config::TrackerConfig;
use crate::logs::{JsonlFile, TrackerOpOutcome, TrackerOpRecord};

#[derive(Debug, thiserror::Error)]
pub enum PushPullError {
    #[error("tracker error: {0}")]
    Tracker(#[from] super::TrackerError),
}

fn audit(log: &JsonlFile<TrackerOpRecord>, method: &str, target_id: Option<String>, dry_run: bool, ok: bool, detail: &str) {
    let record = TrackerOpRecord {
        method: method.to_string(),
        target_id,
        outcome: if ok { TrackerOpOutcome::Ok } else { TrackerOpOutcome::Error(detail.to_string()) },
        dry_run,
        timestamp: Utc::now(),
    };
    if let Err(e) = log.append(&record) {
        tracing::warn!(error = %e, "failed to append tracker-ops audit record");
    }
}

/// Push a just-finished task's outcome to the tracker, spec §4.H.
/// Returns operations the caller should append to the operation log
/// (a `link` if a new issue was created).
pub async fn push_task_to_tracker(
    tracker: &dyn Tracker,
    config: &TrackerConfig,
    task: &Task,
    success: bool,
    audit_log: &JsonlFile<TrackerOpRecord>,
) -> Vec<Operation> {
    let mut ops = Vec::new();
    let now = Utc::now();

    if task.external_id.is_none() && config.auto_create {
        let draft = IssueDraft {
            title: task.title.clone(),
            description: task.description.clone(),
            issue_type: config.issue_type_map.get(&format!("{:?}", task.task_type)).cloned().unwrap_or_default(),
        };
        match tracker.create_issue(&draft).await {
            Ok(issue) => {
                audit(audit_log, "create_issue", Some(issue.id.clone()), tracker.is_dry_run(), true, "");
                ops.push(Operation::link(now, &task.id, issue.id, issue.url));
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "tracker create_issue failed");
                audit(audit_log, "create_issue", None, tracker.is_dry_run(), false, &e.to_string());
            }
        }
    } else if let Some(external_id) = &task.external_id {
        if config.auto_transition {
            let status_name = config.status_map.get(&task.status.to_string()).cloned().unwrap_or_else(|| task.status.to_string());
            match tracker.transition_issue(external_id, &status_name).await {
                Ok(()) => audit(audit_log, "transition_issue", Some(external_id.clone()), tracker.is_dry_run(), true, ""),
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "tracker transition_issue failed");
                    audit(audit_log, "transition_issue", Some(external_id.clone()), tracker.is_dry_run(), false, &e.to_string());
                }
            }
        }

        if config.auto_comment {
            let body = if success {
                format!("Ralph completed this task ({}).", task.id)
            } else {
                format!("Ralph could not complete this task ({}); marked blocked.", task.id)
            };
            match tracker.add_comment(external_id, &body).await {
                Ok(()) => audit(audit_log, "add_comment", Some(external_id.clone()), tracker.is_dry_run(), true, ""),
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "tracker add_comment failed");
                    audit(audit_log, "add_comment", Some(external_id.clone()), tracker.is_dry_run(), false, &e.to_string());
                }
            }
        }
    }

    ops
}

/// Pull remote status for every non-terminal externally-linked task,
/// spec §4.H. Tracker wins on status: a difference from the remote
/// produces an `update` operation for the caller to append.
pub async fn pull_from_tracker(
    tracker: &dyn Tracker,
    config: &TrackerConfig,
    tasks: &TaskMap,
    audit_log: &JsonlFile<TrackerOpRecord>,
) -> Vec<Operation> {
    let mut ops = Vec::new();
    let now = Utc::now();

    for task in tasks.values() {
        if task.status.is_terminal() {
            continue;
        }
        let Some(external_id) = &task.external_id else { continue };

        match tracker.get_issue(external_id).await {
            Ok(issue) => {
                audit(audit_log, "get_issue", Some(external_id.clone()), tracker.is_dry_run(), true, "");
                let (remote_status, _source) = reverse_map_status(&issue.status, config.reverse_status_map.as_ref(), &config.status_map);
                if remote_status != task.status && task.status.can_transition_to(remote_status) {
                    ops.push(Operation::update(now, &task.id, oplog::TaskChanges::status(remote_status)));
                }
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "tracker get_issue failed during pull");
                audit(audit_log, "get_issue", Some(external_id.clone()), tracker.is_dry_run(), false, &e.to_string());
            }
        }
    }

    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::MockTracker;
    use oplog::TaskType;
    use tempfile::tempdir;

    fn audit_log() -> (tempfile::TempDir, JsonlFile<TrackerOpRecord>) {
        let dir = tempdir().unwrap();
        let log = JsonlFile::new(dir.path().join("tracker-ops.jsonl"));
        (dir, log)
    }

    #[tokio::test]
    async fn push_creates_issue_and_links_it() {
        let (_dir, log) = audit_log();
        let tracker = MockTracker::new();
        let config = TrackerConfig { auto_create: true, ..Default::default() };
        let task = Task::new("RALPH-001", TaskType::Task, "Ship it");

        let ops = push_task_to_tracker(&tracker, &config, &task, true, &log).await;
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0].kind, oplog::OperationKind::Link { .. }));
    }

    #[tokio::test]
    async fn pull_skips_tasks_without_external_id() {
        let (_dir, log) = audit_log();
        let tracker = MockTracker::new();
        let config = TrackerConfig::default();
        let mut tasks = TaskMap::new();
        tasks.insert("RALPH-001".into(), Task::new("RALPH-001", TaskType::Task, "No external id"));

        let ops = pull_from_tracker(&tracker, &config, &tasks, &log).await;
        assert!(ops.is_empty());
    }

    #[tokio::test]
    async fn pull_produces_update_when_remote_status_differs() {
        let (_dir, log) = audit_log();
        let tracker = MockTracker::new();
        tracker.seed(super::super::RemoteIssue {
            id: "MOCK-1".into(),
            title: "x".into(),
            description: "".into(),
            status: "in progress".into(),
            url: None,
        });
        let config = TrackerConfig::default();
        let mut task = Task::new("RALPH-001", TaskType::Task, "x");
        task.status = TaskStatus::Pending;
        task.external_id = Some("MOCK-1".into());
        let mut tasks = TaskMap::new();
        tasks.insert(task.id.clone(), task);

        let ops = pull_from_tracker(&tracker, &config, &tasks, &log).await;
        assert_eq!(ops.len(), 1);
    }
}
