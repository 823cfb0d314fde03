//! End-to-end exercise of the main loop against a temporary git
//! repository, grounded on the teacher's `tests/integration_test.rs`.

use std::process::Command;

use chrono::Utc;
use oplog::{Operation, OperationLog, Task, TaskType};
use ralph::agent::mock::MockAgent;
use ralph::agent::{AgentProvider, ChatResponse, FinishReason, ToolCall, Usage};
use ralph::config::Config;
use tempfile::TempDir;

fn init_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    let run = |args: &[&str]| {
        let status = Command::new("git").args(args).current_dir(dir.path()).status().unwrap();
        assert!(status.success(), "git {args:?} failed");
    };
    run(&["init"]);
    run(&["config", "user.email", "ralph@example.com"]);
    run(&["config", "user.name", "Ralph"]);
    std::fs::write(dir.path().join("README.md"), "seed\n").unwrap();
    run(&["add", "."]);
    run(&["commit", "-m", "seed"]);
    dir
}

fn config_for(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.git.repo_root = dir.path().to_path_buf();
    config.storage.state_dir = dir.path().join("state");
    config.learning.enabled = false;
    config.tracker.enabled = false;
    config
}

#[tokio::test]
async fn run_once_completes_a_pending_task_and_records_metrics() {
    let dir = init_repo();
    let config = config_for(&dir);

    let op_log = OperationLog::new(config.storage.tasks_log());
    let task = Task::new("RALPH-001", TaskType::Task, "Write the README section");
    op_log.append(&Operation::create(Utc::now(), task)).unwrap();

    let complete = ChatResponse {
        content: "done".into(),
        tool_calls: vec![ToolCall {
            id: "1".into(),
            name: "task_complete".into(),
            input: serde_json::json!({"artifacts": ["README.md"]}),
        }],
        finish_reason: FinishReason::ToolCalls,
        usage: Some(Usage { input_tokens: 100, output_tokens: 50 }),
    };
    let agent: std::sync::Arc<dyn AgentProvider> = std::sync::Arc::new(MockAgent::new(vec![complete]));

    let summary = ralph::orchestrator::run_once(&config, agent, None, false).await.unwrap();

    assert_eq!(summary.tasks_processed, 1);
    assert_eq!(summary.tasks_succeeded, 1);
    assert_eq!(summary.tasks_failed, 0);

    let tasks = op_log.project().unwrap();
    let task = tasks.get("RALPH-001").unwrap();
    assert_eq!(task.status, oplog::TaskStatus::Done);

    let metrics_recorder = ralph::metrics::MetricsRecorder::new(config.storage.metrics_log());
    let recorded = metrics_recorder.all_task_metrics();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].task_id, "RALPH-001");
}

#[tokio::test]
async fn run_once_marks_a_task_blocked_when_the_agent_reports_a_blocker() {
    let dir = init_repo();
    let config = config_for(&dir);

    let op_log = OperationLog::new(config.storage.tasks_log());
    let task = Task::new("RALPH-002", TaskType::Bug, "Fix the flaky test");
    op_log.append(&Operation::create(Utc::now(), task)).unwrap();

    let blocked = ChatResponse {
        content: "stuck".into(),
        tool_calls: vec![ToolCall {
            id: "1".into(),
            name: "task_blocked".into(),
            input: serde_json::json!({"blocker": "missing test fixture"}),
        }],
        finish_reason: FinishReason::ToolCalls,
        usage: Some(Usage { input_tokens: 40, output_tokens: 10 }),
    };
    let agent: std::sync::Arc<dyn AgentProvider> = std::sync::Arc::new(MockAgent::new(vec![blocked]));

    let summary = ralph::orchestrator::run_once(&config, agent, None, false).await.unwrap();

    assert_eq!(summary.tasks_processed, 1);
    assert_eq!(summary.tasks_failed, 1);

    let tasks = op_log.project().unwrap();
    assert_eq!(tasks.get("RALPH-002").unwrap().status, oplog::TaskStatus::Blocked);
}

#[tokio::test]
async fn run_once_stops_immediately_when_no_task_is_selectable() {
    let dir = init_repo();
    let config = config_for(&dir);
    let agent: std::sync::Arc<dyn AgentProvider> = std::sync::Arc::new(MockAgent::new(Vec::new()));

    let summary = ralph::orchestrator::run_once(&config, agent, None, false).await.unwrap();

    assert_eq!(summary.tasks_processed, 0);
    assert_eq!(summary.stopped_reason, "no more selectable tasks");
}
