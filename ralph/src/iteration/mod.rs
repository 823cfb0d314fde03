//! Bounded per-task iteration loop, spec §4.F. Grounded on the
//! teacher's `LoopEngine::run`/`run_iteration` shape: a `while` loop
//! that checks budgets, builds a prompt, calls the agent once, dispatches
//! every returned tool call, and interprets the result — simplified to
//! one agent call per iteration, which is what this spec describes.

pub mod hooks;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use oplog::{CompletionCriterion, Task};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentProvider, ChatResponse, FinishReason, Message, ToolDefinition};
use crate::config::{BudgetConfig, OnFailure};
use crate::git::GitOps;
use crate::logs::{JsonlFile, ProgressEvent};
use crate::sandbox::Sandbox;
use crate::tools::{self, TerminalSignal};
use hooks::{HookEvent, Hooks};

/// One executed tool call, spec glossary "Action".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub tool: String,
    pub target: String,
    pub duration_ms: u64,
    pub timestamp: chrono::DateTime<Utc>,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionReason {
    AgentDeclared,
    CompletionCriterion,
}

#[derive(Debug, Clone)]
pub enum IterationOutcome {
    Complete { artifacts: Vec<String>, summary: Option<String>, reason: CompletionReason },
    Blocked { reason: String },
    Failed { message: String },
    BudgetExceeded { reason: String },
}

impl IterationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, IterationOutcome::Complete { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            IterationOutcome::Complete { .. } => "complete",
            IterationOutcome::Blocked { .. } => "blocked",
            IterationOutcome::Failed { .. } => "failed",
            IterationOutcome::BudgetExceeded { .. } => "budget_exceeded",
        }
    }
}

/// The shared, run-wide half of the budget: wall time and cost that
/// accumulate across every task in the run.
pub struct RunBudgetState {
    pub run_start: Instant,
    pub run_cost: f64,
}

impl RunBudgetState {
    pub fn new() -> Self {
        Self { run_start: Instant::now(), run_cost: 0.0 }
    }
}

impl Default for RunBudgetState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TaskRunResult {
    pub outcome: IterationOutcome,
    pub cost: f64,
    pub iterations_used: u32,
    pub actions: Vec<Action>,
    /// Attempts that ended `Blocked` before this result, spec §4.I's
    /// per-task `blockers` metric field.
    pub blocked_attempts: u32,
}

pub struct IterationEngine {
    agent: Arc<dyn AgentProvider>,
    budgets: BudgetConfig,
    hooks: Hooks,
    tool_defs: Vec<ToolDefinition>,
}

impl IterationEngine {
    pub fn new(agent: Arc<dyn AgentProvider>, budgets: BudgetConfig) -> Self {
        Self { agent, budgets, hooks: Hooks::new(), tool_defs: crate::agent::core_tool_definitions() }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Run the bounded loop for one task, retrying per `onFailure`
    /// policy, then flushing or rolling back the sandbox and
    /// optionally committing on success.
    pub async fn run_task(
        &self,
        task: &Task,
        sandbox: &mut Sandbox,
        git: Option<&dyn GitOps>,
        run_state: &mut RunBudgetState,
        progress_log: &JsonlFile<ProgressEvent>,
    ) -> TaskRunResult {
        self.hooks.fire(HookEvent::TaskStart { task_id: &task.id });
        let mut attempt = 0u32;
        let mut blocked_attempts = 0u32;
        let result = loop {
            let attempt_result = self.run_attempt(task, sandbox, run_state, progress_log).await;
            if matches!(attempt_result.outcome, IterationOutcome::Blocked { .. }) {
                blocked_attempts += 1;
            }
            match &attempt_result.outcome {
                IterationOutcome::Complete { .. } => break attempt_result,
                IterationOutcome::BudgetExceeded { .. } => {
                    sandbox.rollback();
                    break attempt_result;
                }
                IterationOutcome::Blocked { .. } | IterationOutcome::Failed { .. } => {
                    if self.budgets.on_failure == OnFailure::Retry && attempt < self.budgets.max_retries {
                        sandbox.rollback();
                        attempt += 1;
                        continue;
                    }
                    sandbox.rollback();
                    break attempt_result;
                }
            }
        };
        let result = TaskRunResult { blocked_attempts, ..result };

        let result = if result.outcome.is_success() {
            match sandbox.flush() {
                Ok(_changes) => {
                    if self.budgets.auto_commit {
                        if let Some(git) = git {
                            let message = format!("{}{}: {}", self.budgets.commit_prefix, task.id, task.title);
                            if let Err(e) = git.add_all().and_then(|_| git.commit(&message)) {
                                tracing::warn!(task_id = %task.id, error = %e, "commit after task completion failed");
                            }
                        }
                    }
                    result
                }
                Err(e) => TaskRunResult {
                    outcome: IterationOutcome::Failed { message: format!("sandbox flush failed: {e}") },
                    ..result
                },
            }
        } else {
            result
        };

        self.hooks.fire(HookEvent::TaskEnd { task_id: &task.id, outcome: result.outcome.label() });
        result
    }

    async fn run_attempt(
        &self,
        task: &Task,
        sandbox: &mut Sandbox,
        run_state: &mut RunBudgetState,
        progress_log: &JsonlFile<ProgressEvent>,
    ) -> TaskRunResult {
        let task_start = Instant::now();
        let mut history: Vec<Message> = vec![Message::system(format!(
            "You are working task {} ({}): {}",
            task.id, task.task_type_label(), task.title
        ))];
        let mut task_cost = 0.0f64;
        let mut actions = Vec::new();
        let bash_timeout = Duration::from_secs(self.budgets.command_timeout_secs);

        for iteration in 1..=self.budgets.max_iterations_per_task {
            self.hooks.fire(HookEvent::IterationStart { task_id: &task.id, iteration });

            if task_start.elapsed() > Duration::from_secs(self.budgets.max_time_per_task_secs) {
                return self.terminal(
                    IterationOutcome::BudgetExceeded { reason: "task time budget exceeded".into() },
                    task_cost,
                    iteration - 1,
                    actions,
                );
            }
            if run_state.run_start.elapsed() > Duration::from_secs(self.budgets.max_time_per_run_secs) {
                return self.terminal(
                    IterationOutcome::BudgetExceeded { reason: "run time budget exceeded".into() },
                    task_cost,
                    iteration - 1,
                    actions,
                );
            }
            if task_cost >= self.budgets.max_cost_per_task || run_state.run_cost >= self.budgets.max_cost_per_run {
                return self.terminal(
                    IterationOutcome::BudgetExceeded { reason: "cost budget exceeded".into() },
                    task_cost,
                    iteration - 1,
                    actions,
                );
            }

            let prompt = self.build_prompt(task, sandbox, iteration);
            history.push(Message::user(prompt));

            let response = match self.agent.chat(&history, &self.tool_defs).await {
                Ok(response) => response,
                Err(e) => {
                    return self.terminal(
                        IterationOutcome::Failed { message: format!("agent error: {e}") },
                        task_cost,
                        iteration,
                        actions,
                    );
                }
            };
            history.push(Message::assistant(response.content.clone()));

            let iteration_cost = self.estimate_cost(&response);
            task_cost += iteration_cost;
            run_state.run_cost += iteration_cost;

            let mut terminal_signal = None;
            for call in &response.tool_calls {
                let started = Instant::now();
                let outcome = tools::execute(call, sandbox, bash_timeout).await;
                let action = Action {
                    tool: call.name.clone(),
                    target: call.input.to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    timestamp: Utc::now(),
                    output: outcome.content.clone(),
                };
                self.hooks.fire(HookEvent::Action { task_id: &task.id, action: &action });
                actions.push(action);
                history.push(Message::tool_result(call.id.clone(), outcome.content));

                // `task_complete` outranks `task_blocked` regardless of call
                // order, spec §4.F step 8.
                match (&terminal_signal, tools::terminal_signal(call)) {
                    (Some(TerminalSignal::Complete { .. }), _) => {}
                    (_, Some(signal)) => terminal_signal = Some(signal),
                    (_, None) => {}
                }
            }

            let completion_via_criterion = self.check_completion_criterion(task, sandbox, bash_timeout).await;

            let outcome = match terminal_signal {
                Some(TerminalSignal::Complete { artifacts, summary }) => Some(IterationOutcome::Complete {
                    artifacts,
                    summary,
                    reason: CompletionReason::AgentDeclared,
                }),
                Some(TerminalSignal::Blocked { blocker }) => Some(IterationOutcome::Blocked { reason: blocker }),
                None if response.finish_reason == FinishReason::Error => {
                    Some(IterationOutcome::Failed { message: "agent finished with an error".into() })
                }
                None if completion_via_criterion => Some(IterationOutcome::Complete {
                    artifacts: Vec::new(),
                    summary: None,
                    reason: CompletionReason::CompletionCriterion,
                }),
                None => None,
            };

            self.append_progress(progress_log, task, iteration, iteration_cost, outcome.as_ref());
            self.hooks.fire(HookEvent::IterationEnd {
                task_id: &task.id,
                iteration,
                result: outcome.as_ref().map(IterationOutcome::label).unwrap_or("continue"),
            });

            if let Some(outcome) = outcome {
                return TaskRunResult { outcome, cost: task_cost, iterations_used: iteration, actions, blocked_attempts: 0 };
            }
        }

        self.terminal(
            IterationOutcome::BudgetExceeded { reason: "max iterations reached".into() },
            task_cost,
            self.budgets.max_iterations_per_task,
            actions,
        )
    }

    fn terminal(
        &self,
        outcome: IterationOutcome,
        cost: f64,
        iterations_used: u32,
        actions: Vec<Action>,
    ) -> TaskRunResult {
        TaskRunResult { outcome, cost, iterations_used, actions, blocked_attempts: 0 }
    }

    fn build_prompt(&self, task: &Task, sandbox: &mut Sandbox, iteration: u32) -> String {
        let spec_content = task.spec.as_ref().and_then(|p| sandbox.read_file(p).ok());
        let mut prompt = format!("Task {}: {}\nIteration: {iteration}\n", task.id, task.title);
        prompt.push_str(&format!("Description: {}\n", task.description));
        if let Some(spec) = spec_content {
            prompt.push_str("---- spec ----\n");
            prompt.push_str(&spec);
            prompt.push('\n');
        }
        if let Some(criterion) = &task.completion {
            prompt.push_str(&format!("Completion criterion: {criterion:?}\n"));
        }
        prompt
    }

    fn estimate_cost(&self, response: &ChatResponse) -> f64 {
        match &response.usage {
            Some(usage) => {
                (usage.input_tokens as f64 / 1000.0) * self.budgets.input_cost_per_1k
                    + (usage.output_tokens as f64 / 1000.0) * self.budgets.output_cost_per_1k
            }
            None => 0.0,
        }
    }

    async fn check_completion_criterion(&self, task: &Task, sandbox: &mut Sandbox, timeout: Duration) -> bool {
        match &task.completion {
            Some(CompletionCriterion::FileExists { path }) => sandbox.exists(path),
            Some(CompletionCriterion::CommandExits { command, code }) => {
                sandbox.bash(command, timeout).await.exit_code == *code
            }
            None => false,
        }
    }

    fn append_progress(
        &self,
        log: &JsonlFile<ProgressEvent>,
        task: &Task,
        iteration: u32,
        cost: f64,
        outcome: Option<&IterationOutcome>,
    ) {
        let result_status = outcome.map(IterationOutcome::label).unwrap_or("continue").to_string();
        let event = ProgressEvent::Iteration {
            task_id: task.id.clone(),
            iteration,
            result_status,
            cost,
            timestamp: Utc::now(),
        };
        if let Err(e) = log.append(&event) {
            tracing::warn!(task_id = %task.id, error = %e, "failed to append progress record");
        }
    }
}

trait TaskTypeLabel {
    fn task_type_label(&self) -> &'static str;
}

impl TaskTypeLabel for Task {
    fn task_type_label(&self) -> &'static str {
        use oplog::TaskType::*;
        match self.task_type {
            Epic => "epic",
            Feature => "feature",
            Task => "task",
            Subtask => "subtask",
            Bug => "bug",
            Refactor => "refactor",
            Docs => "docs",
            Test => "test",
            Spike => "spike",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mock::MockAgent;
    use crate::agent::{FinishReason, ToolCall, Usage};
    use crate::config::SandboxConfig;
    use oplog::TaskType;
    use tempfile::tempdir;

    fn engine(agent: MockAgent) -> IterationEngine {
        IterationEngine::new(Arc::new(agent), BudgetConfig { max_iterations_per_task: 5, ..Default::default() })
    }

    #[tokio::test]
    async fn completes_when_agent_calls_task_complete() {
        let complete = ChatResponse {
            content: "done".into(),
            tool_calls: vec![ToolCall {
                id: "1".into(),
                name: "task_complete".into(),
                input: serde_json::json!({"artifacts": ["out.txt"]}),
            }],
            finish_reason: FinishReason::ToolCalls,
            usage: Some(Usage { input_tokens: 100, output_tokens: 50 }),
        };
        let engine = engine(MockAgent::new(vec![complete]));
        let task = Task::new("RALPH-001", TaskType::Task, "Ship it");
        let dir = tempdir().unwrap();
        let mut sandbox = Sandbox::new(dir.path(), SandboxConfig::default());
        let progress = JsonlFile::new(dir.path().join("progress.jsonl"));
        let mut run_state = RunBudgetState::new();

        let result = engine.run_task(&task, &mut sandbox, None, &mut run_state, &progress).await;
        assert!(result.outcome.is_success());
        assert_eq!(result.iterations_used, 1);
        assert!(result.cost > 0.0);
    }

    #[tokio::test]
    async fn completion_criterion_short_circuits_without_agent_declaring() {
        let write_file = ChatResponse {
            content: "writing the file".into(),
            tool_calls: vec![ToolCall {
                id: "1".into(),
                name: "write_file".into(),
                input: serde_json::json!({"path": "out.txt", "content": "done"}),
            }],
            finish_reason: FinishReason::ToolCalls,
            usage: None,
        };
        let engine = engine(MockAgent::new(vec![write_file]));
        let mut task = Task::new("RALPH-001", TaskType::Task, "Write output");
        task.completion = Some(CompletionCriterion::FileExists { path: "out.txt".into() });
        let dir = tempdir().unwrap();
        let mut sandbox = Sandbox::new(dir.path(), SandboxConfig::default());
        let progress = JsonlFile::new(dir.path().join("progress.jsonl"));
        let mut run_state = RunBudgetState::new();

        let result = engine.run_task(&task, &mut sandbox, None, &mut run_state, &progress).await;
        assert!(matches!(
            result.outcome,
            IterationOutcome::Complete { reason: CompletionReason::CompletionCriterion, .. }
        ));
        assert_eq!(result.iterations_used, 1);
        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "done");
    }

    #[tokio::test]
    async fn task_blocked_call_is_terminal() {
        let blocked = ChatResponse {
            content: "cannot proceed".into(),
            tool_calls: vec![ToolCall {
                id: "1".into(),
                name: "task_blocked".into(),
                input: serde_json::json!({"blocker": "missing API key"}),
            }],
            finish_reason: FinishReason::ToolCalls,
            usage: None,
        };
        let engine = engine(MockAgent::new(vec![blocked]));
        let task = Task::new("RALPH-001", TaskType::Task, "Call external API");
        let dir = tempdir().unwrap();
        let mut sandbox = Sandbox::new(dir.path(), SandboxConfig::default());
        let progress = JsonlFile::new(dir.path().join("progress.jsonl"));
        let mut run_state = RunBudgetState::new();

        let result = engine.run_task(&task, &mut sandbox, None, &mut run_state, &progress).await;
        assert!(matches!(result.outcome, IterationOutcome::Blocked { reason } if reason == "missing API key"));
    }

    #[tokio::test]
    async fn exhausting_iterations_without_terminal_is_budget_exceeded() {
        let continuing = || ChatResponse {
            content: "still working".into(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: None,
        };
        let engine = engine(MockAgent::new(vec![continuing(), continuing(), continuing(), continuing(), continuing()]));
        let task = Task::new("RALPH-001", TaskType::Task, "Never finishes");
        let dir = tempdir().unwrap();
        let mut sandbox = Sandbox::new(dir.path(), SandboxConfig::default());
        let progress = JsonlFile::new(dir.path().join("progress.jsonl"));
        let mut run_state = RunBudgetState::new();

        let result = engine.run_task(&task, &mut sandbox, None, &mut run_state, &progress).await;
        assert!(matches!(result.outcome, IterationOutcome::BudgetExceeded { .. }));
        assert_eq!(result.iterations_used, 5);
    }
}
