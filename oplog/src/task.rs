//! The task record and the closed status lifecycle.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the nine kinds of work a task can represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Epic,
    Feature,
    Task,
    Subtask,
    Bug,
    Refactor,
    Docs,
    Test,
    Spike,
}

/// The seven states a task can occupy, and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Discovered,
    Pending,
    InProgress,
    Blocked,
    Review,
    Done,
    Cancelled,
}

impl TaskStatus {
    /// True once a task can no longer leave this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }

    /// The closed transition table from spec §3.2. `from == to` is not a
    /// transition at all (callers should treat it as a no-op before
    /// consulting this table).
    pub fn allowed_targets(self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Discovered => &[Pending, Cancelled],
            Pending => &[InProgress, Blocked, Cancelled],
            InProgress => &[Done, Blocked, Review, Cancelled],
            Blocked => &[Pending, Cancelled],
            Review => &[Done, Cancelled],
            Done => &[],
            Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, target: TaskStatus) -> bool {
        self.allowed_targets().contains(&target)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Discovered => "discovered",
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    /// Ordinal used by the `complexity_signal` detector to check that
    /// mean duration rises monotonically with complexity.
    pub fn ordinal(self) -> u8 {
        match self {
            Complexity::Trivial => 0,
            Complexity::Simple => 1,
            Complexity::Moderate => 2,
            Complexity::Complex => 3,
        }
    }
}

/// Origin record: where a task was discovered from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub path: String,
    pub line: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

/// A task-defined completion criterion, checked independently of whether
/// the agent calls `task_complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionCriterion {
    /// Holds when `path` exists in the sandbox workspace.
    FileExists { path: String },
    /// Holds when running `command` through the sandbox exits with
    /// `code` (default 0).
    CommandExits {
        command: String,
        #[serde(default)]
        code: i32,
    },
}

/// The unit of work. Owned exclusively by the operation log: nothing
/// outside [`crate::projector`] is allowed to construct one from
/// scratch or mutate one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub blocks: BTreeSet<String>,
    #[serde(default)]
    pub blocked_by: BTreeSet<String>,

    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,

    #[serde(default)]
    pub aggregate: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub complexity: Option<Complexity>,
    #[serde(default)]
    pub estimate: Option<f64>,
    #[serde(default)]
    pub actual: Option<f64>,

    #[serde(default)]
    pub spec: Option<String>,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub completion: Option<CompletionCriterion>,
}

impl Task {
    /// Construct a fresh task in the `discovered` state, the way a
    /// `create` operation's payload is built before it is appended.
    pub fn new(id: impl Into<String>, task_type: TaskType, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            task_type,
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Discovered,
            created_at: now,
            updated_at: now,
            completed_at: None,
            parent: None,
            subtasks: Vec::new(),
            blocks: BTreeSet::new(),
            blocked_by: BTreeSet::new(),
            external_id: None,
            external_url: None,
            aggregate: None,
            domain: None,
            tags: BTreeSet::new(),
            priority: 0,
            complexity: None,
            estimate: None,
            actual: None,
            spec: None,
            source: None,
            completion: None,
        }
    }

    pub fn is_blocked_given(&self, tasks: &std::collections::BTreeMap<String, Task>) -> bool {
        self.blocked_by.iter().any(|b| match tasks.get(b) {
            Some(blocker) => !blocker.status.is_terminal(),
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_table_matches_spec() {
        assert!(TaskStatus::Discovered.can_transition_to(TaskStatus::Pending));
        assert!(TaskStatus::Discovered.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Discovered.can_transition_to(TaskStatus::Done));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Review));
        assert!(TaskStatus::Done.allowed_targets().is_empty());
        assert!(TaskStatus::Cancelled.allowed_targets().is_empty());
    }

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
    }

    #[test]
    fn new_task_starts_discovered() {
        let t = Task::new("RALPH-001", TaskType::Task, "Do the thing");
        assert_eq!(t.status, TaskStatus::Discovered);
        assert_eq!(t.created_at, t.updated_at);
        assert!(t.completed_at.is_none());
    }

    #[test]
    fn absent_blocker_does_not_block() {
        let mut t = Task::new("RALPH-002", TaskType::Task, "Blocked on ghost");
        t.blocked_by.insert("RALPH-999".into());
        let tasks = std::collections::BTreeMap::new();
        assert!(!t.is_blocked_given(&tasks));
    }
}
