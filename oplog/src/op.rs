//! The four operation kinds that may be appended to the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{Complexity, CompletionCriterion, Source, Task, TaskStatus, TaskType};

/// An edge kind a `relate` operation can add between two tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Blocks,
    BlockedBy,
    Parent,
    Subtask,
}

/// A partial update merged field-by-field into an existing task.
/// `None` means "leave as-is"; collection fields are replaced wholesale
/// when present, not appended to (appending is what `relate` is for).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<std::collections::BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<std::collections::BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<std::collections::BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionCriterion>,
}

impl TaskChanges {
    pub fn status(status: TaskStatus) -> Self {
        Self { status: Some(status), ..Default::default() }
    }

    pub fn status_done(completed_at: DateTime<Utc>) -> Self {
        Self { status: Some(TaskStatus::Done), completed_at: Some(completed_at), ..Default::default() }
    }
}

/// The kind-specific payload of an [`Operation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperationKind {
    Create { task: Task },
    Update { id: String, changes: TaskChanges },
    Link { id: String, external_id: String, external_url: Option<String> },
    Relate { id: String, relation: Relation, target_id: String },
}

impl OperationKind {
    /// The task id this operation is primarily about, for error
    /// reporting and indexing.
    pub fn subject_id(&self) -> &str {
        match self {
            OperationKind::Create { task } => &task.id,
            OperationKind::Update { id, .. } => id,
            OperationKind::Link { id, .. } => id,
            OperationKind::Relate { id, .. } => id,
        }
    }
}

/// One journaled mutation, tagged with when it happened. The log is an
/// ordered sequence of these; order is the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: OperationKind,
}

impl Operation {
    pub fn new(timestamp: DateTime<Utc>, kind: OperationKind) -> Self {
        Self { timestamp, kind }
    }

    pub fn create(timestamp: DateTime<Utc>, task: Task) -> Self {
        Self::new(timestamp, OperationKind::Create { task })
    }

    pub fn update(timestamp: DateTime<Utc>, id: impl Into<String>, changes: TaskChanges) -> Self {
        Self::new(timestamp, OperationKind::Update { id: id.into(), changes })
    }

    pub fn link(
        timestamp: DateTime<Utc>,
        id: impl Into<String>,
        external_id: impl Into<String>,
        external_url: Option<String>,
    ) -> Self {
        Self::new(timestamp, OperationKind::Link { id: id.into(), external_id: external_id.into(), external_url })
    }

    pub fn relate(
        timestamp: DateTime<Utc>,
        id: impl Into<String>,
        relation: Relation,
        target_id: impl Into<String>,
    ) -> Self {
        Self::new(timestamp, OperationKind::Relate { id: id.into(), relation, target_id: target_id.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let task = Task::new("RALPH-001", TaskType::Task, "Wire up logging");
        let op = Operation::create(Utc::now(), task);
        let line = serde_json::to_string(&op).unwrap();
        let back: Operation = serde_json::from_str(&line).unwrap();
        assert_eq!(op, back);
    }

    #[test]
    fn update_serializes_only_set_fields() {
        let op = Operation::update(Utc::now(), "RALPH-001", TaskChanges::status(TaskStatus::Pending));
        let value: serde_json::Value = serde_json::to_value(&op).unwrap();
        let changes = &value["changes"];
        assert_eq!(changes["status"], "pending");
        assert!(changes.get("title").is_none());
    }
}
