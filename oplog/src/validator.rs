//! Schema validation: identity, referential integrity and the status
//! lifecycle, checked against the projected state before an operation
//! is appended.

use crate::op::{OperationKind, Relation};
use crate::{Operation, TaskMap};

/// How the caller wants a failed validation handled. The validator
/// itself is policy-free; it only classifies. Call sites choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPolicy {
    /// Reject: the operation must not be appended.
    Strict,
    /// Log and apply anyway. Used for status updates so external drift
    /// (e.g. a tracker pull) can't deadlock the loop.
    Resilient,
}

/// `{rule, message, taskId, operation}` from spec §4.C.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{rule}: {message}")]
pub struct ValidationError {
    pub rule: &'static str,
    pub message: String,
    pub task_id: Option<String>,
    pub operation: Operation,
}

impl ValidationError {
    fn new(rule: &'static str, message: impl Into<String>, task_id: Option<String>, op: &Operation) -> Self {
        Self { rule, message: message.into(), task_id, operation: op.clone() }
    }
}

/// Stateless: validation only ever looks at the operation and the
/// projected state handed to it.
#[derive(Debug, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    /// Rules 1–6 of spec §4.C, run against `state` as it stands before
    /// `op` is applied.
    pub fn validate(&self, op: &Operation, state: &TaskMap) -> Result<(), ValidationError> {
        match &op.kind {
            OperationKind::Create { task } => {
                if state.contains_key(&task.id) {
                    return Err(ValidationError::new(
                        "unique_id",
                        format!("task {} already exists", task.id),
                        Some(task.id.clone()),
                        op,
                    ));
                }
                if let Some(parent) = &task.parent {
                    if !state.contains_key(parent) {
                        return Err(ValidationError::new(
                            "parent_exists",
                            format!("parent {parent} does not exist"),
                            Some(task.id.clone()),
                            op,
                        ));
                    }
                }
                for blocker in &task.blocked_by {
                    if !state.contains_key(blocker) {
                        return Err(ValidationError::new(
                            "blocker_exists",
                            format!("blocker {blocker} does not exist"),
                            Some(task.id.clone()),
                            op,
                        ));
                    }
                }
                if task.status == crate::TaskStatus::Done && task.completed_at.is_none() {
                    return Err(ValidationError::new(
                        "completed_at_required",
                        "status done requires completed_at",
                        Some(task.id.clone()),
                        op,
                    ));
                }
                Ok(())
            }
            OperationKind::Update { id, changes } => {
                let Some(existing) = state.get(id) else {
                    return Err(ValidationError::new(
                        "task_exists",
                        format!("task {id} does not exist"),
                        Some(id.clone()),
                        op,
                    ));
                };
                if let Some(parent) = &changes.parent {
                    if !state.contains_key(parent) {
                        return Err(ValidationError::new(
                            "parent_exists",
                            format!("parent {parent} does not exist"),
                            Some(id.clone()),
                            op,
                        ));
                    }
                }
                if let Some(blocked_by) = &changes.blocked_by {
                    for blocker in blocked_by {
                        if !state.contains_key(blocker) {
                            return Err(ValidationError::new(
                                "blocker_exists",
                                format!("blocker {blocker} does not exist"),
                                Some(id.clone()),
                                op,
                            ));
                        }
                    }
                }
                if let Some(new_status) = changes.status {
                    if new_status != existing.status && !existing.status.can_transition_to(new_status) {
                        return Err(ValidationError::new(
                            "valid_transition",
                            format!("{} -> {new_status} is not an allowed transition", existing.status),
                            Some(id.clone()),
                            op,
                        ));
                    }
                    if new_status == crate::TaskStatus::Done
                        && changes.completed_at.is_none()
                        && existing.completed_at.is_none()
                    {
                        return Err(ValidationError::new(
                            "completed_at_required",
                            "status done requires completed_at",
                            Some(id.clone()),
                            op,
                        ));
                    }
                }
                Ok(())
            }
            OperationKind::Link { id, .. } => {
                if !state.contains_key(id) {
                    return Err(ValidationError::new(
                        "task_exists",
                        format!("task {id} does not exist"),
                        Some(id.clone()),
                        op,
                    ));
                }
                Ok(())
            }
            OperationKind::Relate { id, relation, target_id } => {
                if !state.contains_key(id) {
                    return Err(ValidationError::new(
                        "task_exists",
                        format!("task {id} does not exist"),
                        Some(id.clone()),
                        op,
                    ));
                }
                let rule = match relation {
                    Relation::Parent => "parent_exists",
                    Relation::BlockedBy => "blocker_exists",
                    _ => "task_exists",
                };
                if !state.contains_key(target_id) {
                    return Err(ValidationError::new(
                        rule,
                        format!("{target_id} does not exist"),
                        Some(id.clone()),
                        op,
                    ));
                }
                Ok(())
            }
        }
    }
}
