//! The pure fold from an operation sequence to a keyed task map.
//!
//! `project` must never hold hidden state: given the same slice of
//! operations it always returns the same map. Everything else in the
//! crate reads tasks only through this function.

use crate::op::{OperationKind, Relation};
use crate::task::Task;
use crate::{Operation, TaskMap};

/// Fold the whole log from scratch.
pub fn project(ops: &[Operation]) -> TaskMap {
    let mut state = TaskMap::new();
    for op in ops {
        apply(&mut state, op);
    }
    state
}

/// Fold a single operation into an existing state. Exposed separately
/// so callers validating-then-appending one operation at a time don't
/// have to re-fold the whole log.
pub fn apply(state: &mut TaskMap, op: &Operation) {
    match &op.kind {
        OperationKind::Create { task } => {
            state.entry(task.id.clone()).or_insert_with(|| task.clone());
        }
        OperationKind::Update { id, changes } => {
            let Some(existing) = state.get_mut(id) else {
                tracing::debug!(task_id = %id, "projector: update for unknown task skipped");
                return;
            };
            apply_changes(existing, changes);
            existing.updated_at = op.timestamp;
        }
        OperationKind::Link { id, external_id, external_url } => {
            let Some(existing) = state.get_mut(id) else {
                tracing::debug!(task_id = %id, "projector: link for unknown task skipped");
                return;
            };
            existing.external_id = Some(external_id.clone());
            existing.external_url = external_url.clone();
            existing.updated_at = op.timestamp;
        }
        OperationKind::Relate { id, relation, target_id } => {
            if !state.contains_key(id) || !state.contains_key(target_id) {
                tracing::debug!(task_id = %id, target = %target_id, "projector: relate with missing endpoint skipped");
                return;
            }
            let timestamp = op.timestamp;
            let Some(existing) = state.get_mut(id) else { return };
            match relation {
                Relation::Blocks => {
                    existing.blocks.insert(target_id.clone());
                }
                Relation::BlockedBy => {
                    existing.blocked_by.insert(target_id.clone());
                }
                Relation::Parent => {
                    existing.parent = Some(target_id.clone());
                }
                Relation::Subtask => {
                    if !existing.subtasks.contains(target_id) {
                        existing.subtasks.push(target_id.clone());
                    }
                }
            }
            existing.updated_at = timestamp;
        }
    }
}

fn apply_changes(task: &mut Task, changes: &crate::op::TaskChanges) {
    macro_rules! merge {
        ($field:ident) => {
            if let Some(v) = changes.$field.clone() {
                task.$field = v;
            }
        };
    }
    if let Some(status) = changes.status {
        task.status = status;
    }
    merge!(title);
    merge!(description);
    if changes.completed_at.is_some() {
        task.completed_at = changes.completed_at;
    }
    merge!(parent);
    merge!(blocked_by);
    merge!(blocks);
    merge!(aggregate);
    merge!(domain);
    merge!(tags);
    merge!(priority);
    if changes.complexity.is_some() {
        task.complexity = changes.complexity;
    }
    if changes.estimate.is_some() {
        task.estimate = changes.estimate;
    }
    if changes.actual.is_some() {
        task.actual = changes.actual;
    }
    merge!(spec);
    if changes.source.is_some() {
        task.source = changes.source.clone();
    }
    if changes.completion.is_some() {
        task.completion = changes.completion.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::TaskChanges;
    use crate::task::{TaskStatus, TaskType};
    use chrono::{TimeZone, Utc};

    fn ts(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut ops = vec![Operation::create(ts(0), Task::new("RALPH-001", TaskType::Task, "Ship it"))];
        ops.push(Operation::update(ts(1), "RALPH-001", TaskChanges::status(TaskStatus::Pending)));
        ops.push(Operation::update(ts(2), "RALPH-001", TaskChanges::status(TaskStatus::InProgress)));
        ops.push(Operation::update(ts(3), "RALPH-001", TaskChanges::status_done(ts(3))));

        let state = project(&ops);
        assert_eq!(state.len(), 1);
        let task = &state["RALPH-001"];
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(task.completed_at, Some(ts(3)));
    }

    #[test]
    fn update_on_unknown_task_is_silently_skipped() {
        let ops = vec![Operation::update(ts(0), "RALPH-999", TaskChanges::status(TaskStatus::Pending))];
        let state = project(&ops);
        assert!(state.is_empty());
    }

    #[test]
    fn relate_initializes_collections_on_first_use() {
        let mut ops = vec![
            Operation::create(ts(0), Task::new("RALPH-001", TaskType::Task, "A")),
            Operation::create(ts(0), Task::new("RALPH-002", TaskType::Task, "B")),
        ];
        ops.push(Operation::relate(ts(1), "RALPH-001", Relation::Blocks, "RALPH-002"));
        ops.push(Operation::relate(ts(2), "RALPH-002", Relation::BlockedBy, "RALPH-001"));

        let state = project(&ops);
        assert!(state["RALPH-001"].blocks.contains("RALPH-002"));
        assert!(state["RALPH-002"].blocked_by.contains("RALPH-001"));
    }

    #[test]
    fn replay_is_deterministic() {
        let ops = vec![
            Operation::create(ts(0), Task::new("RALPH-001", TaskType::Bug, "Flaky test")),
            Operation::update(ts(1), "RALPH-001", TaskChanges::status(TaskStatus::Pending)),
        ];
        assert_eq!(project(&ops), project(&ops));
    }

    #[test]
    fn relate_with_missing_endpoint_is_skipped() {
        let ops = vec![
            Operation::create(ts(0), Task::new("RALPH-001", TaskType::Task, "A")),
            Operation::relate(ts(1), "RALPH-001", Relation::Blocks, "RALPH-GHOST"),
        ];
        let state = project(&ops);
        assert!(state["RALPH-001"].blocks.is_empty());
    }
}
