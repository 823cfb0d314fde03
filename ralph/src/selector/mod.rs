//! Task selector / readiness gate, spec §4.G.

use oplog::{Task, TaskMap, TaskStatus};

/// Pick the next task to work on.
///
/// With an explicit filter: return that task id iff it exists and is
/// not terminal (blocked tasks are still returned — the caller asked
/// for them by name).
///
/// Without a filter: candidates are `{pending, in_progress,
/// discovered}` tasks that aren't blocked, sorted in-progress-first,
/// then priority descending, then `created_at` ascending.
pub fn select<'a>(tasks: &'a TaskMap, filter: Option<&str>) -> Option<&'a Task> {
    if let Some(id) = filter {
        return tasks.get(id).filter(|t| !t.status.is_terminal());
    }

    let mut candidates: Vec<&Task> = tasks
        .values()
        .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::InProgress | TaskStatus::Discovered))
        .filter(|t| !t.is_blocked_given(tasks))
        .collect();

    candidates.sort_by(|a, b| {
        let a_in_progress = a.status == TaskStatus::InProgress;
        let b_in_progress = b.status == TaskStatus::InProgress;
        b_in_progress
            .cmp(&a_in_progress)
            .then(b.priority.cmp(&a.priority))
            .then(a.created_at.cmp(&b.created_at))
    });

    candidates.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use oplog::TaskType;

    fn task(id: &str, status: TaskStatus, priority: i64, created_secs: i64) -> Task {
        let mut t = Task::new(id, TaskType::Task, id);
        t.status = status;
        t.priority = priority;
        t.created_at = Utc.timestamp_opt(1_700_000_000 + created_secs, 0).unwrap();
        t.updated_at = t.created_at;
        t
    }

    #[test]
    fn selector_ordering_matches_spec_scenario() {
        let mut tasks = TaskMap::new();
        let a = task("A", TaskStatus::Pending, 1, 0);
        let b = task("B", TaskStatus::InProgress, 0, 1);
        let c = task("C", TaskStatus::Pending, 5, 2);
        let mut d = task("D", TaskStatus::Pending, 9, 3);
        d.blocked_by.insert("A".into());
        tasks.insert("A".into(), a);
        tasks.insert("B".into(), b);
        tasks.insert("C".into(), c);
        tasks.insert("D".into(), d);

        let picked = select(&tasks, None).unwrap();
        assert_eq!(picked.id, "B");

        tasks.get_mut("B").unwrap().status = TaskStatus::Done;
        let picked = select(&tasks, None).unwrap();
        assert_eq!(picked.id, "C", "priority beats age once B is out of the running");

        // D stays blocked until A terminates.
        assert_ne!(picked.id, "D");
        tasks.get_mut("A").unwrap().status = TaskStatus::Cancelled;
        let picked = select(&tasks, None).unwrap();
        assert_eq!(picked.id, "D");
    }

    #[test]
    fn filter_returns_blocked_task_when_named_explicitly() {
        let mut tasks = TaskMap::new();
        let mut blocked = task("A", TaskStatus::Blocked, 0, 0);
        blocked.status = TaskStatus::Blocked;
        tasks.insert("A".into(), blocked);
        assert_eq!(select(&tasks, Some("A")).unwrap().id, "A");
    }

    #[test]
    fn filter_on_terminal_task_returns_none() {
        let mut tasks = TaskMap::new();
        tasks.insert("A".into(), task("A", TaskStatus::Done, 0, 0));
        assert!(select(&tasks, Some("A")).is_none());
    }

    #[test]
    fn absent_blocker_never_blocks() {
        let mut tasks = TaskMap::new();
        let mut t = task("A", TaskStatus::Pending, 0, 0);
        t.blocked_by.insert("GHOST".into());
        tasks.insert("A".into(), t);
        assert_eq!(select(&tasks, None).unwrap().id, "A");
    }
}
