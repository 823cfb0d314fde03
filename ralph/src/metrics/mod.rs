//! Metrics recorder, spec §4.I: per-task records appended as each task
//! completes, plus an aggregate rollup computed on demand (the `learn`
//! and `dashboard` commands, and the pattern detectors).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use oplog::{Complexity, Task, TaskMap, TaskStatus, TaskType};
use serde::{Deserialize, Serialize};

use crate::logs::JsonlFile;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetric {
    pub task_id: String,
    pub task_type: TaskType,
    pub aggregate: Option<String>,
    pub domain: Option<String>,
    pub tags: Vec<String>,
    pub complexity: Option<Complexity>,
    pub estimate: Option<f64>,
    pub actual: Option<f64>,
    pub iterations: u32,
    pub duration_days: f64,
    pub files_changed: u32,
    pub lines_changed: u32,
    pub blockers: u32,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub period_label: String,
    pub tasks_completed: u32,
    pub tasks_created: u32,
    pub tasks_failed: u32,
    pub duration_p50_days: f64,
    pub duration_p90_days: f64,
    pub avg_iterations: f64,
    pub total_commits: u32,
    pub total_files_changed: u32,
    pub estimate_accuracy: f64,
    pub blocker_count: u32,
    pub bug_count: u32,
    pub by_type: BTreeMap<String, u32>,
    pub by_aggregate: BTreeMap<String, u32>,
    pub by_complexity: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricRecord {
    Task(TaskMetric),
    Aggregate(AggregateMetrics),
}

pub struct MetricsRecorder {
    log: JsonlFile<MetricRecord>,
}

impl MetricsRecorder {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { log: JsonlFile::new(path) }
    }

    pub fn record_task_completion(
        &self,
        task: &Task,
        iterations: u32,
        files_changed: u32,
        lines_changed: u32,
        blockers: u32,
    ) -> TaskMetric {
        let completed_at = task.completed_at.unwrap_or_else(Utc::now);
        let duration_days = (completed_at - task.created_at).num_seconds() as f64 / 86_400.0;
        let metric = TaskMetric {
            task_id: task.id.clone(),
            task_type: task.task_type,
            aggregate: task.aggregate.clone(),
            domain: task.domain.clone(),
            tags: task.tags.iter().cloned().collect(),
            complexity: task.complexity,
            estimate: task.estimate,
            actual: task.actual,
            iterations,
            duration_days,
            files_changed,
            lines_changed,
            blockers,
            completed_at,
        };
        if let Err(e) = self.log.append(&MetricRecord::Task(metric.clone())) {
            tracing::warn!(task_id = %task.id, error = %e, "failed to append task metric record");
        }
        metric
    }

    pub fn all_task_metrics(&self) -> Vec<TaskMetric> {
        self.log
            .read_all()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| match r {
                MetricRecord::Task(t) => Some(t),
                MetricRecord::Aggregate(_) => None,
            })
            .collect()
    }

    pub fn record_aggregate(&self, aggregate: AggregateMetrics) {
        if let Err(e) = self.log.append(&MetricRecord::Aggregate(aggregate)) {
            tracing::warn!(error = %e, "failed to append aggregate metric record");
        }
    }
}

/// Compute the rollup over `tasks` and the accumulated `task_metrics`,
/// spec §4.I.
pub fn compute_aggregate(period_label: &str, tasks: &TaskMap, task_metrics: &[TaskMetric]) -> AggregateMetrics {
    let tasks_completed = tasks.values().filter(|t| t.status == TaskStatus::Done).count() as u32;
    let tasks_created = tasks.len() as u32;
    let tasks_failed = tasks.values().filter(|t| t.status == TaskStatus::Blocked).count() as u32;

    let mut durations: Vec<f64> = task_metrics.iter().map(|m| m.duration_days).collect();
    durations.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let duration_p50_days = percentile(&durations, 0.50);
    let duration_p90_days = percentile(&durations, 0.90);

    let avg_iterations = if task_metrics.is_empty() {
        0.0
    } else {
        task_metrics.iter().map(|m| m.iterations as f64).sum::<f64>() / task_metrics.len() as f64
    };

    let total_commits = task_metrics.len() as u32; // one commit per completed task, spec §4.F "on success ... commit"
    let total_files_changed = task_metrics.iter().map(|m| m.files_changed).sum();

    let accurate = task_metrics
        .iter()
        .filter(|m| match (m.actual, m.estimate) {
            (Some(actual), Some(estimate)) if estimate > 0.0 => {
                let ratio = actual / estimate;
                (0.8..=1.2).contains(&ratio)
            }
            _ => false,
        })
        .count();
    let with_both = task_metrics.iter().filter(|m| m.actual.is_some() && m.estimate.is_some()).count();
    let estimate_accuracy = if with_both == 0 { 0.0 } else { accurate as f64 / with_both as f64 };

    let blocker_count: u32 = task_metrics.iter().map(|m| m.blockers).sum();
    let bug_count = task_metrics.iter().filter(|m| m.task_type == TaskType::Bug).count() as u32;

    let mut by_type = BTreeMap::new();
    let mut by_aggregate = BTreeMap::new();
    let mut by_complexity = BTreeMap::new();
    for m in task_metrics {
        *by_type.entry(format!("{:?}", m.task_type)).or_insert(0) += 1;
        if let Some(agg) = &m.aggregate {
            *by_aggregate.entry(agg.clone()).or_insert(0) += 1;
        }
        if let Some(c) = m.complexity {
            *by_complexity.entry(format!("{c:?}")).or_insert(0) += 1;
        }
    }

    AggregateMetrics {
        period_label: period_label.to_string(),
        tasks_completed,
        tasks_created,
        tasks_failed,
        duration_p50_days,
        duration_p90_days,
        avg_iterations,
        total_commits,
        total_files_changed,
        estimate_accuracy,
        blocker_count,
        bug_count,
        by_type,
        by_aggregate,
        by_complexity,
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

/// Map used by detectors to correlate historical bucket sizes.
pub fn count_by_aggregate(tasks: &TaskMap) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for t in tasks.values() {
        if let Some(agg) = &t.aggregate {
            *counts.entry(agg.clone()).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use oplog::TaskType;
    use tempfile::tempdir;

    #[test]
    fn records_and_reads_back_task_metrics() {
        let dir = tempdir().unwrap();
        let recorder = MetricsRecorder::new(dir.path().join("metrics.jsonl"));
        let mut task = Task::new("RALPH-001", TaskType::Task, "Ship it");
        task.completed_at = Some(task.created_at + chrono::Duration::days(2));
        task.estimate = Some(3.0);
        task.actual = Some(3.2);
        let metric = recorder.record_task_completion(&task, 4, 2, 30, 0);
        assert!((metric.duration_days - 2.0).abs() < 0.01);
        assert_eq!(recorder.all_task_metrics().len(), 1);
    }

    #[test]
    fn estimate_accuracy_uses_0_8_to_1_2_band() {
        let metrics = vec![
            TaskMetric {
                task_id: "A".into(),
                task_type: TaskType::Task,
                aggregate: None,
                domain: None,
                tags: vec![],
                complexity: None,
                estimate: Some(10.0),
                actual: Some(11.0),
                iterations: 3,
                duration_days: 1.0,
                files_changed: 1,
                lines_changed: 10,
                blockers: 0,
                completed_at: Utc::now(),
            },
            TaskMetric {
                task_id: "B".into(),
                task_type: TaskType::Task,
                aggregate: None,
                domain: None,
                tags: vec![],
                complexity: None,
                estimate: Some(10.0),
                actual: Some(20.0),
                iterations: 3,
                duration_days: 1.0,
                files_changed: 1,
                lines_changed: 10,
                blockers: 0,
                completed_at: Utc::now(),
            },
        ];
        let aggregate = compute_aggregate("test", &TaskMap::new(), &metrics);
        assert!((aggregate.estimate_accuracy - 0.5).abs() < 1e-9);
    }
}
