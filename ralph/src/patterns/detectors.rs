//! The eleven detector functions from spec §4.J, in the fixed order
//! they're registered in [`super::DETECTORS`].

use std::collections::HashMap;

use chrono::Utc;
use oplog::TaskType;

use super::{DetectedPattern, DetectionContext, PatternType};

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn stddev(values: &[f64], avg: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn finding(
    pattern_type: PatternType,
    confidence: f64,
    description: impl Into<String>,
    data: serde_json::Value,
    evidence: Vec<String>,
    suggestion: impl Into<String>,
) -> DetectedPattern {
    DetectedPattern {
        pattern_type,
        confidence,
        description: description.into(),
        data,
        evidence,
        suggestion: suggestion.into(),
        timestamp: Utc::now(),
    }
}

pub fn estimation_drift(ctx: &DetectionContext) -> Option<DetectedPattern> {
    let samples: Vec<(&str, f64, f64)> = ctx
        .metrics
        .iter()
        .filter_map(|m| Some((m.task_id.as_str(), m.estimate?, m.actual?)))
        .filter(|(_, estimate, _)| *estimate > 0.0)
        .collect();
    if samples.len() < ctx.min_samples {
        return None;
    }
    let ratios: Vec<f64> = samples.iter().map(|(_, estimate, actual)| actual / estimate).collect();
    let avg_ratio = mean(&ratios);
    if (0.7..=1.5).contains(&avg_ratio) {
        return None;
    }
    let n = samples.len();
    let confidence = (n as f64 / 10.0).min(1.0) * 0.9;
    let evidence = samples.iter().map(|(id, _, _)| id.to_string()).collect();
    Some(finding(
        PatternType::EstimationDrift,
        confidence,
        format!("average actual/estimate ratio is {avg_ratio:.2} across {n} tasks"),
        serde_json::json!({ "avgRatio": avg_ratio, "samples": n }),
        evidence,
        "Recalibrate estimation guidance: recent estimates are systematically off.",
    ))
}

pub fn task_clustering(ctx: &DetectionContext) -> Option<DetectedPattern> {
    let mut by_aggregate: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in ctx.tasks.values() {
        if let Some(aggregate) = &task.aggregate {
            by_aggregate.entry(aggregate.as_str()).or_default().push(task.id.as_str());
        }
    }
    let (aggregate, ids) = by_aggregate.into_iter().max_by_key(|(_, ids)| ids.len())?;
    if ids.len() < 3 {
        return None;
    }
    let n = ids.len();
    let confidence = (n as f64 / 10.0).min(1.0) * 0.8;
    Some(finding(
        PatternType::TaskClustering,
        confidence,
        format!("{n} tasks are concentrated in aggregate '{aggregate}'"),
        serde_json::json!({ "aggregate": aggregate, "count": n }),
        ids.into_iter().map(String::from).collect(),
        format!("Consider splitting '{aggregate}' into smaller aggregates."),
    ))
}

pub fn blocking_chain(ctx: &DetectionContext) -> Option<DetectedPattern> {
    let heavy_blockers: Vec<&str> =
        ctx.tasks.values().filter(|t| t.blocks.len() >= 2).map(|t| t.id.as_str()).collect();
    if heavy_blockers.len() < 2 {
        return None;
    }
    Some(finding(
        PatternType::BlockingChain,
        0.75,
        format!("{} tasks each block two or more others, forming a chain", heavy_blockers.len()),
        serde_json::json!({ "blockerCount": heavy_blockers.len() }),
        heavy_blockers.into_iter().map(String::from).collect(),
        "Resolve high-fan-out blockers first to unblock downstream work.",
    ))
}

pub fn bug_hotspot(ctx: &DetectionContext) -> Option<DetectedPattern> {
    let mut bugs_by_aggregate: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut total_bugs = 0usize;
    for task in ctx.tasks.values().filter(|t| t.task_type == TaskType::Bug) {
        total_bugs += 1;
        if let Some(aggregate) = &task.aggregate {
            bugs_by_aggregate.entry(aggregate.as_str()).or_default().push(task.id.as_str());
        }
    }
    if total_bugs < 3 {
        return None;
    }
    let (aggregate, ids) = bugs_by_aggregate.into_iter().max_by_key(|(_, ids)| ids.len())?;
    if ids.len() < 2 {
        return None;
    }
    let confidence = (total_bugs as f64 / 5.0).min(1.0) * 0.85;
    Some(finding(
        PatternType::BugHotspot,
        confidence,
        format!("'{aggregate}' accounts for {} of {total_bugs} bugs", ids.len()),
        serde_json::json!({ "aggregate": aggregate, "bugsInAggregate": ids.len(), "totalBugs": total_bugs }),
        ids.into_iter().map(String::from).collect(),
        format!("Add regression coverage and a risk warning for '{aggregate}'."),
    ))
}

pub fn iteration_anomaly(ctx: &DetectionContext) -> Option<DetectedPattern> {
    if ctx.metrics.len() < ctx.min_samples {
        return None;
    }
    let iterations: Vec<f64> = ctx.metrics.iter().map(|m| m.iterations as f64).collect();
    let avg = mean(&iterations);
    let sd = stddev(&iterations, avg);
    let threshold = avg + 2.0 * sd;
    let anomalies: Vec<String> =
        ctx.metrics.iter().filter(|m| m.iterations as f64 > threshold).map(|m| m.task_id.clone()).collect();
    if anomalies.is_empty() {
        return None;
    }
    Some(finding(
        PatternType::IterationAnomaly,
        0.8,
        format!("{} tasks needed far more iterations than the mean ({avg:.1})", anomalies.len()),
        serde_json::json!({ "mean": avg, "stddev": sd, "threshold": threshold }),
        anomalies,
        "Investigate why these tasks required unusually many iterations.",
    ))
}

pub fn velocity_trend(ctx: &DetectionContext) -> Option<DetectedPattern> {
    if ctx.aggregates.len() < 2 {
        return None;
    }
    let mid = ctx.aggregates.len() / 2;
    let (first_half, second_half) = ctx.aggregates.split_at(mid);
    let first_avg = mean(&first_half.iter().map(|a| a.tasks_completed as f64).collect::<Vec<_>>());
    let second_avg = mean(&second_half.iter().map(|a| a.tasks_completed as f64).collect::<Vec<_>>());
    if first_avg == 0.0 {
        return None;
    }
    let change = (second_avg - first_avg) / first_avg;
    if change.abs() < 0.2 {
        return None;
    }
    let direction = if change > 0.0 { "up" } else { "down" };
    Some(finding(
        PatternType::VelocityTrend,
        0.7,
        format!("completion velocity trended {direction} by {:.0}% between periods", change.abs() * 100.0),
        serde_json::json!({ "firstHalfAvg": first_avg, "secondHalfAvg": second_avg, "change": change }),
        Vec::new(),
        "Review recent process or scope changes that may explain the velocity shift.",
    ))
}

pub fn bottleneck(ctx: &DetectionContext) -> Option<DetectedPattern> {
    if ctx.metrics.len() < ctx.min_samples {
        return None;
    }
    let overall_mean = mean(&ctx.metrics.iter().map(|m| m.duration_days).collect::<Vec<_>>());
    if overall_mean == 0.0 {
        return None;
    }
    let mut by_type: HashMap<TaskType, Vec<f64>> = HashMap::new();
    for m in ctx.metrics {
        by_type.entry(m.task_type).or_default().push(m.duration_days);
    }
    let (slowest_type, durations) =
        by_type.into_iter().max_by(|(_, a), (_, b)| mean(a).partial_cmp(&mean(b)).unwrap())?;
    let slowest_mean = mean(&durations);
    if slowest_mean < overall_mean * 1.5 {
        return None;
    }
    let n = durations.len();
    let confidence = (n as f64 / 5.0).min(1.0) * 0.75;
    Some(finding(
        PatternType::Bottleneck,
        confidence,
        format!("{slowest_type:?} tasks take {slowest_mean:.1}d on average, {overall_mean:.1}d overall"),
        serde_json::json!({ "taskType": format!("{slowest_type:?}"), "slowestMean": slowest_mean, "overallMean": overall_mean }),
        Vec::new(),
        format!("{slowest_type:?} work is a bottleneck; consider breaking it into smaller tasks."),
    ))
}

pub fn complexity_signal(ctx: &DetectionContext) -> Option<DetectedPattern> {
    let samples: Vec<_> = ctx.metrics.iter().filter_map(|m| Some((m.complexity?, m.duration_days))).collect();
    if samples.len() < ctx.min_samples {
        return None;
    }
    let mut by_complexity: HashMap<u8, Vec<f64>> = HashMap::new();
    for (complexity, duration) in &samples {
        by_complexity.entry(complexity.ordinal()).or_default().push(*duration);
    }
    let mut ordinals: Vec<u8> = by_complexity.keys().copied().collect();
    ordinals.sort_unstable();
    let means: Vec<f64> = ordinals.iter().map(|o| mean(&by_complexity[o])).collect();
    let monotone = means.windows(2).all(|w| w[1] >= w[0]);
    if monotone {
        return None;
    }
    Some(finding(
        PatternType::ComplexitySignal,
        0.7,
        "mean task duration does not increase monotonically with complexity".to_string(),
        serde_json::json!({ "meansByOrdinal": means }),
        Vec::new(),
        "Complexity ratings may be miscalibrated; revisit how complexity is assigned.",
    ))
}

pub fn test_gap(ctx: &DetectionContext) -> Option<DetectedPattern> {
    let mut total_by_aggregate: HashMap<&str, usize> = HashMap::new();
    let mut test_by_aggregate: HashMap<&str, usize> = HashMap::new();
    for task in ctx.tasks.values() {
        let Some(aggregate) = &task.aggregate else { continue };
        *total_by_aggregate.entry(aggregate.as_str()).or_insert(0) += 1;
        if task.task_type == TaskType::Test {
            *test_by_aggregate.entry(aggregate.as_str()).or_insert(0) += 1;
        }
    }

    let mut candidates: Vec<(&str, usize, usize)> = total_by_aggregate
        .into_iter()
        .map(|(aggregate, total)| {
            let tests = test_by_aggregate.get(aggregate).copied().unwrap_or(0);
            (aggregate, total, tests)
        })
        .filter(|(_, total, tests)| total.saturating_sub(*tests) >= 3 && (*tests as f64 / *total as f64) < 0.2)
        .collect();
    candidates.sort_by_key(|(_, total, _)| std::cmp::Reverse(*total));
    let (aggregate, total, tests) = candidates.into_iter().next()?;

    let confidence = (total as f64 / 10.0).min(1.0) * 0.8;
    let ratio = tests as f64 / total as f64;
    Some(finding(
        PatternType::TestGap,
        confidence,
        format!("'{aggregate}' has only {tests} test tasks out of {total}"),
        serde_json::json!({ "aggregate": aggregate, "tests": tests, "total": total, "ratio": ratio }),
        Vec::new(),
        format!("Add test coverage tasks for '{aggregate}'."),
    ))
}

pub fn high_churn(ctx: &DetectionContext) -> Option<DetectedPattern> {
    if ctx.metrics.is_empty() {
        return None;
    }
    let overall_avg = mean(&ctx.metrics.iter().map(|m| m.files_changed as f64).collect::<Vec<_>>());
    if overall_avg == 0.0 {
        return None;
    }
    let mut by_aggregate: HashMap<&str, Vec<f64>> = HashMap::new();
    for m in ctx.metrics {
        if let Some(aggregate) = &m.aggregate {
            by_aggregate.entry(aggregate.as_str()).or_default().push(m.files_changed as f64);
        }
    }
    let (aggregate, files) = by_aggregate.into_iter().max_by(|(_, a), (_, b)| mean(a).partial_cmp(&mean(b)).unwrap())?;
    let aggregate_avg = mean(&files);
    if aggregate_avg < overall_avg * 1.5 {
        return None;
    }
    let n = files.len();
    let confidence = (n as f64 / 10.0).min(1.0) * 0.75;
    Some(finding(
        PatternType::HighChurn,
        confidence,
        format!("'{aggregate}' changes {aggregate_avg:.1} files per task vs {overall_avg:.1} overall"),
        serde_json::json!({ "aggregate": aggregate, "aggregateAvg": aggregate_avg, "overallAvg": overall_avg }),
        Vec::new(),
        format!("'{aggregate}' has unusually high churn; check for missing abstractions."),
    ))
}

pub fn coupling(ctx: &DetectionContext) -> Option<DetectedPattern> {
    let mut pair_counts: HashMap<(String, String), usize> = HashMap::new();
    for task in ctx.tasks.values() {
        let mut areas: Vec<String> = Vec::new();
        if let Some(aggregate) = &task.aggregate {
            areas.push(format!("aggregate:{aggregate}"));
        }
        if let Some(domain) = &task.domain {
            areas.push(format!("domain:{domain}"));
        }
        areas.extend(task.tags.iter().map(|t| format!("tag:{t}")));
        for i in 0..areas.len() {
            for j in (i + 1)..areas.len() {
                let key = if areas[i] <= areas[j] {
                    (areas[i].clone(), areas[j].clone())
                } else {
                    (areas[j].clone(), areas[i].clone())
                };
                *pair_counts.entry(key).or_insert(0) += 1;
            }
        }
    }
    let ((a, b), count) = pair_counts.into_iter().filter(|(_, n)| *n >= 3).max_by_key(|(_, n)| *n)?;
    let confidence = (count as f64 / 8.0).min(1.0) * 0.8;
    Some(finding(
        PatternType::Coupling,
        confidence,
        format!("'{a}' and '{b}' co-occur in {count} tasks"),
        serde_json::json!({ "areaA": a, "areaB": b, "count": count }),
        Vec::new(),
        format!("'{a}' and '{b}' look coupled; consider tracking them as one area."),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TaskMetric;
    use chrono::Utc;
    use oplog::{Complexity, Task, TaskMap};

    fn metric(task_id: &str, estimate: f64, actual: f64) -> TaskMetric {
        TaskMetric {
            task_id: task_id.into(),
            task_type: TaskType::Task,
            aggregate: None,
            domain: None,
            tags: vec![],
            complexity: None,
            estimate: Some(estimate),
            actual: Some(actual),
            iterations: 3,
            duration_days: 1.0,
            files_changed: 1,
            lines_changed: 10,
            blockers: 0,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn estimation_drift_flags_systematic_overrun() {
        let metrics: Vec<_> = (0..6).map(|i| metric(&format!("T{i}"), 10.0, 25.0)).collect();
        let tasks = TaskMap::new();
        let ctx = DetectionContext::new(&tasks, &metrics, &[]);
        let finding = estimation_drift(&ctx).expect("should detect drift");
        assert_eq!(finding.pattern_type, PatternType::EstimationDrift);
        assert!(finding.confidence > 0.6);
    }

    #[test]
    fn estimation_drift_silent_when_ratio_in_band() {
        let metrics: Vec<_> = (0..6).map(|i| metric(&format!("T{i}"), 10.0, 10.5)).collect();
        let tasks = TaskMap::new();
        let ctx = DetectionContext::new(&tasks, &metrics, &[]);
        assert!(estimation_drift(&ctx).is_none());
    }

    #[test]
    fn blocking_chain_needs_two_heavy_blockers() {
        let mut tasks = TaskMap::new();
        let mut a = Task::new("A", TaskType::Task, "a");
        a.blocks = ["X", "Y"].iter().map(|s| s.to_string()).collect();
        let mut b = Task::new("B", TaskType::Task, "b");
        b.blocks = ["Z", "W"].iter().map(|s| s.to_string()).collect();
        tasks.insert("A".into(), a);
        tasks.insert("B".into(), b);
        let ctx = DetectionContext::new(&tasks, &[], &[]);
        let finding = blocking_chain(&ctx).expect("should detect chain");
        assert_eq!(finding.confidence, 0.75);
    }

    #[test]
    fn complexity_signal_flags_non_monotone_durations() {
        let metrics = vec![
            TaskMetric { complexity: Some(Complexity::Trivial), duration_days: 5.0, ..metric("A", 1.0, 1.0) },
            TaskMetric { complexity: Some(Complexity::Simple), duration_days: 1.0, ..metric("B", 1.0, 1.0) },
            TaskMetric { complexity: Some(Complexity::Moderate), duration_days: 4.0, ..metric("C", 1.0, 1.0) },
            TaskMetric { complexity: Some(Complexity::Complex), duration_days: 6.0, ..metric("D", 1.0, 1.0) },
            TaskMetric { complexity: Some(Complexity::Complex), duration_days: 7.0, ..metric("E", 1.0, 1.0) },
        ];
        let tasks = TaskMap::new();
        let ctx = DetectionContext::new(&tasks, &metrics, &[]);
        assert!(complexity_signal(&ctx).is_some());
    }
}
