//! Pattern detectors, spec §4.J: a bank of independent detectors run
//! over task and metric history, each contributing at most one typed
//! finding to the learning log.

mod detectors;

use chrono::{DateTime, Utc};
use oplog::TaskMap;
use serde::{Deserialize, Serialize};

use crate::metrics::{AggregateMetrics, TaskMetric};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    EstimationDrift,
    TaskClustering,
    BlockingChain,
    BugHotspot,
    IterationAnomaly,
    VelocityTrend,
    Bottleneck,
    ComplexitySignal,
    TestGap,
    HighChurn,
    Coupling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub pattern_type: PatternType,
    pub confidence: f64,
    pub description: String,
    pub data: serde_json::Value,
    pub evidence: Vec<String>,
    pub suggestion: String,
    pub timestamp: DateTime<Utc>,
}

/// Input shared by every detector. Detectors read from this and never
/// mutate it.
pub struct DetectionContext<'a> {
    pub tasks: &'a TaskMap,
    pub metrics: &'a [TaskMetric],
    pub aggregates: &'a [AggregateMetrics],
    pub min_confidence: f64,
    pub min_samples: usize,
}

impl<'a> DetectionContext<'a> {
    pub fn new(tasks: &'a TaskMap, metrics: &'a [TaskMetric], aggregates: &'a [AggregateMetrics]) -> Self {
        Self { tasks, metrics, aggregates, min_confidence: 0.6, min_samples: 5 }
    }

    pub fn with_thresholds(mut self, min_confidence: f64, min_samples: usize) -> Self {
        self.min_confidence = min_confidence;
        self.min_samples = min_samples;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternSummary {
    pub total_patterns: usize,
    pub high_confidence: usize,
    pub by_type: std::collections::BTreeMap<String, usize>,
    pub top_suggestions: Vec<String>,
}

type Detector = fn(&DetectionContext) -> Option<DetectedPattern>;

/// Fixed detector ordering, spec §4.J.
const DETECTORS: &[Detector] = &[
    detectors::estimation_drift,
    detectors::task_clustering,
    detectors::blocking_chain,
    detectors::bug_hotspot,
    detectors::iteration_anomaly,
    detectors::velocity_trend,
    detectors::bottleneck,
    detectors::complexity_signal,
    detectors::test_gap,
    detectors::high_churn,
    detectors::coupling,
];

/// Run every detector, dropping findings below `min_confidence`.
pub fn detect_all(ctx: &DetectionContext) -> Vec<DetectedPattern> {
    DETECTORS
        .iter()
        .filter_map(|detector| detector(ctx))
        .filter(|pattern| pattern.confidence >= ctx.min_confidence)
        .collect()
}

pub fn summarize(patterns: &[DetectedPattern]) -> PatternSummary {
    let mut by_type = std::collections::BTreeMap::new();
    for pattern in patterns {
        *by_type.entry(format!("{:?}", pattern.pattern_type)).or_insert(0) += 1;
    }

    let mut sorted: Vec<&DetectedPattern> = patterns.iter().collect();
    sorted.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
    let top_suggestions = sorted.into_iter().take(5).map(|p| p.suggestion.clone()).collect();

    PatternSummary {
        total_patterns: patterns.len(),
        high_confidence: patterns.iter().filter(|p| p.confidence >= 0.8).count(),
        by_type,
        top_suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_patterns() {
        let tasks = TaskMap::new();
        let ctx = DetectionContext::new(&tasks, &[], &[]);
        assert!(detect_all(&ctx).is_empty());
    }

    #[test]
    fn summary_counts_and_ranks() {
        let patterns = vec![
            DetectedPattern {
                pattern_type: PatternType::EstimationDrift,
                confidence: 0.9,
                description: "d".into(),
                data: serde_json::json!({}),
                evidence: vec![],
                suggestion: "high-conf".into(),
                timestamp: Utc::now(),
            },
            DetectedPattern {
                pattern_type: PatternType::BugHotspot,
                confidence: 0.65,
                description: "d".into(),
                data: serde_json::json!({}),
                evidence: vec![],
                suggestion: "low-conf".into(),
                timestamp: Utc::now(),
            },
        ];
        let summary = summarize(&patterns);
        assert_eq!(summary.total_patterns, 2);
        assert_eq!(summary.high_confidence, 1);
        assert_eq!(summary.top_suggestions[0], "high-conf");
    }
}
