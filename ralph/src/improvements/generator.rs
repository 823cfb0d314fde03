//! Pattern → proposal mapping, spec §4.K.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use super::{ImprovementProposal, Priority, ProposalStatus, ProposalType};
use crate::metrics::AggregateMetrics;
use crate::patterns::{DetectedPattern, PatternType};

/// Hands out `IMPROVE-<sequence>` ids continuing across a run.
pub struct ProposalIdGenerator {
    next: AtomicU64,
}

impl ProposalIdGenerator {
    pub fn new(start: u64) -> Self {
        Self { next: AtomicU64::new(start) }
    }

    pub fn next_id(&self) -> String {
        format!("IMPROVE-{}", self.next.fetch_add(1, Ordering::SeqCst))
    }
}

struct Mapping {
    target: &'static str,
    section: &'static str,
    proposal_type: ProposalType,
    priority: Priority,
}

fn mapping_for(pattern_type: PatternType, confidence: f64) -> Mapping {
    match pattern_type {
        PatternType::EstimationDrift => Mapping {
            target: "guidance/AGENTS.md",
            section: "Estimation Guidance",
            proposal_type: ProposalType::UpdateEstimate,
            priority: if confidence > 0.8 { Priority::High } else { Priority::Medium },
        },
        PatternType::BugHotspot => Mapping {
            target: "guidance/AGENTS.md",
            section: "Risk Areas",
            proposal_type: ProposalType::AddWarning,
            priority: Priority::High,
        },
        PatternType::BlockingChain => Mapping {
            target: "guidance/AGENTS.md",
            section: "Task Prioritization",
            proposal_type: ProposalType::AddConvention,
            priority: Priority::Medium,
        },
        PatternType::IterationAnomaly => Mapping {
            target: "agents/task-discovery.md",
            section: "Complexity Assessment",
            proposal_type: ProposalType::RefineInstructions,
            priority: Priority::Medium,
        },
        PatternType::Bottleneck => Mapping {
            target: "guidance/AGENTS.md",
            section: "Known Bottlenecks",
            proposal_type: ProposalType::AddPattern,
            priority: Priority::Medium,
        },
        PatternType::VelocityTrend => Mapping {
            target: "guidance/AGENTS.md",
            section: "Velocity Notes",
            proposal_type: ProposalType::AddSection,
            priority: Priority::Low,
        },
        PatternType::TestGap => Mapping {
            target: "guidance/AGENTS.md",
            section: "Test Coverage",
            proposal_type: ProposalType::AddSection,
            priority: Priority::Medium,
        },
        PatternType::HighChurn => Mapping {
            target: "guidance/AGENTS.md",
            section: "Churn Hotspots",
            proposal_type: ProposalType::AddWarning,
            priority: Priority::Medium,
        },
        PatternType::Coupling => Mapping {
            target: "guidance/AGENTS.md",
            section: "Coupling Notes",
            proposal_type: ProposalType::AddPattern,
            priority: Priority::Medium,
        },
        PatternType::TaskClustering => Mapping {
            target: "guidance/AGENTS.md",
            section: "Task Organization",
            proposal_type: ProposalType::AddSection,
            priority: Priority::Medium,
        },
        PatternType::ComplexitySignal => Mapping {
            target: "agents/task-discovery.md",
            section: "Complexity Assessment",
            proposal_type: ProposalType::RefineInstructions,
            priority: Priority::Medium,
        },
    }
}

fn render_content(section: &str, description: &str, suggestion: &str, evidence: &[String]) -> String {
    let evidence_list = if evidence.is_empty() {
        String::new()
    } else {
        format!("\n\nEvidence: {}", evidence.join(", "))
    };
    format!("## {section}\n\n{description}\n\n**Suggestion:** {suggestion}{evidence_list}\n")
}

/// One detector finding maps to at most one proposal, spec §4.K.
pub fn generate_from_pattern(pattern: &DetectedPattern, ids: &ProposalIdGenerator) -> ImprovementProposal {
    let mapping = mapping_for(pattern.pattern_type, pattern.confidence);
    let title = format!("{:?}: {}", pattern.pattern_type, pattern.description);
    ImprovementProposal {
        id: ids.next_id(),
        target: mapping.target.to_string(),
        section: Some(mapping.section.to_string()),
        proposal_type: mapping.proposal_type,
        title,
        description: pattern.description.clone(),
        content: render_content(mapping.section, &pattern.description, &pattern.suggestion, &pattern.evidence),
        rationale: pattern.suggestion.clone(),
        evidence: pattern.evidence.clone(),
        confidence: pattern.confidence,
        priority: mapping.priority,
        status: ProposalStatus::Pending,
        created_at: Utc::now(),
    }
}

/// Aggregate-level proposals independent of any single detector finding,
/// spec §4.K.
pub fn generate_from_aggregate(aggregate: &AggregateMetrics, ids: &ProposalIdGenerator) -> Vec<ImprovementProposal> {
    let mut proposals = Vec::new();

    if aggregate.estimate_accuracy < 0.5 {
        let description =
            format!("Estimation accuracy over {} is {:.0}%.", aggregate.period_label, aggregate.estimate_accuracy * 100.0);
        proposals.push(ImprovementProposal {
            id: ids.next_id(),
            target: "guidance/AGENTS.md".to_string(),
            section: Some("Estimation Guidance".to_string()),
            proposal_type: ProposalType::AddWarning,
            title: "Low estimation accuracy".to_string(),
            description: description.clone(),
            content: render_content(
                "Estimation Guidance",
                &description,
                "Review sizing conventions; estimates are missing the mark more often than not.",
                &[],
            ),
            rationale: "aggregate estimate accuracy below 50%".to_string(),
            evidence: Vec::new(),
            confidence: 1.0 - aggregate.estimate_accuracy,
            priority: Priority::High,
            status: ProposalStatus::Pending,
            created_at: Utc::now(),
        });
    }

    let blocker_rate = if aggregate.tasks_completed > 0 {
        aggregate.blocker_count as f64 / aggregate.tasks_completed as f64
    } else {
        0.0
    };
    if blocker_rate > 0.3 {
        let description = format!("{:.0}% of completed tasks in {} hit a blocker.", blocker_rate * 100.0, aggregate.period_label);
        proposals.push(ImprovementProposal {
            id: ids.next_id(),
            target: "guidance/AGENTS.md".to_string(),
            section: Some("Task Prioritization".to_string()),
            proposal_type: ProposalType::AddConvention,
            title: "High blocker rate".to_string(),
            description: description.clone(),
            content: render_content(
                "Task Prioritization",
                &description,
                "Surface dependency chains earlier during task discovery.",
                &[],
            ),
            rationale: "aggregate blocker rate above 30%".to_string(),
            evidence: Vec::new(),
            confidence: blocker_rate.min(1.0),
            priority: Priority::Medium,
            status: ProposalStatus::Pending,
            created_at: Utc::now(),
        });
    }

    proposals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::DetectedPattern;

    fn pattern(pattern_type: PatternType, confidence: f64) -> DetectedPattern {
        DetectedPattern {
            pattern_type,
            confidence,
            description: "desc".into(),
            data: serde_json::json!({}),
            evidence: vec!["RALPH-001".into()],
            suggestion: "do the thing".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn estimation_drift_priority_depends_on_confidence() {
        let ids = ProposalIdGenerator::new(1);
        let high = generate_from_pattern(&pattern(PatternType::EstimationDrift, 0.9), &ids);
        let medium = generate_from_pattern(&pattern(PatternType::EstimationDrift, 0.65), &ids);
        assert_eq!(high.priority, Priority::High);
        assert_eq!(medium.priority, Priority::Medium);
    }

    #[test]
    fn ids_increment_continuously() {
        let ids = ProposalIdGenerator::new(5);
        let a = generate_from_pattern(&pattern(PatternType::BugHotspot, 0.9), &ids);
        let b = generate_from_pattern(&pattern(PatternType::BugHotspot, 0.9), &ids);
        assert_eq!(a.id, "IMPROVE-5");
        assert_eq!(b.id, "IMPROVE-6");
    }

    #[test]
    fn low_estimation_accuracy_emits_high_priority_warning() {
        let ids = ProposalIdGenerator::new(1);
        let aggregate = AggregateMetrics { estimate_accuracy: 0.3, ..Default::default() };
        let proposals = generate_from_aggregate(&aggregate, &ids);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].priority, Priority::High);
    }
}
