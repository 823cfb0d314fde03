//! Pattern → proposal mapping and the branch/commit pipeline that
//! applies accepted proposals, spec §4.K–§4.L.

pub mod applier;
pub mod generator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalType {
    UpdateEstimate,
    AddWarning,
    AddConvention,
    RefineInstructions,
    AddPattern,
    AddSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Applied,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementProposal {
    pub id: String,
    pub target: String,
    pub section: Option<String>,
    pub proposal_type: ProposalType,
    pub title: String,
    pub description: String,
    pub content: String,
    pub rationale: String,
    pub evidence: Vec<String>,
    pub confidence: f64,
    pub priority: Priority,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
}
