//! Branch-create, file-edit, commit, status-update pipeline, spec
//! §4.L, grounded on the teacher's [`crate::git::ShellGit`] shell-out
//! style. One proposal's failure does not abort the others.

use std::path::Path;

use chrono::{DateTime, Utc};

use super::{ImprovementProposal, ProposalStatus};
use crate::git::{learn_branch_name, GitOps};
use crate::logs::{JsonlFile, LearningEvent};

#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub proposal_id: String,
    pub applied: bool,
    pub commit_sha: Option<String>,
    pub error: Option<String>,
}

/// Replace the `## {section}` block in `existing` with `content` if
/// present, else append `content` to the end.
fn splice_section(existing: Option<&str>, section: &str, content: &str) -> String {
    let Some(text) = existing else {
        return content.to_string();
    };
    let heading = format!("## {section}");
    let Some(start) = text.find(&heading) else {
        let mut result = text.to_string();
        if !result.ends_with('\n') {
            result.push('\n');
        }
        result.push('\n');
        result.push_str(content.trim_end());
        result.push('\n');
        return result;
    };

    let after_heading = start + heading.len();
    let end = text[after_heading..].find("\n## ").map(|i| after_heading + i + 1).unwrap_or(text.len());

    let mut result = String::new();
    result.push_str(&text[..start]);
    result.push_str(content.trim_end());
    result.push('\n');
    result.push_str(&text[end..]);
    result
}

fn read_target(repo_root: &Path, relative_path: &str) -> Option<String> {
    std::fs::read_to_string(repo_root.join(relative_path)).ok()
}

fn write_target(repo_root: &Path, relative_path: &str, content: &str) -> std::io::Result<()> {
    let path = repo_root.join(relative_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
}

/// Apply every `pending` proposal, spec §4.L. Mutates each proposal's
/// `status` in place and returns one outcome per attempted proposal.
pub async fn apply_proposals(
    proposals: &mut [ImprovementProposal],
    git: &dyn GitOps,
    repo_root: &Path,
    now: DateTime<Utc>,
    learning_log: &JsonlFile<LearningEvent>,
) -> Vec<ApplyOutcome> {
    let pending_indices: Vec<usize> =
        proposals.iter().enumerate().filter(|(_, p)| p.status == ProposalStatus::Pending).map(|(i, _)| i).collect();
    if pending_indices.is_empty() {
        return Vec::new();
    }

    let original_branch = git.current_branch().await.unwrap_or_else(|_| "main".to_string());
    let branch_name = learn_branch_name(now);

    if let Err(e) = git.branch(&branch_name).await {
        tracing::warn!(error = %e, "failed to create learning branch, every pending proposal becomes an error");
        return pending_indices
            .into_iter()
            .map(|i| {
                proposals[i].status = ProposalStatus::Error;
                ApplyOutcome { proposal_id: proposals[i].id.clone(), applied: false, commit_sha: None, error: Some(e.to_string()) }
            })
            .collect();
    }

    let mut outcomes = Vec::with_capacity(pending_indices.len());
    for i in pending_indices {
        let outcome = apply_one(&mut proposals[i], git, repo_root).await;
        if outcome.applied {
            if let Err(e) = learning_log.append(&LearningEvent::ImprovementApplied {
                proposal_id: proposals[i].id.clone(),
                branch: branch_name.clone(),
                commit_sha: outcome.commit_sha.clone(),
                timestamp: Utc::now(),
            }) {
                tracing::warn!(error = %e, "failed to append improvement_applied learning event");
            }
        }
        outcomes.push(outcome);
    }

    if let Err(e) = git.checkout(&original_branch).await {
        tracing::warn!(branch = %original_branch, error = %e, "failed to return to original branch after applying proposals");
    }

    outcomes
}

async fn apply_one(proposal: &mut ImprovementProposal, git: &dyn GitOps, repo_root: &Path) -> ApplyOutcome {
    let section = proposal.section.as_deref().unwrap_or(&proposal.title);
    let existing = read_target(repo_root, &proposal.target);
    let spliced = splice_section(existing.as_deref(), section, &proposal.content);

    if let Err(e) = write_target(repo_root, &proposal.target, &spliced) {
        proposal.status = ProposalStatus::Error;
        return ApplyOutcome { proposal_id: proposal.id.clone(), applied: false, commit_sha: None, error: Some(e.to_string()) };
    }

    if let Err(e) = git.add(&proposal.target).await {
        proposal.status = ProposalStatus::Error;
        return ApplyOutcome { proposal_id: proposal.id.clone(), applied: false, commit_sha: None, error: Some(e.to_string()) };
    }

    let message = format!("RALPH-LEARN: {}", proposal.title);
    match git.commit(&message).await {
        Ok(sha) => {
            proposal.status = ProposalStatus::Applied;
            ApplyOutcome { proposal_id: proposal.id.clone(), applied: true, commit_sha: Some(sha), error: None }
        }
        Err(e) => {
            proposal.status = ProposalStatus::Error;
            ApplyOutcome { proposal_id: proposal.id.clone(), applied: false, commit_sha: None, error: Some(e.to_string()) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_appends_when_section_absent() {
        let result = splice_section(Some("# Guidance\n\nIntro.\n"), "Risk Areas", "## Risk Areas\n\nBe careful.\n");
        assert!(result.contains("# Guidance"));
        assert!(result.contains("## Risk Areas"));
        assert!(result.ends_with("Be careful.\n"));
    }

    #[test]
    fn splice_creates_file_when_missing() {
        let result = splice_section(None, "Risk Areas", "## Risk Areas\n\nBe careful.\n");
        assert_eq!(result, "## Risk Areas\n\nBe careful.\n");
    }

    #[test]
    fn splice_replaces_existing_section_only() {
        let existing = "# Guidance\n\n## Risk Areas\n\nOld text.\n\n## Velocity Notes\n\nKeep this.\n";
        let result = splice_section(Some(existing), "Risk Areas", "## Risk Areas\n\nNew text.\n");
        assert!(result.contains("New text."));
        assert!(!result.contains("Old text."));
        assert!(result.contains("## Velocity Notes"));
        assert!(result.contains("Keep this."));
    }
}
