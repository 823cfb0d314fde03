//! The git operations capability, spec §6.5. The interface is the
//! core's contract; [`ShellGit`] is SPEC_FULL's supplied concrete
//! implementation so the crate is runnable without an external
//! collaborator wired in by hand, grounded on the teacher's
//! `WorktreeManager`/`LoopEngine::get_changed_files` style of shelling
//! out to `git` and parsing porcelain output.

use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("failed to spawn git: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub files_changed: u32,
    pub lines_changed: u32,
}

#[async_trait]
pub trait GitOps: Send + Sync {
    async fn current_branch(&self) -> Result<String, GitError>;
    async fn branch(&self, name: &str) -> Result<(), GitError>;
    async fn checkout(&self, reference: &str) -> Result<(), GitError>;
    async fn add(&self, pathspec: &str) -> Result<(), GitError>;
    async fn commit(&self, message: &str) -> Result<String, GitError>;
    async fn diff_stats(&self) -> Result<DiffStats, GitError>;

    async fn add_all(&self) -> Result<(), GitError> {
        self.add(".").await
    }
}

pub struct ShellGit {
    repo_root: PathBuf,
}

impl ShellGit {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self { repo_root: repo_root.into() }
    }

    fn run(&self, args: &[&str]) -> Result<String, GitError> {
        tracing::debug!(?args, "ShellGit::run: called");
        let output = Command::new("git").args(args).current_dir(&self.repo_root).output()?;
        if !output.status.success() {
            return Err(GitError::CommandFailed(String::from_utf8_lossy(&output.stderr).into_owned()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl GitOps for ShellGit {
    async fn current_branch(&self) -> Result<String, GitError> {
        self.run(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    async fn branch(&self, name: &str) -> Result<(), GitError> {
        self.run(&["checkout", "-b", name]).map(|_| ())
    }

    async fn checkout(&self, reference: &str) -> Result<(), GitError> {
        self.run(&["checkout", reference]).map(|_| ())
    }

    async fn add(&self, pathspec: &str) -> Result<(), GitError> {
        self.run(&["add", pathspec]).map(|_| ())
    }

    async fn commit(&self, message: &str) -> Result<String, GitError> {
        // A commit that finds no changes is not an error, spec §4.L.
        let status = self.run(&["status", "--porcelain"])?;
        if status.is_empty() {
            return self.run(&["rev-parse", "HEAD"]);
        }
        self.run(&["commit", "-m", message])?;
        self.run(&["rev-parse", "HEAD"])
    }

    async fn diff_stats(&self) -> Result<DiffStats, GitError> {
        let raw = self.run(&["diff", "--numstat", "HEAD~1", "HEAD"]).unwrap_or_default();
        let mut files_changed = 0;
        let mut lines_changed = 0;
        for line in raw.lines() {
            let mut parts = line.split_whitespace();
            let added = parts.next().and_then(|s| s.parse::<u32>().ok()).unwrap_or(0);
            let removed = parts.next().and_then(|s| s.parse::<u32>().ok()).unwrap_or(0);
            files_changed += 1;
            lines_changed += added + removed;
        }
        Ok(DiffStats { files_changed, lines_changed })
    }
}

pub fn sanitize_branch_timestamp(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%Y%m%d-%H%M%S").to_string()
}

pub fn learn_branch_name(now: chrono::DateTime<chrono::Utc>) -> String {
    format!("ralph/learn-{}", sanitize_branch_timestamp(now))
}

pub fn is_git_repo(path: &Path) -> bool {
    path.join(".git").exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn learn_branch_name_is_sanitized() {
        let ts = chrono::Utc.with_ymd_and_hms(2025, 1, 4, 12, 30, 0).unwrap();
        assert_eq!(learn_branch_name(ts), "ralph/learn-20250104-123000");
    }
}
