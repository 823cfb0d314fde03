//! The copy-on-write overlay sandbox, spec §4.D.
//!
//! Pending writes/deletes are buffered in memory; nothing touches disk
//! until [`Sandbox::flush`]. Commands run against the real workspace
//! root (the spec does not ask for command effects to be buffered,
//! only file effects) but are gated by the same policy.

pub mod accounting;
pub mod policy;

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::config::SandboxConfig;
use accounting::Accounting;
use policy::SandboxPolicy;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("path denied by policy: {0}")]
    PathDenied(String),
    #[error("path is deleted in this sandbox: {0}")]
    Deleted(String),
    #[error("io error on {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeList {
    pub created: Vec<FileChange>,
    pub modified: Vec<FileChange>,
    pub deleted: Vec<FileChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub before_hash: Option<u64>,
    pub after_hash: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

struct CacheEntry {
    mtime: SystemTime,
    content: Vec<u8>,
}

/// The copy-on-write layer for one task's iteration loop.
pub struct Sandbox {
    root: PathBuf,
    pending_writes: HashMap<PathBuf, Vec<u8>>,
    pending_deletes: HashSet<PathBuf>,
    cache: HashMap<PathBuf, CacheEntry>,
    policy: SandboxPolicy,
    config: SandboxConfig,
    pub accounting: Accounting,
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>, config: SandboxConfig) -> Self {
        let policy = SandboxPolicy::from_config(&config);
        Self {
            root: root.into(),
            pending_writes: HashMap::new(),
            pending_deletes: HashSet::new(),
            cache: HashMap::new(),
            policy,
            config,
            accounting: Accounting::default(),
        }
    }

    fn check_path(&self, requested: &str) -> Result<PathBuf, SandboxError> {
        let abs = policy::resolve(&self.root, requested);
        let rel = abs.strip_prefix(&self.root).unwrap_or(&abs);
        if !self.policy.allows_path(rel) {
            return Err(SandboxError::PathDenied(requested.to_string()));
        }
        Ok(abs)
    }

    pub fn read_file(&mut self, requested: &str) -> Result<String, SandboxError> {
        let path = self.check_path(requested)?;
        if let Some(content) = self.pending_writes.get(&path) {
            self.accounting.record_read(requested, content.len() as u64);
            return Ok(String::from_utf8_lossy(content).into_owned());
        }
        if self.pending_deletes.contains(&path) {
            return Err(SandboxError::Deleted(requested.to_string()));
        }
        if self.config.enable_read_cache {
            if let Ok(meta) = std::fs::metadata(&path) {
                if let Ok(mtime) = meta.modified() {
                    if let Some(entry) = self.cache.get(&path) {
                        if entry.mtime == mtime {
                            self.accounting.record_read(requested, entry.content.len() as u64);
                            return Ok(String::from_utf8_lossy(&entry.content).into_owned());
                        }
                    }
                    let bytes = std::fs::read(&path).map_err(|source| SandboxError::Io {
                        path: requested.to_string(),
                        source,
                    })?;
                    self.accounting.record_read(requested, bytes.len() as u64);
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    self.cache.insert(path, CacheEntry { mtime, content: bytes });
                    return Ok(text);
                }
            }
        }
        let bytes =
            std::fs::read(&path).map_err(|source| SandboxError::Io { path: requested.to_string(), source })?;
        self.accounting.record_read(requested, bytes.len() as u64);
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn write_file(&mut self, requested: &str, content: &str) -> Result<usize, SandboxError> {
        let path = self.check_path(requested)?;
        let bytes = content.as_bytes().to_vec();
        if bytes.len() as u64 > self.config.max_file_size_bytes {
            tracing::warn!(path = requested, size = bytes.len(), "write exceeds advisory max file size");
        }
        self.accounting.record_write(requested, bytes.len() as u64);
        self.pending_deletes.remove(&path);
        let len = bytes.len();
        self.pending_writes.insert(path, bytes);
        Ok(len)
    }

    pub fn delete_file(&mut self, requested: &str) -> Result<(), SandboxError> {
        let path = self.check_path(requested)?;
        self.pending_writes.remove(&path);
        self.pending_deletes.insert(path);
        Ok(())
    }

    pub fn exists(&self, requested: &str) -> bool {
        let Ok(path) = self.check_path(requested) else { return false };
        if self.pending_writes.contains_key(&path) {
            return true;
        }
        if self.pending_deletes.contains(&path) {
            return false;
        }
        path.exists()
    }

    /// Write pending writes, apply pending deletes, clear both buffers.
    /// Not atomic across files.
    pub fn flush(&mut self) -> Result<ChangeList, SandboxError> {
        let mut changes = ChangeList::default();
        for (path, content) in self.pending_writes.drain() {
            let existed = path.exists();
            let before_hash = if existed { std::fs::read(&path).ok().map(|b| hash_bytes(&b)) } else { None };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| SandboxError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
            }
            std::fs::write(&path, &content)
                .map_err(|source| SandboxError::Io { path: path.display().to_string(), source })?;
            let change = FileChange {
                path: path.display().to_string(),
                before_hash,
                after_hash: Some(hash_bytes(&content)),
            };
            if existed {
                changes.modified.push(change);
            } else {
                changes.created.push(change);
            }
        }
        for path in self.pending_deletes.drain() {
            if path.exists() {
                let before_hash = std::fs::read(&path).ok().map(|b| hash_bytes(&b));
                std::fs::remove_file(&path)
                    .map_err(|source| SandboxError::Io { path: path.display().to_string(), source })?;
                changes.deleted.push(FileChange { path: path.display().to_string(), before_hash, after_hash: None });
            }
        }
        Ok(changes)
    }

    /// Discard pending writes and deletes; the cache survives.
    pub fn rollback(&mut self) {
        self.pending_writes.clear();
        self.pending_deletes.clear();
    }

    pub fn pending_is_empty(&self) -> bool {
        self.pending_writes.is_empty() && self.pending_deletes.is_empty()
    }

    /// Run `command` in a shell at the workspace root. Never throws:
    /// policy denial and timeouts both surface as a non-zero exit code.
    pub async fn bash(&mut self, command: &str, timeout: Duration) -> CommandOutput {
        if self.commands_run_exceeds_limit() {
            return CommandOutput { stdout: String::new(), stderr: "command limit exceeded".into(), exit_code: 126 };
        }
        if !self.policy.allows_command(command) {
            tracing::warn!(%command, "command denied by sandbox policy");
            return CommandOutput { stdout: String::new(), stderr: "command denied by policy".into(), exit_code: 126 };
        }

        let start = Instant::now();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.root).env("RALPH_SANDBOX", "1").env("RALPH_SANDBOX_ROOT", &self.root);

        let output = tokio::time::timeout(timeout, cmd.output()).await;
        self.accounting.record_command(command, start.elapsed());

        match output {
            Ok(Ok(output)) => CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
            },
            Ok(Err(e)) => CommandOutput { stdout: String::new(), stderr: format!("failed to spawn: {e}"), exit_code: 127 },
            Err(_) => CommandOutput { stdout: String::new(), stderr: "command timed out".into(), exit_code: 124 },
        }
    }

    fn commands_run_exceeds_limit(&self) -> bool {
        self.accounting.commands_run >= self.config.max_commands
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sandbox(root: &Path) -> Sandbox {
        Sandbox::new(root, SandboxConfig::default())
    }

    #[test]
    fn write_then_read_sees_pending_content() {
        let dir = tempdir().unwrap();
        let mut sb = sandbox(dir.path());
        sb.write_file("a.txt", "hello").unwrap();
        assert_eq!(sb.read_file("a.txt").unwrap(), "hello");
        assert!(sb.exists("a.txt"));
    }

    #[test]
    fn rollback_clears_pending_state() {
        let dir = tempdir().unwrap();
        let mut sb = sandbox(dir.path());
        sb.write_file("a.txt", "1").unwrap();
        sb.write_file("b.txt", "2").unwrap();
        sb.rollback();
        assert!(sb.pending_is_empty());
        let flushed = sb.flush().unwrap();
        assert!(flushed.created.is_empty() && flushed.modified.is_empty() && flushed.deleted.is_empty());
    }

    #[test]
    fn flush_writes_to_disk_and_reports_created() {
        let dir = tempdir().unwrap();
        let mut sb = sandbox(dir.path());
        sb.write_file("a.txt", "hello").unwrap();
        let changes = sb.flush().unwrap();
        assert_eq!(changes.created.len(), 1);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "hello");
        assert!(sb.pending_is_empty());
    }

    #[test]
    fn delete_file_is_staged_and_flush_removes_it() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "1").unwrap();
        let mut sb = sandbox(dir.path());
        assert!(sb.exists("a.txt"));
        sb.delete_file("a.txt").unwrap();
        assert!(!sb.exists("a.txt"));
        let changes = sb.flush().unwrap();
        assert_eq!(changes.deleted.len(), 1);
        assert!(!dir.path().join("a.txt").exists());
    }

    #[test]
    fn denied_path_is_rejected() {
        let dir = tempdir().unwrap();
        let mut config = SandboxConfig::default();
        config.path_denylist.push("secret".into());
        let mut sb = Sandbox::new(dir.path(), config);
        assert!(matches!(sb.write_file("secret/key", "x"), Err(SandboxError::PathDenied(_))));
    }

    #[tokio::test]
    async fn denied_command_returns_126_without_running() {
        let dir = tempdir().unwrap();
        let mut config = SandboxConfig::default();
        config.command_denylist.push("rm -rf".into());
        let mut sb = Sandbox::new(dir.path(), config);
        let out = sb.bash("rm -rf /tmp/whatever", Duration::from_secs(1)).await;
        assert_eq!(out.exit_code, 126);
    }

    #[tokio::test]
    async fn bash_reports_exit_code_on_failure_without_erroring() {
        let dir = tempdir().unwrap();
        let mut sb = sandbox(dir.path());
        let out = sb.bash("exit 7", Duration::from_secs(2)).await;
        assert_eq!(out.exit_code, 7);
    }
}
