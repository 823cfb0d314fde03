//! The append-only JSON-lines file backing the operation log.
//!
//! Spec §4.A: missing file is an empty log, parse errors on individual
//! lines are ignored (forward compatibility), and `append` must land
//! the full line or nothing.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::op::Operation;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to open operation log at {path}: {source}")]
    Open { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to write operation log at {path}: {source}")]
    Write { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to read operation log at {path}: {source}")]
    Read { path: PathBuf, #[source] source: std::io::Error },
}

/// A file-backed, append-only log of [`Operation`]s.
pub struct OperationLog {
    path: PathBuf,
}

impl OperationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one operation. A single `write_all` of the serialized
    /// line plus a trailing newline, followed by `sync_data`, means the
    /// line either lands whole or (on a crash before `sync_data`
    /// returns) not at all — never a truncated line mid-file.
    pub fn append(&self, op: &Operation) -> Result<(), LogError> {
        tracing::debug!(path = %self.path.display(), "OperationLog::append: called");
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| LogError::Open { path: self.path.clone(), source })?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| LogError::Open { path: self.path.clone(), source })?;
        let mut line = serde_json::to_string(op).expect("Operation always serializes");
        line.push('\n');
        file.write_all(line.as_bytes()).map_err(|source| LogError::Write { path: self.path.clone(), source })?;
        file.sync_data().map_err(|source| LogError::Write { path: self.path.clone(), source })?;
        Ok(())
    }

    /// Read every well-formed operation in file order. A missing file
    /// is an empty log; blank and malformed lines are skipped.
    pub fn read_all(&self) -> Result<Vec<Operation>, LogError> {
        tracing::debug!(path = %self.path.display(), "OperationLog::read_all: called");
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path).map_err(|source| LogError::Read { path: self.path.clone(), source })?;
        let reader = BufReader::new(file);
        let mut ops = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| LogError::Read { path: self.path.clone(), source })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Operation>(&line) {
                Ok(op) => ops.push(op),
                Err(e) => tracing::warn!(path = %self.path.display(), lineno, error = %e, "skipping malformed log line"),
            }
        }
        Ok(ops)
    }

    /// Read, fold and return the current task map in one call.
    pub fn project(&self) -> Result<crate::TaskMap, LogError> {
        let ops = self.read_all()?;
        Ok(crate::projector::project(&ops))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskType};
    use chrono::Utc;
    use std::io::Write as _;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_empty_log() {
        let dir = tempdir().unwrap();
        let log = OperationLog::new(dir.path().join("tasks.jsonl"));
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let log = OperationLog::new(dir.path().join("state/tasks.jsonl"));
        let task = Task::new("RALPH-001", TaskType::Task, "Wire the log");
        let op = Operation::create(Utc::now(), task);
        log.append(&op).unwrap();
        let ops = log.read_all().unwrap();
        assert_eq!(ops, vec![op]);
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.jsonl");
        {
            let mut f = fs::File::create(&path).unwrap();
            writeln!(f, "not json at all").unwrap();
            writeln!(f).unwrap();
        }
        let log = OperationLog::new(path);
        let task = Task::new("RALPH-001", TaskType::Task, "Survives garbage");
        log.append(&Operation::create(Utc::now(), task)).unwrap();
        let ops = log.read_all().unwrap();
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn project_folds_the_file() {
        let dir = tempdir().unwrap();
        let log = OperationLog::new(dir.path().join("tasks.jsonl"));
        log.append(&Operation::create(Utc::now(), Task::new("RALPH-001", TaskType::Task, "A"))).unwrap();
        let state = log.project().unwrap();
        assert_eq!(state.len(), 1);
    }
}
