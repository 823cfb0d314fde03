//! The three satellite append-only logs (progress, learning, and the
//! tracker-ops audit mirror) plus a generic JSONL reader/writer they
//! share with [`oplog::log::OperationLog`]'s crash-safety contract:
//! missing file ≡ empty, malformed lines are skipped on read.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum JsonlError {
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, #[source] source: std::io::Error },
}

/// A generic append-only JSON-lines file.
pub struct JsonlFile<T> {
    path: PathBuf,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> JsonlFile<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), _marker: std::marker::PhantomData }
    }

    pub fn append(&self, record: &T) -> Result<(), JsonlError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| JsonlError::Write { path: self.path.clone(), source })?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| JsonlError::Write { path: self.path.clone(), source })?;
        let mut line = serde_json::to_string(record).expect("record always serializes");
        line.push('\n');
        file.write_all(line.as_bytes()).map_err(|source| JsonlError::Write { path: self.path.clone(), source })?;
        file.sync_data().map_err(|source| JsonlError::Write { path: self.path.clone(), source })?;
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<T>, JsonlError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path).map_err(|source| JsonlError::Read { path: self.path.clone(), source })?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|source| JsonlError::Read { path: self.path.clone(), source })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(&line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "skipping malformed line"),
            }
        }
        Ok(records)
    }
}

/// One entry of `state/progress.jsonl`: either a per-iteration result
/// or a status-change event, per spec §3.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Iteration {
        task_id: String,
        iteration: u32,
        result_status: String,
        cost: f64,
        timestamp: DateTime<Utc>,
    },
    StatusChange {
        task_id: String,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },
}

/// One entry of `state/learning.jsonl`, spec §3.4/§4.J-L.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearningEvent {
    PatternDetected { pattern_type: String, confidence: f64, timestamp: DateTime<Utc> },
    ImprovementProposed { proposal_id: String, target: String, timestamp: DateTime<Utc> },
    ImprovementApplied { proposal_id: String, branch: String, commit_sha: Option<String>, timestamp: DateTime<Utc> },
    AnomalyDetected { description: String, task_id: Option<String>, timestamp: DateTime<Utc> },
}

/// One entry of `state/tracker-ops.jsonl`: audit mirror of every
/// tracker adapter call attempted, including dry-run attempts
/// (SPEC_FULL §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerOpRecord {
    pub method: String,
    pub target_id: Option<String>,
    pub outcome: TrackerOpOutcome,
    pub dry_run: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerOpOutcome {
    Ok,
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn progress_events_round_trip() {
        let dir = tempdir().unwrap();
        let log: JsonlFile<ProgressEvent> = JsonlFile::new(dir.path().join("progress.jsonl"));
        let event = ProgressEvent::Iteration {
            task_id: "RALPH-001".into(),
            iteration: 1,
            result_status: "continue".into(),
            cost: 0.01,
            timestamp: Utc::now(),
        };
        log.append(&event).unwrap();
        let all = log.read_all().unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let log: JsonlFile<LearningEvent> = JsonlFile::new(dir.path().join("learning.jsonl"));
        assert!(log.read_all().unwrap().is_empty());
    }
}
