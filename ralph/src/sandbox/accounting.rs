//! Per-sandbox resource counters, spec §4.D "Accounting".

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Accounting {
    pub commands_run: u32,
    pub files_read: u32,
    pub files_written: u32,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub total_wall_time: Duration,
    pub execution_log: Vec<ExecutionLogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub op: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
}

impl Accounting {
    pub fn record(&mut self, op: impl Into<String>, detail: impl Into<String>, duration: Duration) {
        self.total_wall_time += duration;
        self.execution_log.push(ExecutionLogEntry {
            op: op.into(),
            detail: detail.into(),
            timestamp: Utc::now(),
            duration,
        });
    }

    pub fn record_command(&mut self, command: &str, duration: Duration) {
        self.commands_run += 1;
        self.record("bash", command, duration);
    }

    pub fn record_read(&mut self, path: &str, bytes: u64) {
        self.files_read += 1;
        self.bytes_read += bytes;
        self.record("read", path, Duration::ZERO);
    }

    pub fn record_write(&mut self, path: &str, bytes: u64) {
        self.files_written += 1;
        self.bytes_written += bytes;
        self.record("write", path, Duration::ZERO);
    }
}
