//! Ralph configuration: loaded from `ralph.config.json` with a
//! fallback chain, every section defaulted so a partial file is valid.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration, mirroring spec §4.F/§4.H/§4.D/§6.1.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub budgets: BudgetConfig,
    pub sandbox: SandboxConfig,
    pub git: GitConfig,
    pub tracker: TrackerConfig,
    pub learning: LearningConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load with fallback: explicit path, else `./ralph.config.json`,
    /// else built-in defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("failed to load config from {}", path.display()));
        }

        let local = PathBuf::from("ralph.config.json");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!(path = %local.display(), error = %e, "failed to load local config"),
            }
        }

        tracing::info!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).context("failed to read config file")?;
        let config: Self = serde_json::from_str(&content).context("failed to parse config file")?;
        tracing::info!(path = %path.display(), "loaded config");
        Ok(config)
    }
}

/// Iteration engine budgets, spec §4.F.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_iterations_per_task: u32,
    pub max_time_per_task_secs: u64,
    pub max_time_per_run_secs: u64,
    pub max_cost_per_task: f64,
    pub max_cost_per_run: f64,
    pub max_tasks_per_run: u32,
    pub max_retries: u32,
    pub on_failure: OnFailure,
    pub command_timeout_secs: u64,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    pub commit_prefix: String,
    pub auto_commit: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_iterations_per_task: 20,
            max_time_per_task_secs: 30 * 60,
            max_time_per_run_secs: 4 * 60 * 60,
            max_cost_per_task: 5.0,
            max_cost_per_run: 50.0,
            max_tasks_per_run: 100,
            max_retries: 2,
            on_failure: OnFailure::Continue,
            command_timeout_secs: 30,
            input_cost_per_1k: 0.003,
            output_cost_per_1k: 0.015,
            commit_prefix: String::new(),
            auto_commit: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    Continue,
    Stop,
    Retry,
}

/// Overlay sandbox policy, spec §4.D.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub path_allowlist: Vec<String>,
    pub path_denylist: Vec<String>,
    pub command_allowlist: Vec<String>,
    pub command_denylist: Vec<String>,
    pub max_commands: u32,
    pub max_file_size_bytes: u64,
    pub enable_read_cache: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            path_allowlist: Vec::new(),
            path_denylist: vec![".git".into()],
            command_allowlist: Vec::new(),
            command_denylist: vec!["rm -rf /".into(), "git push --force".into()],
            max_commands: 200,
            max_file_size_bytes: 10 * 1024 * 1024,
            enable_read_cache: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub repo_root: PathBuf,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self { repo_root: PathBuf::from(".") }
    }
}

/// Tracker bridge configuration, spec §4.H.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub tracker_type: String,
    pub project: String,
    pub base_url: Option<String>,
    pub issue_type_map: HashMap<String, String>,
    pub status_map: HashMap<String, String>,
    pub reverse_status_map: Option<HashMap<String, String>>,
    pub auto_create: bool,
    pub auto_transition: bool,
    pub auto_comment: bool,
    pub auto_pull: bool,
    pub dry_run: bool,
}

/// Pattern detection / self-improvement engine, spec §4.J–§4.L.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub enabled: bool,
    pub min_confidence: f64,
    pub min_samples: usize,
    pub auto_apply: bool,
    pub guidance_dir: PathBuf,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: 0.6,
            min_samples: 5,
            auto_apply: false,
            guidance_dir: PathBuf::from("guidance"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { state_dir: PathBuf::from("state") }
    }
}

impl StorageConfig {
    pub fn tasks_log(&self) -> PathBuf {
        self.state_dir.join("tasks.jsonl")
    }
    pub fn progress_log(&self) -> PathBuf {
        self.state_dir.join("progress.jsonl")
    }
    pub fn metrics_log(&self) -> PathBuf {
        self.state_dir.join("metrics.jsonl")
    }
    pub fn learning_log(&self) -> PathBuf {
        self.state_dir.join("learning.jsonl")
    }
    pub fn tracker_ops_log(&self) -> PathBuf {
        self.state_dir.join("tracker-ops.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.budgets.max_iterations_per_task, 20);
        assert!(config.budgets.auto_commit);
        assert_eq!(config.storage.tasks_log(), PathBuf::from("state/tasks.jsonl"));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let json = r#"{"budgets": {"max_iterations_per_task": 5}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.budgets.max_iterations_per_task, 5);
        assert_eq!(config.budgets.max_tasks_per_run, 100);
        assert!(!config.tracker.enabled);
    }
}
