//! Dispatch for the five core tools, spec §4.E. Grounded on the
//! teacher's `ToolExecutor::execute` match-on-name pattern, narrowed to
//! exactly the tool set this spec names.

use serde::{Deserialize, Serialize};

use crate::agent::ToolCall;
use crate::sandbox::Sandbox;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: false }
    }
    pub fn error(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: true }
    }
}

/// Signal extracted from a `task_complete`/`task_blocked` call, if the
/// tool call was one of those two. The iteration engine consults this
/// to interpret the response per spec §4.F step 8; dispatch of the
/// call still goes through [`execute`] like any other tool so a
/// uniform tool-result message can be built.
#[derive(Debug, Clone)]
pub enum TerminalSignal {
    Complete { artifacts: Vec<String>, summary: Option<String> },
    Blocked { blocker: String },
}

pub fn terminal_signal(call: &ToolCall) -> Option<TerminalSignal> {
    match call.name.as_str() {
        "task_complete" => {
            let artifacts = call.input.get("artifacts").and_then(|v| v.as_array()).map(|a| {
                a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
            }).unwrap_or_default();
            let summary = call.input.get("summary").and_then(|v| v.as_str()).map(str::to_string);
            Some(TerminalSignal::Complete { artifacts, summary })
        }
        "task_blocked" => {
            let blocker = call.input.get("blocker").and_then(|v| v.as_str()).unwrap_or("unspecified").to_string();
            Some(TerminalSignal::Blocked { blocker })
        }
        _ => None,
    }
}

/// Execute one tool call against the sandbox. `bash_timeout` applies
/// only to `run_bash`.
pub async fn execute(call: &ToolCall, sandbox: &mut Sandbox, bash_timeout: std::time::Duration) -> ToolOutcome {
    match call.name.as_str() {
        "read_file" => {
            let Some(path) = call.input.get("path").and_then(|v| v.as_str()) else {
                return ToolOutcome::error("read_file requires a path argument");
            };
            match sandbox.read_file(path) {
                Ok(content) => ToolOutcome::ok(content),
                Err(e) => ToolOutcome::error(e.to_string()),
            }
        }
        "write_file" => {
            let (Some(path), Some(content)) = (
                call.input.get("path").and_then(|v| v.as_str()),
                call.input.get("content").and_then(|v| v.as_str()),
            ) else {
                return ToolOutcome::error("write_file requires path and content arguments");
            };
            match sandbox.write_file(path, content) {
                Ok(bytes) => ToolOutcome::ok(format!("wrote {bytes} bytes to {path}")),
                Err(e) => ToolOutcome::error(e.to_string()),
            }
        }
        "run_bash" => {
            let Some(command) = call.input.get("command").and_then(|v| v.as_str()) else {
                return ToolOutcome::error("run_bash requires a command argument");
            };
            let output = sandbox.bash(command, bash_timeout).await;
            let combined = format!(
                "exit_code={}\nstdout:\n{}\nstderr:\n{}",
                output.exit_code, output.stdout, output.stderr
            );
            ToolOutcome::ok(combined)
        }
        "task_complete" => ToolOutcome::ok("acknowledged: task marked complete"),
        "task_blocked" => ToolOutcome::ok("acknowledged: task marked blocked"),
        other => ToolOutcome::error(format!("unknown tool: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use tempfile::tempdir;

    fn call(name: &str, input: serde_json::Value) -> ToolCall {
        ToolCall { id: "call_1".into(), name: name.into(), input }
    }

    #[tokio::test]
    async fn read_and_write_round_trip() {
        let dir = tempdir().unwrap();
        let mut sandbox = Sandbox::new(dir.path(), SandboxConfig::default());
        let write = execute(
            &call("write_file", serde_json::json!({"path": "a.txt", "content": "hi"})),
            &mut sandbox,
            std::time::Duration::from_secs(1),
        )
        .await;
        assert!(!write.is_error);
        let read = execute(&call("read_file", serde_json::json!({"path": "a.txt"})), &mut sandbox, std::time::Duration::from_secs(1)).await;
        assert_eq!(read.content, "hi");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let dir = tempdir().unwrap();
        let mut sandbox = Sandbox::new(dir.path(), SandboxConfig::default());
        let out = execute(&call("delete_everything", serde_json::json!({})), &mut sandbox, std::time::Duration::from_secs(1)).await;
        assert!(out.is_error);
    }

    #[test]
    fn terminal_signal_extracts_task_complete() {
        let c = call("task_complete", serde_json::json!({"artifacts": ["out.txt"], "summary": "done"}));
        match terminal_signal(&c) {
            Some(TerminalSignal::Complete { artifacts, summary }) => {
                assert_eq!(artifacts, vec!["out.txt".to_string()]);
                assert_eq!(summary.as_deref(), Some("done"));
            }
            _ => panic!("expected Complete"),
        }
    }

    #[test]
    fn terminal_signal_extracts_task_blocked() {
        let c = call("task_blocked", serde_json::json!({"blocker": "missing credentials"}));
        match terminal_signal(&c) {
            Some(TerminalSignal::Blocked { blocker }) => assert_eq!(blocker, "missing credentials"),
            _ => panic!("expected Blocked"),
        }
    }

    #[test]
    fn non_terminal_tool_has_no_signal() {
        let c = call("read_file", serde_json::json!({"path": "a.txt"}));
        assert!(terminal_signal(&c).is_none());
    }
}
