//! The agent provider interface, spec §4.E. Stateless: one `chat` call
//! is a fresh, self-contained turn, the way the teacher's `LlmClient`
//! is documented as a "fresh context per call" design so the loop can
//! reconstruct the whole conversation from the task log instead of
//! trusting provider-side memory.

pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), tool_call_id: None }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), tool_call_id: None }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_call_id: None }
    }
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: Role::Tool, content: content.into(), tool_call_id: Some(tool_call_id.into()) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent provider request failed: {0}")]
    Request(String),
    #[error("agent provider response was malformed: {0}")]
    InvalidResponse(String),
}

/// Abstract capability: `chat(messages, tools) -> response`. The core
/// never assumes a concrete model or vendor.
#[async_trait]
pub trait AgentProvider: Send + Sync {
    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<ChatResponse, AgentError>;
}

/// The five tools the core exposes to every agent, spec §4.E.
pub fn core_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "read_file".into(),
            description: "Read a file from the sandboxed workspace.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"],
            }),
        },
        ToolDefinition {
            name: "write_file".into(),
            description: "Write (creating or overwriting) a file in the sandboxed workspace.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" },
                },
                "required": ["path", "content"],
            }),
        },
        ToolDefinition {
            name: "run_bash".into(),
            description: "Run a shell command at the workspace root.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "command": { "type": "string" } },
                "required": ["command"],
            }),
        },
        ToolDefinition {
            name: "task_complete".into(),
            description: "Signal that the task is done.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "artifacts": { "type": "array", "items": { "type": "string" } },
                    "summary": { "type": "string" },
                },
                "required": ["artifacts"],
            }),
        },
        ToolDefinition {
            name: "task_blocked".into(),
            description: "Signal that the task cannot proceed.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "blocker": { "type": "string" } },
                "required": ["blocker"],
            }),
        },
    ]
}
