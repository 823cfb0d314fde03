//! A canned-response agent for tests, grounded on the teacher's
//! `llm::client::mock::MockLlmClient` (an atomic call counter plus a
//! queue of pre-scripted responses).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AgentError, ChatResponse, FinishReason, Message, ToolDefinition};

pub struct MockAgent {
    responses: Mutex<Vec<ChatResponse>>,
    call_count: AtomicUsize,
}

impl MockAgent {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self { responses: Mutex::new(responses), call_count: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn stop(content: impl Into<String>) -> ChatResponse {
        ChatResponse { content: content.into(), tool_calls: Vec::new(), finish_reason: FinishReason::Stop, usage: None }
    }
}

#[async_trait]
impl super::AgentProvider for MockAgent {
    async fn chat(&self, _messages: &[Message], _tools: &[ToolDefinition]) -> Result<ChatResponse, AgentError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().expect("mock agent mutex poisoned");
        if responses.is_empty() {
            return Err(AgentError::Request("mock agent exhausted".into()));
        }
        Ok(responses.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentProvider;

    #[tokio::test]
    async fn returns_responses_in_order_then_errors() {
        let agent = MockAgent::new(vec![MockAgent::stop("first")]);
        let r = agent.chat(&[], &[]).await.unwrap();
        assert_eq!(r.content, "first");
        assert_eq!(agent.calls(), 1);
        assert!(agent.chat(&[], &[]).await.is_err());
    }
}
