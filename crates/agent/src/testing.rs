//! Scripted language-model client for exercising the loop without a network.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thinkloop_core::error::LlmError;
use thinkloop_core::llm::{ChatRequest, ChatResponse, LlmClient, RawToolCall, Usage};

static NEXT_CALL_ID: AtomicUsize = AtomicUsize::new(1);

/// A client that returns a sequence of scripted responses.
///
/// Each call to `send` pops the next response in the queue and records the
/// request it was given. Once the script runs out every call fails with
/// [`LlmError::InvalidResponse`].
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
    requests: Mutex<Vec<ChatRequest>>,
    delay: Option<Duration>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    /// Script that can interleave failures with responses.
    pub fn with_results(results: Vec<Result<ChatResponse, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(results.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Client that answers once with plain text.
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![text_response(text)])
    }

    /// Client that first requests tools, then answers.
    pub fn tool_then_answer(tool_calls: Vec<RawToolCall>, thought: &str, answer: &str) -> Self {
        Self::new(vec![tool_call_response(tool_calls, thought), text_response(answer)])
    }

    /// Sleep before every response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedLlmClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let call = {
            let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
            requests.push(request);
            requests.len()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.responses.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        next.unwrap_or_else(|| {
            Err(LlmError::InvalidResponse(format!(
                "scripted client has no response for call #{call}"
            )))
        })
    }
}

fn mock_usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

/// A plain text response (no tool calls).
pub fn text_response(text: &str) -> ChatResponse {
    ChatResponse {
        content: Some(text.to_string()),
        tool_calls: vec![],
        usage: Some(mock_usage()),
        model: "mock-model".into(),
    }
}

/// A response carrying native tool calls and optional thought content.
pub fn tool_call_response(tool_calls: Vec<RawToolCall>, thought: &str) -> ChatResponse {
    ChatResponse {
        content: (!thought.is_empty()).then(|| thought.to_string()),
        tool_calls,
        usage: Some(mock_usage()),
        model: "mock-model".into(),
    }
}

/// A native tool call with a fresh id.
pub fn raw_tool_call(name: &str, args: serde_json::Value) -> RawToolCall {
    let n = NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed);
    RawToolCall {
        id: format!("call_{name}_{n}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}
