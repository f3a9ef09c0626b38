//! The retrying LLM client.
//!
//! Wraps an [`LlmTransport`] and owns the retry policy. Transient failures
//! (rate limits, 5xx gateway faults, connection trouble) are retried with
//! exponential backoff; anything else surfaces immediately.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use thinkloop_core::error::LlmError;
use thinkloop_core::llm::{ChatRequest, ChatResponse, LlmClient, LlmTransport};

use crate::openai_compat::parse_chat_response;
use crate::retry::{RetryPolicy, is_retryable_status};

/// Longest slice of an error body kept in `LlmError::Api` messages.
const MAX_ERROR_BODY_CHARS: usize = 500;

pub struct RetryingLlmClient {
    transport: Arc<dyn LlmTransport>,
    policy: RetryPolicy,
}

impl RetryingLlmClient {
    pub fn new(transport: Arc<dyn LlmTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    fn name(&self) -> &str {
        self.transport.name()
    }

    async fn send(&self, request: ChatRequest) -> std::result::Result<ChatResponse, LlmError> {
        let mut state = self.policy.start();

        loop {
            let attempt = state.begin_attempt();

            let failure = match self.transport.send(&request).await {
                Ok(raw) if raw.is_success() => {
                    debug!(transport = %self.transport.name(), attempt, "Model request succeeded");
                    return parse_chat_response(&raw.body);
                }
                Ok(raw) => {
                    let error = LlmError::Api {
                        status_code: raw.status,
                        attempts: attempt,
                        message: truncate(&raw.body),
                    };
                    if !is_retryable_status(raw.status) {
                        warn!(status = raw.status, attempt, "Model request failed with non-retryable status");
                        return Err(error);
                    }
                    error
                }
                Err(e) => LlmError::Connection {
                    attempts: attempt,
                    message: e.to_string(),
                },
            };

            match state.next_delay() {
                Some(delay) => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "Transient model failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(attempts = attempt, error = %failure, "Model request retries exhausted");
                    return Err(failure);
                }
            }
        }
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body.to_string();
    }
    let cut: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use thinkloop_core::error::TransportError;
    use thinkloop_core::llm::{ChatMessage, RawResponse};

    const OK_BODY: &str = r#"{"model": "m", "choices": [{"message": {"role": "assistant", "content": "done"}}]}"#;

    /// Replays a fixed script of transport outcomes and counts calls.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<RawResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl LlmTransport for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, _request: &ChatRequest) -> Result<RawResponse, TransportError> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(RawResponse::new(500, "script exhausted")))
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::new("m", vec![ChatMessage::user("hello")])
    }

    #[tokio::test(start_paused = true)]
    async fn retries_503_twice_then_succeeds_with_backoff() {
        let base = Duration::from_millis(100);
        let transport = ScriptedTransport::new(vec![
            Ok(RawResponse::new(503, "unavailable")),
            Ok(RawResponse::new(503, "unavailable")),
            Ok(RawResponse::new(200, OK_BODY)),
        ]);
        let client = RetryingLlmClient::new(transport.clone(), RetryPolicy::new(3, base));

        let started = tokio::time::Instant::now();
        let response = client.send(request()).await.unwrap();

        assert_eq!(response.content.as_deref(), Some("done"));
        assert_eq!(transport.calls(), 3);
        // base before the first retry, 2*base before the second
        assert!(started.elapsed() >= base * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_status_fails_immediately() {
        let transport = ScriptedTransport::new(vec![
            Ok(RawResponse::new(400, "bad request")),
            Ok(RawResponse::new(200, OK_BODY)),
        ]);
        let client = RetryingLlmClient::new(transport.clone(), RetryPolicy::new(3, Duration::from_millis(10)));

        let err = client.send(request()).await.unwrap_err();
        assert_eq!(err.status_code(), Some(400));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_api_error() {
        let transport = ScriptedTransport::new(vec![
            Ok(RawResponse::new(429, "slow down")),
            Ok(RawResponse::new(502, "bad gateway")),
            Ok(RawResponse::new(504, "gateway timeout")),
        ]);
        let client = RetryingLlmClient::new(transport.clone(), RetryPolicy::new(2, Duration::from_millis(10)));

        match client.send(request()).await.unwrap_err() {
            LlmError::Api {
                status_code,
                attempts,
                message,
            } => {
                assert_eq!(status_code, 504);
                assert_eq!(attempts, 3);
                assert!(message.contains("gateway timeout"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_failures_are_retried() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Connection("refused".into())),
            Err(TransportError::Timeout("30s".into())),
            Ok(RawResponse::new(200, OK_BODY)),
        ]);
        let client = RetryingLlmClient::new(transport.clone(), RetryPolicy::new(3, Duration::from_millis(10)));

        assert!(client.send(request()).await.is_ok());
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_connection_failure_is_typed() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Connection("refused".into())),
            Err(TransportError::Connection("refused".into())),
        ]);
        let client = RetryingLlmClient::new(transport.clone(), RetryPolicy::new(1, Duration::from_millis(10)));

        let err = client.send(request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Connection { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn undecodable_success_body_is_invalid_response() {
        let transport = ScriptedTransport::new(vec![Ok(RawResponse::new(200, "<html>oops</html>"))]);
        let client = RetryingLlmClient::new(transport.clone(), RetryPolicy::new(3, Duration::from_millis(10)));

        let err = client.send(request()).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn long_error_bodies_truncated() {
        let body = "x".repeat(2000);
        let truncated = truncate(&body);
        assert!(truncated.len() < 600);
        assert!(truncated.ends_with("..."));
    }
}
