//! Model endpoint plumbing for thinkloop.
//!
//! `HttpTransport` performs single OpenAI-compatible exchanges;
//! `RetryingLlmClient` layers the backoff policy on top and is what the
//! agent loop holds as its `LlmClient`.

pub mod client;
pub mod openai_compat;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

pub use client::RetryingLlmClient;
pub use openai_compat::HttpTransport;
pub use retry::{RetryPolicy, RetryState};

use thinkloop_config::AppConfig;

/// Build the retrying client described by the configuration.
pub fn client_from_config(config: &AppConfig) -> RetryingLlmClient {
    let transport = HttpTransport::new(
        "openai-compatible",
        config.base_url.clone(),
        config.api_key.clone(),
        Duration::from_secs(config.request_timeout_secs),
    );
    RetryingLlmClient::new(Arc::new(transport), RetryPolicy::from_config(&config.retry))
}
