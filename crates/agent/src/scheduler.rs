//! Tool scheduler: authorizes, validates and runs a batch of tool calls.
//!
//! Every requested call produces exactly one [`ToolResult`], in request
//! order. Rejections, validation failures, tool errors, timeouts and panics
//! all come back as `success: false` results rather than errors, so the
//! model can see what went wrong and recover.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, warn};

use thinkloop_core::agent::AgentCapabilities;
use thinkloop_core::error::ToolError;
use thinkloop_core::tool::{ToolCall, ToolRegistry, ToolResult, validate_arguments};

pub struct ToolScheduler {
    registry: Arc<ToolRegistry>,

    /// Per-call limit; `None` lets tools run as long as they need
    tool_timeout: Option<Duration>,
}

impl ToolScheduler {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            tool_timeout: None,
        }
    }

    /// Fail any single call that runs longer than `timeout`.
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run a batch. Calls execute concurrently; results keep request order.
    pub async fn execute(&self, capabilities: &AgentCapabilities, calls: &[ToolCall]) -> Vec<ToolResult> {
        join_all(calls.iter().map(|call| self.execute_one(capabilities, call))).await
    }

    async fn execute_one(&self, capabilities: &AgentCapabilities, call: &ToolCall) -> ToolResult {
        let started = Instant::now();
        let result = match self.dispatch(capabilities, call).await {
            Ok(output) => ToolResult::success(&call.id, &call.name, output),
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool call failed");
                ToolResult::failure(&call.id, &call.name, e.to_string())
            }
        };
        result.with_duration_ms(started.elapsed().as_millis() as u64)
    }

    async fn dispatch(&self, capabilities: &AgentCapabilities, call: &ToolCall) -> Result<String, ToolError> {
        if !capabilities.can_use_tool(&call.name) {
            return Err(ToolError::Unauthorized {
                tool_name: call.name.clone(),
                allowed: capabilities.authorized_tools.join(", "),
            });
        }

        let tool = self
            .registry
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        let arguments = validate_arguments(&call.name, &tool.parameters(), &call.arguments)?;

        debug!(tool = %call.name, call_id = %call.id, "Executing tool");

        let name = call.name.clone();
        let timeout = self.tool_timeout;
        let handle = tokio::spawn(async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, tool.execute(arguments))
                    .await
                    .unwrap_or_else(|_| {
                        Err(ToolError::Timeout {
                            tool_name: name,
                            timeout_secs: limit.as_secs(),
                        })
                    }),
                None => tool.execute(arguments).await,
            }
        });

        match handle.await {
            Ok(result) => result,
            Err(join_error) => Err(ToolError::ExecutionFailed {
                tool_name: call.name.clone(),
                reason: if join_error.is_panic() {
                    "tool panicked".into()
                } else {
                    "tool task was cancelled".into()
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use thinkloop_core::tool::{ParamType, Tool, ToolArgs, ToolParameter};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![
                ToolParameter::required("text", ParamType::String, "Text to echo"),
                ToolParameter::optional("times", ParamType::Integer, "Repeat count", Some(json!(1))),
            ]
        }
        async fn execute(&self, arguments: ToolArgs) -> Result<String, ToolError> {
            let text = arguments["text"].as_str().unwrap_or("").to_string();
            let times = arguments["times"].as_u64().unwrap_or(1) as usize;
            Ok(text.repeat(times))
        }
    }

    struct CountingTool {
        name: &'static str,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "Counts invocations"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![]
        }
        async fn execute(&self, _arguments: ToolArgs) -> Result<String, ToolError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok("ran".into())
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![]
        }
        async fn execute(&self, _arguments: ToolArgs) -> Result<String, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool_name: "fail".into(),
                reason: "disk on fire".into(),
            })
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "panic"
        }
        fn description(&self) -> &str {
            "Panics"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![]
        }
        async fn execute(&self, _arguments: ToolArgs) -> Result<String, ToolError> {
            panic!("boom");
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps for a minute"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![]
        }
        async fn execute(&self, _arguments: ToolArgs) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("done".into())
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(FailingTool));
        registry.register(Arc::new(PanickingTool));
        registry.register(Arc::new(SlowTool));
        Arc::new(registry)
    }

    fn caps(tools: &[&str]) -> AgentCapabilities {
        AgentCapabilities::new(
            "A test agent for scheduler tests",
            "You are a test agent.",
            tools.iter().map(|t| t.to_string()).collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn executes_and_fills_defaults() {
        let scheduler = ToolScheduler::new(registry());
        let results = scheduler
            .execute(&caps(&["echo"]), &[ToolCall::new("c1", "echo", json!({"text": "hi"}))])
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(results[0].output, "hi");
        assert_eq!(results[0].call_id, "c1");
    }

    #[tokio::test]
    async fn coerces_argument_types() {
        let scheduler = ToolScheduler::new(registry());
        let results = scheduler
            .execute(
                &caps(&["echo"]),
                &[ToolCall::new("c1", "echo", json!({"text": "ab", "times": "3"}))],
            )
            .await;
        assert_eq!(results[0].output, "ababab");
    }

    #[tokio::test]
    async fn unauthorized_tool_never_runs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let registry = registry();
        registry.register(Arc::new(CountingTool {
            name: "write_file",
            runs: runs.clone(),
        }));
        let scheduler = ToolScheduler::new(registry);

        let results = scheduler
            .execute(&caps(&["echo"]), &[ToolCall::new("c1", "write_file", json!({}))])
            .await;

        assert!(!results[0].success);
        let error = results[0].error.as_deref().unwrap();
        assert!(error.contains("not authorized"));
        assert!(error.contains("echo"));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_allow_list_is_unrestricted() {
        let scheduler = ToolScheduler::new(registry());
        let mut capabilities = caps(&["echo"]);
        capabilities.authorized_tools.clear();
        let results = scheduler
            .execute(&capabilities, &[ToolCall::new("c1", "echo", json!({"text": "x"}))])
            .await;
        assert!(results[0].success);
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let scheduler = ToolScheduler::new(registry());
        let mut capabilities = caps(&["echo"]);
        capabilities.authorized_tools.clear();
        let results = scheduler
            .execute(&capabilities, &[ToolCall::new("c1", "teleport", json!({}))])
            .await;
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn invalid_arguments_fail_before_execution() {
        let scheduler = ToolScheduler::new(registry());
        let results = scheduler
            .execute(
                &caps(&["echo"]),
                &[
                    ToolCall::new("c1", "echo", json!({})),
                    ToolCall::new("c2", "echo", json!({"text": "x", "times": "many"})),
                ],
            )
            .await;
        assert!(results[0].error.as_deref().unwrap().contains("missing required parameter 'text'"));
        assert!(results[1].error.as_deref().unwrap().contains("expected integer"));
    }

    #[tokio::test]
    async fn failures_and_panics_become_results() {
        let scheduler = ToolScheduler::new(registry());
        let results = scheduler
            .execute(
                &caps(&["fail", "panic", "echo"]),
                &[
                    ToolCall::new("c1", "fail", json!({})),
                    ToolCall::new("c2", "panic", json!({})),
                    ToolCall::new("c3", "echo", json!({"text": "still here"})),
                ],
            )
            .await;
        assert_eq!(results.len(), 3);
        assert!(results[0].error.as_deref().unwrap().contains("disk on fire"));
        assert!(results[1].error.as_deref().unwrap().contains("panicked"));
        assert!(results[2].success);
        assert_eq!(results[2].output, "still here");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let scheduler = ToolScheduler::new(registry()).with_tool_timeout(Duration::from_secs(5));
        let results = scheduler
            .execute(&caps(&["slow"]), &[ToolCall::new("c1", "slow", json!({}))])
            .await;
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn results_keep_request_order() {
        let scheduler = ToolScheduler::new(registry());
        let calls: Vec<ToolCall> = (0..5)
            .map(|i| ToolCall::new(format!("c{i}"), "echo", json!({"text": i.to_string()})))
            .collect();
        let results = scheduler.execute(&caps(&["echo"]), &calls).await;
        let outputs: Vec<_> = results.iter().map(|r| r.output.as_str()).collect();
        assert_eq!(outputs, vec!["0", "1", "2", "3", "4"]);
        let ids: Vec<_> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c1", "c2", "c3", "c4"]);
    }
}
