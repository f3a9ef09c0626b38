//! End-to-end tests: the real built-in tools, memory, scheduler and service
//! wired through `AgentRuntime`, with the model scripted.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use thinkloop_agent::testing::{ScriptedLlmClient, raw_tool_call, text_response, tool_call_response};
use thinkloop_agent::{AgentRuntime, ExecutionOptions, Termination};
use thinkloop_config::{AgentDefinition, AppConfig, ToolsConfig};
use thinkloop_core::agent::AgentRepository;
use thinkloop_core::error::TransportError;
use thinkloop_core::llm::{ChatRequest, LlmClient, LlmTransport, RawResponse};
use thinkloop_core::turn::Role;
use thinkloop_providers::{RetryPolicy, RetryingLlmClient};

// ── Helpers ──────────────────────────────────────────────────────────────

fn workspace() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("file.txt"),
        "The quick brown fox jumps over the lazy dog.\nIt was a sunny day.\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("app.log"),
        "INFO starting\nERROR disk full\nINFO retrying\nERROR disk still full\n",
    )
    .unwrap();
    dir
}

fn config_for(dir: &Path, agents: Vec<AgentDefinition>) -> AppConfig {
    AppConfig {
        tools: ToolsConfig {
            workspace_dir: Some(dir.to_path_buf()),
            ..ToolsConfig::default()
        },
        agents,
        ..AppConfig::default()
    }
}

fn agent_with_tools(name: &str, tools: &[&str]) -> AgentDefinition {
    AgentDefinition {
        name: name.into(),
        description: format!("Test agent {name} for end-to-end runs"),
        authorized_tools: tools.iter().map(|t| t.to_string()).collect(),
        ..AgentDefinition::default_agent()
    }
}

async fn runtime(config: &AppConfig, llm: Arc<dyn LlmClient>) -> AgentRuntime {
    let registry = Arc::new(thinkloop_tools::default_registry(&config.tools).unwrap());
    AgentRuntime::from_config(config, llm, registry).await.unwrap()
}

// ── Tool use ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn reads_a_file_and_summarizes_it() {
    let dir = workspace();
    let config = config_for(dir.path(), vec![]);
    let client = Arc::new(ScriptedLlmClient::tool_then_answer(
        vec![raw_tool_call("read_file", json!({"path": "file.txt"}))],
        "Let me read the file first.",
        "The file describes a fox jumping over a dog on a sunny day.",
    ));
    let rt = runtime(&config, client.clone()).await;

    let result = rt
        .service
        .execute_agent_by_name("assistant", "Read file.txt and summarize it", ExecutionOptions::new())
        .await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(result.termination, Some(Termination::Answered));
    assert_eq!(result.output, "The file describes a fox jumping over a dog on a sunny day.");
    assert_eq!(result.iterations, 2);
    assert_eq!(result.tool_trace.len(), 1);
    assert!(result.tool_trace[0].result.success);
    assert!(result.tool_trace[0].result.output.contains("quick brown fox"));

    // The model saw the file content on its second turn
    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    assert!(
        requests[1]
            .messages
            .iter()
            .any(|m| m.role == Role::Tool && m.content.contains("quick brown fox"))
    );

    // user, assistant(call), tool, assistant(answer)
    assert_eq!(result.context.as_ref().unwrap().turn_count(), 4);
}

#[tokio::test]
async fn failed_and_successful_calls_in_one_batch_are_independent() {
    let dir = workspace();
    let config = config_for(dir.path(), vec![]);
    let client = Arc::new(ScriptedLlmClient::tool_then_answer(
        vec![
            raw_tool_call("read_file", json!({"path": "missing.txt"})),
            raw_tool_call("read_file", json!({"path": "file.txt"})),
        ],
        "",
        "Only file.txt exists.",
    ));
    let rt = runtime(&config, client.clone()).await;

    let result = rt
        .service
        .execute_agent_by_name("assistant", "Read both files", ExecutionOptions::new())
        .await;

    assert!(result.success);
    assert_eq!(result.tool_trace.len(), 2);
    assert!(!result.tool_trace[0].result.success);
    assert!(result.tool_trace[0].result.error.is_some());
    assert!(result.tool_trace[1].result.success);

    // Both results reached the model, the failure as an error message
    let tool_messages: Vec<_> = client.requests()[1]
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.clone())
        .collect();
    assert_eq!(tool_messages.len(), 2);
    assert!(tool_messages[0].starts_with("Error:"));
    assert!(tool_messages[1].contains("quick brown fox"));
}

#[tokio::test]
async fn unauthorized_tool_is_never_executed() {
    let dir = workspace();
    let config = config_for(dir.path(), vec![agent_with_tools("reader", &["read_file"])]);
    let client = Arc::new(ScriptedLlmClient::tool_then_answer(
        vec![raw_tool_call("write_file", json!({"path": "out.txt", "content": "pwned"}))],
        "",
        "I am not allowed to write files.",
    ));
    let rt = runtime(&config, client.clone()).await;

    let result = rt
        .service
        .execute_agent_by_name("reader", "Write out.txt", ExecutionOptions::new())
        .await;

    assert!(result.success);
    let denied = &result.tool_trace[0].result;
    assert!(!denied.success);
    assert!(denied.error.as_deref().unwrap().contains("not authorized"));
    assert!(!dir.path().join("out.txt").exists());

    // Only the authorized tool was offered to the model
    let offered: Vec<_> = client.requests()[0].tools.iter().map(|t| t.name.clone()).collect();
    assert_eq!(offered, vec!["read_file"]);
}

#[tokio::test]
async fn writes_stay_inside_the_workspace() {
    let dir = workspace();
    let config = config_for(dir.path(), vec![]);
    let client = Arc::new(ScriptedLlmClient::new(vec![
        tool_call_response(
            vec![
                raw_tool_call("write_file", json!({"path": "notes/summary.md", "content": "# Fox"})),
                raw_tool_call("write_file", json!({"path": "../escape.txt", "content": "nope"})),
            ],
            "",
        ),
        text_response("Saved the summary."),
    ]));
    let rt = runtime(&config, client).await;

    let result = rt
        .service
        .execute_agent_by_name("assistant", "Save a summary", ExecutionOptions::new())
        .await;

    assert!(result.success);
    assert!(result.tool_trace[0].result.success);
    assert!(!result.tool_trace[1].result.success);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("notes/summary.md")).unwrap(),
        "# Fox"
    );
    assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
}

// ── Termination ──────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_identical_searches_stop_the_run() {
    let dir = workspace();
    let config = config_for(dir.path(), vec![]);
    let grep = || tool_call_response(vec![raw_tool_call("grep", json!({"pattern": "ERROR"}))], "");
    let client = Arc::new(ScriptedLlmClient::new(vec![
        grep(),
        grep(),
        grep(),
        text_response("never reached"),
    ]));
    let rt = runtime(&config, client.clone()).await;

    let result = rt
        .service
        .execute_agent_by_name("assistant", "Find errors in the logs", ExecutionOptions::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.termination, Some(Termination::Stagnation));
    assert_eq!(result.tool_trace.len(), 3);
    assert!(result.tool_trace.iter().all(|e| e.result.output.contains("disk full")));
    assert_eq!(client.call_count(), 3);
    assert_eq!(client.remaining(), 1);
}

#[tokio::test]
async fn iteration_cap_returns_partial_progress() {
    let dir = workspace();
    let config = config_for(dir.path(), vec![]);
    let client = Arc::new(ScriptedLlmClient::new(vec![
        tool_call_response(
            vec![raw_tool_call("list_dir", json!({"path": "."}))],
            "Looking around.",
        ),
        tool_call_response(
            vec![raw_tool_call("grep", json!({"pattern": "fox"}))],
            "Searching for the fox.",
        ),
        text_response("never reached"),
    ]));
    let rt = runtime(&config, client).await;

    let result = rt
        .service
        .execute_agent_by_name(
            "assistant",
            "Explore",
            ExecutionOptions::new().with_max_iterations(2),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.termination, Some(Termination::MaxIterations));
    assert_eq!(result.iterations, 2);
    assert_eq!(result.tool_trace.len(), 2);
    assert_eq!(result.output, "Searching for the fox.");
}

#[tokio::test(start_paused = true)]
async fn slow_model_hits_the_deadline() {
    let dir = workspace();
    let config = config_for(dir.path(), vec![]);
    let client = Arc::new(ScriptedLlmClient::single_text("too late").with_delay(Duration::from_secs(10)));
    let rt = runtime(&config, client).await;

    let result = rt
        .service
        .execute_agent_by_name(
            "assistant",
            "Hello",
            ExecutionOptions::new().with_timeout(Duration::from_secs(1)),
        )
        .await;

    assert!(!result.success);
    assert!(result.timed_out());
    assert!(result.elapsed_seconds < 5.0);
    assert_eq!(rt.service.metrics().timed_out, 1);
}

#[tokio::test]
async fn malformed_output_is_fatal_after_retries() {
    let dir = workspace();
    let config = config_for(dir.path(), vec![]);
    let client = Arc::new(ScriptedLlmClient::new(vec![
        text_response("{not json"),
        text_response("{\"tool\": "),
        text_response("{still broken"),
    ]));
    let rt = runtime(&config, client.clone()).await;

    let result = rt
        .service
        .execute_agent_by_name("assistant", "Do something", ExecutionOptions::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.termination, Some(Termination::FatalError));
    assert!(result.error.as_deref().unwrap().contains("Malformed model output"));
    assert_eq!(client.call_count(), 3);
}

#[tokio::test]
async fn text_command_format_drives_tools() {
    let dir = workspace();
    let config = config_for(dir.path(), vec![]);
    let client = Arc::new(ScriptedLlmClient::new(vec![
        text_response("```json\n{\"tool\": \"read_file\", \"args\": {\"path\": \"file.txt\"}}\n```"),
        text_response("It is about a fox."),
    ]));
    let rt = runtime(&config, client).await;

    let result = rt
        .service
        .execute_agent_by_name("assistant", "What is in file.txt?", ExecutionOptions::new())
        .await;

    assert!(result.success);
    assert_eq!(result.tool_trace.len(), 1);
    assert_eq!(result.tool_trace[0].call.name, "read_file");
    assert!(result.tool_trace[0].result.success);
}

#[tokio::test]
async fn task_completed_ends_the_run_with_its_message() {
    let dir = workspace();
    let config = config_for(dir.path(), vec![]);
    let client = Arc::new(ScriptedLlmClient::new(vec![
        text_response(r#"{"tool_name": "grep", "arguments": {"pattern": "ERROR", "path": "app.log"}}"#),
        tool_call_response(
            vec![raw_tool_call("task_completed", json!({"message": "app.log has 2 errors."}))],
            "",
        ),
        text_response("never sent"),
    ]));
    let rt = runtime(&config, client.clone()).await;

    let result = rt
        .service
        .execute_agent_by_name("assistant", "Count the errors in app.log", ExecutionOptions::new())
        .await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(result.termination, Some(Termination::Answered));
    assert_eq!(result.output, "app.log has 2 errors.");
    assert_eq!(result.iterations, 2);
    assert_eq!(result.tool_trace.len(), 1);
    assert_eq!(result.tool_trace[0].call.name, "grep");
    assert!(result.tool_trace[0].result.success);
    assert_eq!(client.remaining(), 1);

    let requests = client.requests();
    assert!(requests[0].tools.iter().any(|t| t.name == "task_completed"));
}

// ── Service ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_and_inactive_agents_fail_without_calling_the_model() {
    let dir = workspace();
    let config = config_for(dir.path(), vec![agent_with_tools("sleeper", &[])]);
    let client = Arc::new(ScriptedLlmClient::single_text("unused"));
    let rt = runtime(&config, client.clone()).await;

    let missing = rt
        .service
        .execute_agent_by_name("ghost", "Hello", ExecutionOptions::new())
        .await;
    assert!(!missing.success);
    assert!(missing.error.as_deref().unwrap().contains("not found"));

    let mut sleeper = rt.repository.find_by_name("sleeper").await.unwrap();
    sleeper.deactivate();
    rt.repository.save(sleeper.clone()).await.unwrap();

    let inactive = rt
        .service
        .execute_agent(sleeper.id(), "Hello", ExecutionOptions::new())
        .await;
    assert!(!inactive.success);
    assert!(inactive.error.as_deref().unwrap().contains("inactive"));

    assert_eq!(client.call_count(), 0);
    let stats = rt.service.stats().await;
    assert_eq!(stats.total_agents, 2);
    assert_eq!(stats.active_agents, 1);
    assert_eq!(stats.executions.failed, 2);
}

#[tokio::test]
async fn memory_carries_over_between_runs() {
    let dir = workspace();
    let config = config_for(dir.path(), vec![]);
    let client = Arc::new(ScriptedLlmClient::new(vec![
        text_response("Nice to meet you, Ana."),
        text_response("Your name is Ana."),
    ]));
    let rt = runtime(&config, client.clone()).await;

    let first = rt
        .service
        .execute_agent_by_name("assistant", "My name is Ana", ExecutionOptions::new())
        .await;
    assert!(first.success);

    let second = rt
        .service
        .execute_agent_by_name("assistant", "What is my name?", ExecutionOptions::new())
        .await;
    assert!(second.success);

    let second_request = &client.requests()[1];
    assert!(second_request.messages.iter().any(|m| m.content == "My name is Ana"));
    assert!(second_request.messages.iter().any(|m| m.content == "Nice to meet you, Ana."));

    let stats = rt.service.stats().await;
    assert_eq!(stats.memory.agents_with_memory, 1);
    assert_eq!(stats.memory.total_turns, 4);
    assert_eq!(stats.executions.succeeded, 2);
}

// ── Full pipeline through the retrying client ───────────────────────────

/// Transport that replays canned HTTP responses.
struct CannedTransport {
    responses: Mutex<VecDeque<RawResponse>>,
    sent: Mutex<Vec<ChatRequest>>,
}

impl CannedTransport {
    fn new(responses: Vec<RawResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmTransport for CannedTransport {
    fn name(&self) -> &str {
        "canned"
    }

    async fn send(&self, request: &ChatRequest) -> Result<RawResponse, TransportError> {
        self.sent.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Connection("no more canned responses".into()))
    }
}

fn openai_tool_call_body() -> String {
    json!({
        "model": "gpt-4o-mini",
        "choices": [{
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "grep", "arguments": "{\"pattern\":\"ERROR\"}"}
                }]
            }
        }],
        "usage": {"prompt_tokens": 50, "completion_tokens": 10, "total_tokens": 60}
    })
    .to_string()
}

fn openai_text_body(text: &str) -> String {
    json!({
        "model": "gpt-4o-mini",
        "choices": [{"message": {"role": "assistant", "content": text}}],
        "usage": {"prompt_tokens": 80, "completion_tokens": 12, "total_tokens": 92}
    })
    .to_string()
}

#[tokio::test(start_paused = true)]
async fn transient_server_errors_are_retried_end_to_end() {
    let dir = workspace();
    let config = config_for(dir.path(), vec![]);
    let transport = Arc::new(CannedTransport::new(vec![
        RawResponse::new(503, "overloaded"),
        RawResponse::new(503, "overloaded"),
        RawResponse::new(200, openai_tool_call_body()),
        RawResponse::new(200, openai_text_body("The log has two disk errors.")),
    ]));
    let client = Arc::new(RetryingLlmClient::new(
        transport.clone(),
        RetryPolicy::new(3, Duration::from_millis(100)),
    ));
    let rt = runtime(&config, client).await;

    let result = rt
        .service
        .execute_agent_by_name("assistant", "Check app.log for errors", ExecutionOptions::new())
        .await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(result.output, "The log has two disk errors.");
    assert_eq!(result.tool_trace.len(), 1);
    assert!(result.tool_trace[0].result.output.contains("ERROR disk full"));
    assert_eq!(transport.sent(), 4);
}

#[tokio::test(start_paused = true)]
async fn client_errors_are_not_retried() {
    let dir = workspace();
    let config = config_for(dir.path(), vec![]);
    let transport = Arc::new(CannedTransport::new(vec![
        RawResponse::new(401, "{\"error\": \"bad key\"}"),
        RawResponse::new(200, openai_text_body("unused")),
    ]));
    let client = Arc::new(RetryingLlmClient::new(
        transport.clone(),
        RetryPolicy::new(3, Duration::from_millis(100)),
    ));
    let rt = runtime(&config, client).await;

    let result = rt
        .service
        .execute_agent_by_name("assistant", "Hello", ExecutionOptions::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.termination, Some(Termination::FatalError));
    assert_eq!(transport.sent(), 1);
}
