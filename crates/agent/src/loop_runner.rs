//! The agent reasoning loop implementation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use thinkloop_config::AppConfig;
use thinkloop_core::agent::RegisteredAgent;
use thinkloop_core::error::{AgentError, LlmError, MemoryError};
use thinkloop_core::event::{DomainEvent, EventBus};
use thinkloop_core::llm::{ChatMessage, ChatRequest, ChatResponse, LlmClient};
use thinkloop_core::tool::{ToolCall, ToolRegistry, ToolResult};
use thinkloop_core::turn::{ConversationContext, Turn};
use thinkloop_memory::MemoryCoordinator;

use crate::parser::{self, ModelAction};
use crate::prompt::PromptConstructor;
use crate::scheduler::ToolScheduler;
use crate::stagnation::{StagnationDetector, batch_signature};

/// Loop-wide knobs that don't vary per agent.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Model name sent with every request
    pub model: String,

    /// Re-prompts allowed for one unparseable reply before the run fails
    pub max_parse_retries: u32,

    /// Identical consecutive tool batches that end a run
    pub stagnation_threshold: u32,

    /// Cumulative token ceiling per run
    pub token_budget: Option<u64>,
}

impl LoopSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.default_model.clone(),
            max_parse_retries: config.agent.max_parse_retries,
            stagnation_threshold: config.agent.stagnation_threshold,
            token_budget: (config.agent.token_budget > 0).then_some(config.agent.token_budget),
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            max_parse_retries: 2,
            stagnation_threshold: 3,
            token_budget: None,
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The model gave a final answer
    Answered,
    MaxIterations,
    /// The same tool batch was requested repeatedly
    Stagnation,
    /// The execution deadline passed
    TimedOut,
    TokenBudgetExceeded,
    /// Model failure, unparseable output or a memory error
    FatalError,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Answered => "answered",
            Termination::MaxIterations => "max_iterations",
            Termination::Stagnation => "stagnation",
            Termination::TimedOut => "timed_out",
            Termination::TokenBudgetExceeded => "token_budget_exceeded",
            Termination::FatalError => "fatal_error",
        }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executed tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolTraceEntry {
    pub iteration: u32,
    pub call: ToolCall,
    pub result: ToolResult,
}

/// The outcome of one run of the loop.
#[derive(Debug, Clone)]
pub struct LoopReport {
    pub termination: Termination,

    /// The final answer, or the last assistant message when the run stopped early
    pub output: String,

    /// Why the run stopped, unless it was answered
    pub error: Option<String>,

    pub tool_trace: Vec<ToolTraceEntry>,

    /// Model iterations used (re-prompts for malformed output not counted)
    pub iterations: u32,

    pub tokens_used: u64,

    pub last_assistant_message: Option<String>,

    /// The agent's history window as it stood when the run ended
    pub context: Arc<ConversationContext>,
}

impl LoopReport {
    pub fn is_success(&self) -> bool {
        self.termination == Termination::Answered
    }
}

/// An early stop.
struct Halt {
    termination: Termination,
    reason: String,
}

impl Halt {
    fn new(termination: Termination, reason: impl Into<String>) -> Self {
        Self {
            termination,
            reason: reason.into(),
        }
    }
}

impl From<MemoryError> for Halt {
    fn from(e: MemoryError) -> Self {
        Halt::new(Termination::FatalError, e.to_string())
    }
}

impl From<LlmError> for Halt {
    fn from(e: LlmError) -> Self {
        Halt::new(Termination::FatalError, e.to_string())
    }
}

#[derive(Default)]
struct RunState {
    iterations: u32,
    tokens_used: u64,
    tool_trace: Vec<ToolTraceEntry>,
    last_assistant_message: Option<String>,
}

/// The think → act → observe loop.
///
/// Each iteration builds a prompt from the agent's memory window, asks the
/// model, and either finishes on a final answer or runs the requested tools
/// and stores every call and result before asking again.
pub struct AgentLoop {
    /// The model client
    llm: Arc<dyn LlmClient>,

    /// Shared turn storage
    memory: Arc<MemoryCoordinator>,

    scheduler: ToolScheduler,

    prompts: PromptConstructor,

    /// Event bus for domain events
    event_bus: Arc<EventBus>,

    settings: LoopSettings,
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(
        llm: Arc<dyn LlmClient>,
        memory: Arc<MemoryCoordinator>,
        tools: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            llm,
            memory,
            scheduler: ToolScheduler::new(Arc::clone(&tools)),
            prompts: PromptConstructor::new(tools),
            event_bus,
            settings: LoopSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Fail any single tool call that runs longer than `timeout`.
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.scheduler = self.scheduler.with_tool_timeout(timeout);
        self
    }

    pub fn memory(&self) -> &Arc<MemoryCoordinator> {
        &self.memory
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Run the agent on `input` until it answers or a limit is hit.
    ///
    /// Never fails: every way a run can end is described by the report.
    pub async fn run(
        &self,
        agent: &RegisteredAgent,
        input: &str,
        max_iterations: u32,
        deadline: Option<Instant>,
    ) -> LoopReport {
        info!(agent_id = %agent.id(), agent = %agent.name(), max_iterations, "Starting agent run");

        let mut state = RunState::default();
        let outcome = self.drive(agent, input, max_iterations, deadline, &mut state).await;
        self.finish(agent, state, outcome).await
    }

    async fn drive(
        &self,
        agent: &RegisteredAgent,
        input: &str,
        max_iterations: u32,
        deadline: Option<Instant>,
        state: &mut RunState,
    ) -> Result<String, Halt> {
        let identity = agent.identity();
        let capabilities = agent.capabilities();

        let user_turn = Turn::user(input);
        let user_turn_id = user_turn.id.clone();
        self.memory.save_turn(identity, user_turn).await?;

        let mut detector = StagnationDetector::new(self.settings.stagnation_threshold);

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Halt::new(Termination::TimedOut, "execution deadline reached"));
            }
            if let Some(budget) = self.settings.token_budget
                && state.tokens_used >= budget
            {
                return Err(Halt::new(
                    Termination::TokenBudgetExceeded,
                    format!("used {} tokens, budget is {budget}", state.tokens_used),
                ));
            }
            if state.iterations >= max_iterations {
                return Err(Halt::new(
                    Termination::MaxIterations,
                    format!("reached the iteration limit ({max_iterations}) without a final answer"),
                ));
            }

            state.iterations += 1;
            let iteration = state.iterations;
            debug!(agent_id = %identity.id(), iteration, "Agent loop iteration");
            self.event_bus.publish(DomainEvent::IterationStarted {
                agent_id: identity.id().to_string(),
                iteration,
                timestamp: Utc::now(),
            });

            let (content, calls) = match self.next_action(agent, input, &user_turn_id, deadline, state).await? {
                ModelAction::FinalAnswer(answer) => return self.answer(agent, state, answer).await,
                ModelAction::ToolCalls { content, calls } => (content, calls),
            };

            // A completion call ends the run once the rest of its batch has run.
            let completion = calls.iter().find_map(ToolCall::completion_message);
            let calls: Vec<ToolCall> = calls.into_iter().filter(|c| !c.is_completion()).collect();
            if calls.is_empty()
                && let Some(answer) = completion
            {
                info!(agent_id = %identity.id(), iteration, "Agent signalled task completion");
                return self.answer(agent, state, answer).await;
            }

            debug!(agent_id = %identity.id(), iteration, tool_count = calls.len(), "Executing tool calls");
            self.memory
                .save_turn(identity, Turn::assistant_with_tool_calls(&content, calls.clone()))
                .await?;
            if !content.is_empty() {
                state.last_assistant_message = Some(content);
            }

            let stagnant = detector.record(batch_signature(
                calls.iter().map(|c| (c.name.as_str(), &c.arguments)),
            ));

            let results = self.scheduler.execute(capabilities, &calls).await;
            for (call, result) in calls.into_iter().zip(results) {
                self.memory.save_turn(identity, Turn::tool_result(&result)).await?;
                self.event_bus.publish(DomainEvent::ToolExecuted {
                    agent_id: identity.id().to_string(),
                    tool_name: result.tool_name.clone(),
                    success: result.success,
                    duration_ms: result.duration_ms,
                    timestamp: Utc::now(),
                });
                state.tool_trace.push(ToolTraceEntry { iteration, call, result });
            }

            if let Some(answer) = completion {
                info!(agent_id = %identity.id(), iteration, "Agent signalled task completion");
                return self.answer(agent, state, answer).await;
            }

            if stagnant {
                warn!(agent_id = %identity.id(), repeats = detector.repeats(), "Agent is repeating the same tool calls");
                return Err(Halt::new(
                    Termination::Stagnation,
                    format!(
                        "the same tool calls were requested {} times in a row",
                        detector.repeats()
                    ),
                ));
            }
        }
    }

    async fn answer(&self, agent: &RegisteredAgent, state: &mut RunState, answer: String) -> Result<String, Halt> {
        self.memory.save_turn(agent.identity(), Turn::assistant(&answer)).await?;
        state.last_assistant_message = Some(answer.clone());
        Ok(answer)
    }

    /// Ask the model until it produces a usable reply or parse retries run out.
    async fn next_action(
        &self,
        agent: &RegisteredAgent,
        input: &str,
        user_turn_id: &str,
        deadline: Option<Instant>,
        state: &mut RunState,
    ) -> Result<ModelAction, Halt> {
        let identity = agent.identity();
        let capabilities = agent.capabilities();
        let mut notes: Vec<ChatMessage> = Vec::new();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let context = self
                .memory
                .get_conversation_context(identity, capabilities.max_memory_turns)
                .await;
            let task = (!context.turns().iter().any(|t| t.id == user_turn_id)).then_some(input);
            let prompt = self.prompts.build(capabilities, &context, task, &notes);

            let request = ChatRequest {
                model: self.settings.model.clone(),
                messages: prompt.messages,
                temperature: capabilities.temperature,
                max_tokens: Some(capabilities.max_tokens),
                tools: prompt.tools,
            };

            let response = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, self.llm.send(request))
                    .await
                    .map_err(|_| Halt::new(Termination::TimedOut, "execution deadline reached while waiting for the model"))??,
                None => self.llm.send(request).await?,
            };

            let tokens = response.usage.map(|u| u.total_tokens).unwrap_or(0);
            state.tokens_used += u64::from(tokens);
            self.event_bus.publish(DomainEvent::ModelResponded {
                agent_id: identity.id().to_string(),
                tool_calls: response.tool_calls.len(),
                tokens_used: tokens,
                timestamp: Utc::now(),
            });

            match parser::parse_response(&response) {
                Ok(action) => return Ok(action),
                Err(e) if attempts > self.settings.max_parse_retries => {
                    let error = AgentError::MalformedOutput {
                        attempts,
                        reason: e.to_string(),
                    };
                    return Err(Halt::new(Termination::FatalError, error.to_string()));
                }
                Err(e) => {
                    warn!(agent_id = %identity.id(), attempt = attempts, error = %e, "Malformed model output, re-prompting");
                    notes = vec![
                        ChatMessage::assistant(raw_output(&response)),
                        ChatMessage::user(format!(
                            "Your previous reply could not be used: {e}. Either call one of the \
                             available tools with a JSON object of arguments, or reply with the \
                             final answer as plain text."
                        )),
                    ];
                }
            }
        }
    }

    async fn finish(&self, agent: &RegisteredAgent, state: RunState, outcome: Result<String, Halt>) -> LoopReport {
        let (termination, output, error) = match outcome {
            Ok(answer) => (Termination::Answered, answer, None),
            Err(halt) => (
                halt.termination,
                state.last_assistant_message.clone().unwrap_or_default(),
                Some(halt.reason),
            ),
        };

        let context = self
            .memory
            .get_conversation_context(agent.identity(), agent.capabilities().max_memory_turns)
            .await;

        match &error {
            None => info!(
                agent_id = %agent.id(),
                iterations = state.iterations,
                tool_calls = state.tool_trace.len(),
                tokens = state.tokens_used,
                "Agent run answered"
            ),
            Some(reason) => warn!(
                agent_id = %agent.id(),
                termination = %termination,
                iterations = state.iterations,
                reason = %reason,
                "Agent run stopped without an answer"
            ),
        }

        self.event_bus.publish(DomainEvent::RunFinished {
            agent_id: agent.id().to_string(),
            termination: termination.to_string(),
            iterations: state.iterations,
            timestamp: Utc::now(),
        });

        LoopReport {
            termination,
            output,
            error,
            tool_trace: state.tool_trace,
            iterations: state.iterations,
            tokens_used: state.tokens_used,
            last_assistant_message: state.last_assistant_message,
            context,
        }
    }
}

/// What the model said, for echoing back in a correction note.
fn raw_output(response: &ChatResponse) -> String {
    let mut text = response.content.clone().unwrap_or_default();
    for call in &response.tool_calls {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!("{}({})", call.name, call.arguments));
    }
    text
}
