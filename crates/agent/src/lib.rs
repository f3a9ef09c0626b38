//! The agent loop for thinkloop.
//!
//! The agent follows a **think → act → observe** cycle:
//!
//! 1. **Build the prompt** (system prompt + tool catalog + memory window)
//! 2. **Ask the model** through the retrying [`LlmClient`](thinkloop_core::llm::LlmClient)
//! 3. **If tool calls**: authorize, validate and run them, store every result
//! 4. **If text**: that is the final answer
//!
//! The loop also stops on an iteration cap, on repeated identical tool
//! batches, on a deadline, on a token budget, or on a fatal error.
//! [`ExecutionService`] wraps it with agent lookup, timeouts and metrics.

pub mod loop_runner;
pub mod parser;
pub mod prompt;
pub mod repository;
pub mod runtime;
pub mod scheduler;
pub mod service;
pub mod stagnation;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use loop_runner::{AgentLoop, LoopReport, LoopSettings, Termination, ToolTraceEntry};
pub use parser::{ModelAction, ParseError, parse_response};
pub use prompt::{Prompt, PromptConstructor};
pub use repository::InMemoryAgentRepository;
pub use runtime::AgentRuntime;
pub use scheduler::ToolScheduler;
pub use service::{
    DEFAULT_EXECUTION_TIMEOUT, ExecutionOptions, ExecutionResult, ExecutionService, ExecutionStats,
    MetricsSnapshot,
};
pub use stagnation::StagnationDetector;
