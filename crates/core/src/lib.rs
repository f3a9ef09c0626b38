//! # thinkloop Core
//!
//! Domain types, traits, and error definitions for the thinkloop agent runtime.
//! This crate does no I/O: it defines the domain model that all other crates
//! implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the agent loop is defined as a trait here
//! (`LlmClient`, `LlmTransport`, `Tool`, `AgentRepository`). Implementations
//! live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted mock implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod turn;
pub mod llm;
pub mod tool;
pub mod agent;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use turn::{ConversationContext, Role, Turn, TurnMetadata};
pub use llm::{
    ChatMessage, ChatRequest, ChatResponse, LlmClient, LlmTransport, RawResponse, RawToolCall,
    ToolDefinition, Usage,
};
pub use tool::{
    ParamType, Tool, ToolArgs, ToolCall, ToolInfo, ToolParameter, ToolRegistry, ToolResult,
    validate_arguments,
};
pub use agent::{AgentCapabilities, AgentIdentity, AgentRepository, RegisteredAgent};
pub use event::{DomainEvent, EventBus};
