//! Error types for the thinkloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all thinkloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Language model errors ---
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Agent errors ---
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures raised by the raw transport beneath the LLM client.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),
}

/// Failures surfaced by the retrying LLM client once retries are exhausted
/// or the failure is not retryable.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("Connection to model endpoint failed after {attempts} attempt(s): {message}")]
    Connection { attempts: u32, message: String },

    #[error("Model API error (status: {status_code}) after {attempts} attempt(s): {message}")]
    Api {
        status_code: u16,
        attempts: u32,
        message: String,
    },

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// HTTP status attached to the failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            LlmError::Api { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool '{tool_name}' is not authorized for this agent (allowed: [{allowed}])")]
    Unauthorized { tool_name: String, allowed: String },

    #[error("Invalid arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name} — {reason}")]
    PermissionDenied { tool_name: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid cache configuration: {0}")]
    InvalidCapacity(String),
}

#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("Agent {0} not found")]
    NotFound(String),

    #[error("Agent {0} is inactive")]
    Inactive(String),

    #[error("Invalid agent identity: {0}")]
    InvalidIdentity(String),

    #[error("Invalid agent capabilities: {0}")]
    InvalidCapabilities(String),

    #[error("Agent name '{0}' is already registered")]
    DuplicateName(String),

    #[error("Invalid execution options: {0}")]
    InvalidOptions(String),

    #[error("Malformed model output after {attempts} attempt(s): {reason}")]
    MalformedOutput { attempts: u32, reason: String },
}
