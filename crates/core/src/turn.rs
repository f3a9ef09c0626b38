//! Turn and ConversationContext domain types.
//!
//! A `Turn` is the unit the memory layer stores: user input, assistant
//! replies (optionally carrying tool requests), and tool results. A
//! `ConversationContext` is a bounded, read-only window over an agent's turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentIdentity;
use crate::tool::{ToolCall, ToolResult};

/// The role of a turn's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The language model
    Assistant,
    /// System instructions
    System,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata attached to a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    /// Tool that produced this turn (tool turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Whether the tool succeeded (tool turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    /// The tool call this turn answers (tool turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool calls requested by the assistant (assistant turns only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Free-form structured payload
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One stored unit of dialogue. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn ID
    pub id: String,

    /// Who authored this turn
    pub role: Role,

    /// The text content
    pub content: String,

    /// When the turn was created
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub metadata: TurnMetadata,
}

impl Turn {
    fn new(role: Role, content: impl Into<String>, metadata: TurnMetadata) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata,
        }
    }

    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, TurnMetadata::default())
    }

    /// Create a plain assistant turn (a final answer).
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, TurnMetadata::default())
    }

    /// Create an assistant turn that requests tool calls.
    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::new(
            Role::Assistant,
            content,
            TurnMetadata {
                tool_calls,
                ..TurnMetadata::default()
            },
        )
    }

    /// Create a system turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content, TurnMetadata::default())
    }

    /// Create a tool turn from a tool result.
    ///
    /// Failed results store the error text as content so the model sees it.
    pub fn tool_result(result: &ToolResult) -> Self {
        Self::new(
            Role::Tool,
            result.content_for_model(),
            TurnMetadata {
                tool_name: Some(result.tool_name.clone()),
                success: Some(result.success),
                tool_call_id: Some(result.call_id.clone()),
                ..TurnMetadata::default()
            },
        )
    }

    /// Whether this assistant turn requested tools.
    pub fn has_tool_calls(&self) -> bool {
        !self.metadata.tool_calls.is_empty()
    }
}

/// An ordered, bounded snapshot of one agent's turns.
///
/// Never mutated after construction: the memory coordinator rebuilds it
/// instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    /// The agent the turns belong to
    pub agent: AgentIdentity,

    /// Turns in insertion order (oldest first)
    turns: Vec<Turn>,

    /// When this snapshot was materialized
    pub created_at: DateTime<Utc>,
}

impl ConversationContext {
    /// Build a snapshot from turns already in insertion order.
    pub fn new(agent: AgentIdentity, turns: Vec<Turn>) -> Self {
        Self {
            agent,
            turns,
            created_at: Utc::now(),
        }
    }

    /// An empty snapshot.
    pub fn empty(agent: AgentIdentity) -> Self {
        Self::new(agent, Vec::new())
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn user_turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().filter(|t| t.role == Role::User)
    }

    pub fn assistant_turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().filter(|t| t.role == Role::Assistant)
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Rough token estimate (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.turns.iter().map(|t| t.content.len() / 4).sum()
    }
}
