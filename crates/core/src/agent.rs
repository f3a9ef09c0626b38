//! Agent identity, capabilities, and the repository abstraction.
//!
//! Identity is immutable once created. Capabilities are a value: an agent's
//! capabilities are replaced wholesale, never edited in place.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::AgentError;

const NAME_MIN_LEN: usize = 3;
const NAME_MAX_LEN: usize = 50;
const DESCRIPTION_MIN_LEN: usize = 10;
const DESCRIPTION_MAX_LEN: usize = 500;
const MAX_REASONING_TURNS: u32 = 100;
const MAX_MEMORY_TURNS: usize = 1000;

/// Who an agent is. Never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// UUID v4, string form
    id: String,

    /// Human-readable unique name
    name: String,

    created_at: DateTime<Utc>,
}

impl AgentIdentity {
    /// Create a new identity with a fresh id.
    pub fn create(name: impl Into<String>) -> Result<Self, AgentError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name,
            created_at: Utc::now(),
        })
    }

    /// Rebuild an identity from stored parts.
    pub fn from_parts(id: impl Into<String>, name: impl Into<String>, created_at: DateTime<Utc>) -> Result<Self, AgentError> {
        let id = id.into();
        let name = name.into();
        Uuid::parse_str(&id).map_err(|e| AgentError::InvalidIdentity(format!("id '{id}' is not a UUID: {e}")))?;
        validate_name(&name)?;
        Ok(Self { id, name, created_at })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Names start with a letter and continue with letters, digits or `_`.
fn validate_name(name: &str) -> Result<(), AgentError> {
    let len = name.chars().count();
    if !(NAME_MIN_LEN..=NAME_MAX_LEN).contains(&len) {
        return Err(AgentError::InvalidIdentity(format!(
            "name '{name}' must be {NAME_MIN_LEN}-{NAME_MAX_LEN} characters"
        )));
    }
    let mut chars = name.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    if !starts_with_letter || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AgentError::InvalidIdentity(format!(
            "name '{name}' must start with a letter and contain only letters, digits and underscores"
        )));
    }
    Ok(())
}

/// What an agent may do and how it reasons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    pub description: String,

    pub system_prompt: String,

    /// Tools this agent may call. Empty means unrestricted.
    #[serde(default)]
    pub authorized_tools: Vec<String>,

    /// Iteration cap for the reasoning loop
    #[serde(default = "default_max_reasoning_turns")]
    pub max_reasoning_turns: u32,

    /// History window used when building prompts
    #[serde(default = "default_max_memory_turns")]
    pub max_memory_turns: usize,

    #[serde(default)]
    pub specialization_tags: Vec<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_reasoning_turns() -> u32 {
    10
}
fn default_max_memory_turns() -> usize {
    10
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}

impl AgentCapabilities {
    /// Validated capabilities with default limits.
    pub fn new(
        description: impl Into<String>,
        system_prompt: impl Into<String>,
        authorized_tools: Vec<String>,
    ) -> Result<Self, AgentError> {
        let caps = Self {
            description: description.into(),
            system_prompt: system_prompt.into(),
            authorized_tools,
            max_reasoning_turns: default_max_reasoning_turns(),
            max_memory_turns: default_max_memory_turns(),
            specialization_tags: Vec::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        };
        caps.validate()?;
        Ok(caps)
    }

    pub fn with_limits(mut self, max_reasoning_turns: u32, max_memory_turns: usize) -> Result<Self, AgentError> {
        self.max_reasoning_turns = max_reasoning_turns;
        self.max_memory_turns = max_memory_turns;
        self.validate()?;
        Ok(self)
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.specialization_tags = tags;
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Check every invariant. Deserialized capabilities must pass this
    /// before use.
    pub fn validate(&self) -> Result<(), AgentError> {
        let invalid = |msg: String| Err(AgentError::InvalidCapabilities(msg));

        let desc_len = self.description.trim().chars().count();
        if !(DESCRIPTION_MIN_LEN..=DESCRIPTION_MAX_LEN).contains(&desc_len) {
            return invalid(format!(
                "description must be {DESCRIPTION_MIN_LEN}-{DESCRIPTION_MAX_LEN} characters, got {desc_len}"
            ));
        }

        let mut seen = HashSet::new();
        for tool in &self.authorized_tools {
            if tool.trim().is_empty() {
                return invalid("authorized tool names must not be empty".into());
            }
            if !seen.insert(tool.as_str()) {
                return invalid(format!("authorized tool '{tool}' listed more than once"));
            }
        }

        if !(1..=MAX_REASONING_TURNS).contains(&self.max_reasoning_turns) {
            return invalid(format!(
                "max_reasoning_turns must be in 1..={MAX_REASONING_TURNS}, got {}",
                self.max_reasoning_turns
            ));
        }
        if self.max_memory_turns > MAX_MEMORY_TURNS {
            return invalid(format!(
                "max_memory_turns must be at most {MAX_MEMORY_TURNS}, got {}",
                self.max_memory_turns
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return invalid(format!("temperature must be in 0.0..=2.0, got {}", self.temperature));
        }
        Ok(())
    }

    /// Empty allow-list means every registered tool is allowed.
    pub fn can_use_tool(&self, tool_name: &str) -> bool {
        self.authorized_tools.is_empty() || self.authorized_tools.iter().any(|t| t == tool_name)
    }
}

/// An agent as stored in a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredAgent {
    identity: AgentIdentity,
    capabilities: AgentCapabilities,
    active: bool,
    updated_at: DateTime<Utc>,
}

impl RegisteredAgent {
    pub fn new(identity: AgentIdentity, capabilities: AgentCapabilities) -> Self {
        Self {
            identity,
            capabilities,
            active: true,
            updated_at: Utc::now(),
        }
    }

    /// Shortcut for a fresh identity plus capabilities.
    pub fn create(name: impl Into<String>, capabilities: AgentCapabilities) -> Result<Self, AgentError> {
        Ok(Self::new(AgentIdentity::create(name)?, capabilities))
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn id(&self) -> &str {
        self.identity.id()
    }

    pub fn name(&self) -> &str {
        self.identity.name()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn capabilities(&self) -> &AgentCapabilities {
        &self.capabilities
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn replace_capabilities(&mut self, capabilities: AgentCapabilities) {
        self.capabilities = capabilities;
        self.updated_at = Utc::now();
    }

    pub fn activate(&mut self) {
        self.active = true;
        self.updated_at = Utc::now();
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.updated_at = Utc::now();
    }

    pub fn can_use_tool(&self, tool_name: &str) -> bool {
        self.capabilities.can_use_tool(tool_name)
    }
}

/// Storage for registered agents.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Option<RegisteredAgent>;

    async fn find_by_name(&self, name: &str) -> Option<RegisteredAgent>;

    /// Insert or update. Names must stay unique across agents.
    async fn save(&self, agent: RegisteredAgent) -> Result<(), AgentError>;

    async fn find_all(&self) -> Vec<RegisteredAgent>;

    async fn find_active(&self) -> Vec<RegisteredAgent>;

    async fn delete(&self, id: &str) -> bool;

    async fn count(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(tools: &[&str]) -> AgentCapabilities {
        AgentCapabilities::new(
            "Reads files and summarizes them",
            "You are a careful assistant.",
            tools.iter().map(|t| t.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn identity_gets_uuid() {
        let identity = AgentIdentity::create("file_reader").unwrap();
        assert!(Uuid::parse_str(identity.id()).is_ok());
        assert_eq!(identity.name(), "file_reader");
        assert!(identity.created_at() <= Utc::now());
    }

    #[test]
    fn identity_rejects_bad_names() {
        for bad in ["ab", "1agent", "has space", "dash-name", &"x".repeat(51)] {
            assert!(AgentIdentity::create(bad).is_err(), "{bad} should be rejected");
        }
        assert!(AgentIdentity::create("Agent_01").is_ok());
    }

    #[test]
    fn from_parts_requires_uuid() {
        assert!(AgentIdentity::from_parts("not-a-uuid", "valid_name", Utc::now()).is_err());
        let id = Uuid::new_v4().to_string();
        let created = Utc::now();
        let identity = AgentIdentity::from_parts(id.clone(), "valid_name", created).unwrap();
        assert_eq!(identity.id(), id);
        assert_eq!(identity.created_at(), created);
    }

    #[test]
    fn capability_defaults() {
        let c = caps(&["read_file"]);
        assert_eq!(c.max_reasoning_turns, 10);
        assert_eq!(c.max_memory_turns, 10);
        assert_eq!(c.max_tokens, 1000);
    }

    #[test]
    fn capabilities_reject_short_description() {
        let err = AgentCapabilities::new("short", "prompt", vec![]).unwrap_err();
        assert!(matches!(err, AgentError::InvalidCapabilities(_)));
    }

    #[test]
    fn capabilities_reject_duplicate_tools() {
        let result = AgentCapabilities::new(
            "A description long enough",
            "prompt",
            vec!["grep".into(), "grep".into()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn capabilities_reject_out_of_range_limits() {
        assert!(caps(&[]).with_limits(0, 10).is_err());
        assert!(caps(&[]).with_limits(101, 10).is_err());
        assert!(caps(&[]).with_limits(10, 1001).is_err());
        assert!(caps(&[]).with_limits(100, 0).is_ok());
    }

    #[test]
    fn empty_allow_list_is_unrestricted() {
        assert!(caps(&[]).can_use_tool("shell"));
        let restricted = caps(&["read_file"]);
        assert!(restricted.can_use_tool("read_file"));
        assert!(!restricted.can_use_tool("write_file"));
    }

    #[test]
    fn replacing_capabilities_is_wholesale() {
        let mut agent = RegisteredAgent::create("swapper", caps(&["read_file"])).unwrap();
        let identity = agent.identity().clone();
        let before = agent.updated_at();
        agent.replace_capabilities(caps(&["grep"]));
        assert!(agent.can_use_tool("grep"));
        assert!(!agent.can_use_tool("read_file"));
        assert_eq!(agent.identity(), &identity);
        assert!(agent.updated_at() >= before);
    }

    #[test]
    fn activation_toggles() {
        let mut agent = RegisteredAgent::create("toggler", caps(&[])).unwrap();
        assert!(agent.is_active());
        agent.deactivate();
        assert!(!agent.is_active());
        agent.activate();
        assert!(agent.is_active());
    }
}
