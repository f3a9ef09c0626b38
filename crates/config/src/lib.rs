//! Configuration loading, validation, and management for thinkloop.
//!
//! Loads configuration from `~/.thinkloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thinkloop_core::agent::AgentCapabilities;
use thinkloop_core::error::AgentError;

/// The root configuration structure.
///
/// Maps directly to `~/.thinkloop/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// OpenAI-compatible endpoint base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Per-request HTTP timeout, seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub agent: AgentLoopConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    /// Named agents registered at start-up
    #[serde(default)]
    pub agents: Vec<AgentDefinition>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_request_timeout_secs() -> u64 {
    60
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("retry", &self.retry)
            .field("agent", &self.agent)
            .field("memory", &self.memory)
            .field("execution", &self.execution)
            .field("tools", &self.tools)
            .field("agents", &self.agents)
            .finish()
    }
}

/// Backoff for transient model endpoint failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles per attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Optional ceiling on a single delay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: None,
        }
    }
}

/// Reasoning loop limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopConfig {
    /// Iteration cap when neither the call nor the agent sets one
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Consecutive identical tool batches that end a run
    #[serde(default = "default_stagnation_threshold")]
    pub stagnation_threshold: u32,

    /// Re-prompts allowed for unparseable model output
    #[serde(default = "default_max_parse_retries")]
    pub max_parse_retries: u32,

    /// Cumulative token ceiling per run (0 = unlimited)
    #[serde(default)]
    pub token_budget: u64,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_stagnation_threshold() -> u32 {
    3
}
fn default_max_parse_retries() -> u32 {
    2
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            stagnation_threshold: default_stagnation_threshold(),
            max_parse_retries: default_max_parse_retries(),
            token_budget: 0,
        }
    }
}

/// Context cache and inactivity eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Stores untouched for longer than this are evicted by cleanup
    #[serde(default = "default_inactive_threshold_secs")]
    pub inactive_threshold_secs: u64,
}

fn default_cache_capacity() -> usize {
    100
}
fn default_inactive_threshold_secs() -> u64 {
    24 * 60 * 60
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            inactive_threshold_secs: default_inactive_threshold_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Wall-clock limit per execution when the caller gives none
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

/// Built-in tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Root the file tools are confined to (defaults to the working directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,

    /// Shell commands allowed (empty = all)
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,

    /// Per-call execution timeout
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Output larger than this is truncated before it reaches the model
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_allowed_commands() -> Vec<String> {
    ["ls", "cat", "grep", "find", "echo", "pwd", "wc", "head", "tail", "git"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_max_output_bytes() -> usize {
    64 * 1024
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            workspace_dir: None,
            allowed_commands: default_allowed_commands(),
            tool_timeout_secs: default_tool_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl ToolsConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Configured workspace, or the current directory.
    pub fn resolved_workspace(&self) -> PathBuf {
        self.workspace_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// An agent declared in the config file.
///
/// ```toml
/// [[agents]]
/// name = "file_reader"
/// description = "Reads files and summarizes them"
/// system_prompt = "You read files carefully."
/// authorized_tools = ["read_file", "list_dir"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,

    pub description: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default)]
    pub authorized_tools: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reasoning_turns: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_turns: Option<usize>,

    #[serde(default)]
    pub specialization_tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_system_prompt() -> String {
    "You are a helpful assistant that uses tools to accomplish tasks. \
     When you have enough information, reply with the final answer as plain text."
        .into()
}

/// Name of the agent registered when the config defines none with that name.
pub const DEFAULT_AGENT_NAME: &str = "assistant";

impl AgentDefinition {
    /// The general-purpose agent available out of the box.
    pub fn default_agent() -> Self {
        Self {
            name: DEFAULT_AGENT_NAME.into(),
            description: "General-purpose assistant for the local workspace".into(),
            system_prompt: default_system_prompt(),
            authorized_tools: ["read_file", "write_file", "list_dir", "grep", "shell", "task_completed"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_reasoning_turns: None,
            max_memory_turns: None,
            specialization_tags: vec!["general".into()],
            temperature: None,
            max_tokens: None,
        }
    }

    /// Build validated capabilities, filling unset values from the global config.
    pub fn to_capabilities(&self, config: &AppConfig) -> Result<AgentCapabilities, AgentError> {
        let caps = AgentCapabilities::new(
            self.description.clone(),
            self.system_prompt.clone(),
            self.authorized_tools.clone(),
        )?
        .with_tags(self.specialization_tags.clone())
        .with_sampling(
            self.temperature.unwrap_or(config.default_temperature),
            self.max_tokens.unwrap_or(config.default_max_tokens),
        );
        let reasoning = self.max_reasoning_turns.unwrap_or(config.agent.max_iterations);
        let memory = self.max_memory_turns.unwrap_or(caps.max_memory_turns);
        caps.with_limits(reasoning, memory)
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.thinkloop/config.toml).
    ///
    /// Also checks environment variables:
    /// - `THINKLOOP_API_KEY` (highest priority), `OPENAI_API_KEY`, `OPENROUTER_API_KEY`
    /// - `THINKLOOP_BASE_URL`
    /// - `THINKLOOP_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(key) = std::env::var("THINKLOOP_API_KEY")
            .ok()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
        {
            self.api_key = Some(key);
        }

        if let Ok(url) = std::env::var("THINKLOOP_BASE_URL") {
            self.base_url = url;
        }

        if let Ok(model) = std::env::var("THINKLOOP_MODEL") {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".thinkloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::ValidationError(msg.into()));

        if !(0.0..=2.0).contains(&self.default_temperature) {
            return fail("default_temperature must be between 0.0 and 2.0");
        }
        if self.base_url.trim().is_empty() {
            return fail("base_url must not be empty");
        }
        if self.request_timeout_secs == 0 {
            return fail("request_timeout_secs must be > 0");
        }
        if self.retry.base_delay_ms == 0 {
            return fail("retry.base_delay_ms must be > 0");
        }
        if let Some(max) = self.retry.max_delay_ms
            && max < self.retry.base_delay_ms
        {
            return fail("retry.max_delay_ms must be >= retry.base_delay_ms");
        }
        if !(1..=100).contains(&self.agent.max_iterations) {
            return fail("agent.max_iterations must be between 1 and 100");
        }
        if self.agent.stagnation_threshold < 2 {
            return fail("agent.stagnation_threshold must be at least 2");
        }
        if self.memory.cache_capacity == 0 {
            return fail("memory.cache_capacity must be > 0");
        }
        if self.execution.default_timeout_secs == 0 {
            return fail("execution.default_timeout_secs must be > 0");
        }
        if self.tools.tool_timeout_secs == 0 {
            return fail("tools.tool_timeout_secs must be > 0");
        }
        // Otherwise a store could be swept while its agent is still running.
        if self.memory.inactive_threshold_secs <= self.execution.default_timeout_secs {
            return fail("memory.inactive_threshold_secs must be greater than execution.default_timeout_secs");
        }

        let mut names = HashSet::new();
        for agent in &self.agents {
            if !names.insert(agent.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "agent '{}' is defined more than once",
                    agent.name
                )));
            }
        }

        Ok(())
    }

    /// Configured agents, plus the default agent unless one already uses its name.
    pub fn agent_definitions(&self) -> Vec<AgentDefinition> {
        let mut agents = self.agents.clone();
        if !agents.iter().any(|a| a.name == DEFAULT_AGENT_NAME) {
            agents.push(AgentDefinition::default_agent());
        }
        agents
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution.default_timeout_secs)
    }

    pub fn inactive_threshold(&self) -> Duration {
        Duration::from_secs(self.memory.inactive_threshold_secs)
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryConfig::default(),
            agent: AgentLoopConfig::default(),
            memory: MemoryConfig::default(),
            execution: ExecutionConfig::default(),
            tools: ToolsConfig::default(),
            agents: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for thinkloop_core::Error {
    fn from(err: ConfigError) -> Self {
        thinkloop_core::Error::Config {
            message: err.to_string(),
        }
    }
}
