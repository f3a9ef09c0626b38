//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world:
//! read/write files, search, run shell commands. The model names a tool by
//! string; that name is only ever resolved through the [`ToolRegistry`], and
//! arguments are validated against the tool's declared parameters before
//! the tool runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use crate::error::ToolError;
use crate::llm::ToolDefinition;

/// Arguments after validation: always a JSON object.
pub type ToolArgs = Map<String, Value>;

/// Control tool the model calls to end a run.
pub const TASK_COMPLETED: &str = "task_completed";

/// Accepted spellings of the completion tool.
pub const COMPLETION_TOOLS: &[&str] = &[TASK_COMPLETED, "task_complete"];

pub const DEFAULT_COMPLETION_MESSAGE: &str = "Task completed successfully.";

/// A request to execute a tool, as emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    pub fn is_completion(&self) -> bool {
        COMPLETION_TOOLS.contains(&self.name.as_str())
    }

    /// The final answer carried by a completion call, `None` for any other tool.
    pub fn completion_message(&self) -> Option<String> {
        if !self.is_completion() {
            return None;
        }
        let message = self
            .arguments
            .get("message")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_COMPLETION_MESSAGE);
        Some(message.to_string())
    }
}

/// The result of a tool execution. Produced for every requested call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// The tool that was requested
    pub tool_name: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content (empty on failure)
    pub output: String,

    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock execution time
    #[serde(default)]
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, tool_name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            success: true,
            output: output.into(),
            error: None,
            duration_ms: 0,
        }
    }

    pub fn failure(call_id: impl Into<String>, tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            success: false,
            output: String::new(),
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// The text fed back to the model for this result.
    pub fn content_for_model(&self) -> String {
        match (&self.success, &self.error) {
            (true, _) => self.output.clone(),
            (false, Some(error)) => format!("Error: {error}"),
            (false, None) => "Error: tool failed without a message".into(),
        }
    }
}

/// JSON type of a declared tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    /// Coerce a JSON value to this type, or return `None` if impossible.
    ///
    /// Lossless conversions only: `"42"` → `42` for integers, `7` → `"7"`
    /// for strings, `"true"` → `true` for booleans.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ParamType::String, Value::String(_)) => Some(value.clone()),
            (ParamType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ParamType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),

            (ParamType::Integer, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Some(value.clone())
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| Value::from(f as i64))
                }
            }
            (ParamType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),

            (ParamType::Number, Value::Number(_)) => Some(value.clone()),
            (ParamType::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),

            (ParamType::Boolean, Value::Bool(_)) => Some(value.clone()),
            (ParamType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(Value::Bool(true)),
                "false" | "0" | "no" => Some(Value::Bool(false)),
                _ => None,
            },

            (ParamType::Array, Value::Array(_)) => Some(value.clone()),
            (ParamType::Object, Value::Object(_)) => Some(value.clone()),
            _ => None,
        }
    }
}

/// A declared tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub kind: ParamType,
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_required() -> bool {
    true
}

impl ToolParameter {
    /// A required parameter.
    pub fn required(name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
            default: None,
        }
    }

    /// An optional parameter, with an optional default filled in when absent.
    pub fn optional(
        name: impl Into<String>,
        kind: ParamType,
        description: impl Into<String>,
        default: Option<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
            default,
        }
    }
}

/// Validate and coerce raw arguments against declared parameters.
///
/// Missing required parameters and uncoercible values are rejected; absent
/// optional parameters get their default; undeclared keys are dropped.
pub fn validate_arguments(
    tool_name: &str,
    parameters: &[ToolParameter],
    arguments: &Value,
) -> Result<ToolArgs, ToolError> {
    let invalid = |reason: String| ToolError::InvalidArguments {
        tool_name: tool_name.to_string(),
        reason,
    };

    let raw = match arguments {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => return Err(invalid(format!("arguments must be a JSON object, got {other}"))),
    };

    let mut validated = Map::new();
    for param in parameters {
        match raw.get(&param.name).filter(|v| !v.is_null()) {
            Some(value) => {
                let coerced = param.kind.coerce(value).ok_or_else(|| {
                    invalid(format!(
                        "parameter '{}' expected {}, got {}",
                        param.name,
                        param.kind.as_str(),
                        json_type_name(value)
                    ))
                })?;
                validated.insert(param.name.clone(), coerced);
            }
            None if param.required => {
                return Err(invalid(format!("missing required parameter '{}'", param.name)));
            }
            None => {
                if let Some(default) = &param.default {
                    validated.insert(param.name.clone(), default.clone());
                }
            }
        }
    }

    Ok(validated)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The core Tool trait.
///
/// Each tool (read_file, write_file, grep, shell, ...) implements this trait.
/// Tools are registered in the ToolRegistry and dispatched by the scheduler,
/// which always validates arguments before calling `execute`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// Declared parameters.
    fn parameters(&self) -> Vec<ToolParameter>;

    /// Grouping shown in tool listings.
    fn category(&self) -> &str {
        "general"
    }

    /// Informational flag for confirmation UX; never enforced by the scheduler.
    fn is_dangerous(&self) -> bool {
        false
    }

    /// Execute the tool with validated arguments.
    async fn execute(&self, arguments: ToolArgs) -> Result<String, ToolError>;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value {
        let params = self.parameters();
        let mut properties = Map::new();
        for p in &params {
            let mut prop = serde_json::json!({
                "type": p.kind.as_str(),
                "description": p.description,
            });
            if let Some(default) = &p.default {
                prop["default"] = default.clone();
            }
            properties.insert(p.name.clone(), prop);
        }
        let required: Vec<&str> = params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Summary row for tool listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub category: String,
    pub dangerous: bool,
    pub parameters: Vec<ToolParameter>,
}

/// A registry of available tools.
///
/// Constructed at startup and shared by `Arc`; read-mostly afterwards.
/// Lookups take a short read lock and hand out `Arc<dyn Tool>` so no lock
/// is held while a tool runs.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        if tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "Replaced registered tool");
        }
    }

    /// Resolve a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        tools.contains_key(name)
    }

    /// Tool definitions for sending to the LLM, sorted by name.
    ///
    /// When `allowed` is non-empty only those tools are included.
    pub fn definitions(&self, allowed: &[String]) -> Vec<ToolDefinition> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        let mut defs: Vec<ToolDefinition> = tools
            .values()
            .filter(|t| allowed.is_empty() || allowed.iter().any(|a| a == t.name()))
            .map(|t| t.to_definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Listing of every registered tool, sorted by name.
    pub fn list(&self) -> Vec<ToolInfo> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        let mut infos: Vec<ToolInfo> = tools
            .values()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                category: t.category().to_string(),
                dangerous: t.is_dangerous(),
                parameters: t.parameters(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
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

    #[test]
    fn completion_calls_carry_their_message() {
        let done = ToolCall::new("c1", "task_completed", json!({"message": "Found 3 errors."}));
        assert_eq!(done.completion_message().as_deref(), Some("Found 3 errors."));

        let legacy = ToolCall::new("c2", "task_complete", json!({}));
        assert_eq!(legacy.completion_message().as_deref(), Some(DEFAULT_COMPLETION_MESSAGE));

        let other = ToolCall::new("c3", "grep", json!({"message": "x"}));
        assert!(!other.is_completion());
        assert!(other.completion_message().is_none());
    }

    #[test]
    fn registry_register_and_lookup() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.names(), vec!["echo".to_string()]);
    }

    #[test]
    fn registry_definitions_filtered_by_allow_list() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.definitions(&[]).len(), 1);
        assert_eq!(registry.definitions(&["echo".into()]).len(), 1);
        assert!(registry.definitions(&["read_file".into()]).is_empty());
    }

    #[test]
    fn schema_lists_required_parameters() {
        let schema = EchoTool.parameters_schema();
        assert_eq!(schema["required"], json!(["text"]));
        assert_eq!(schema["properties"]["times"]["type"], "integer");
        assert_eq!(schema["properties"]["times"]["default"], 1);
    }

    #[test]
    fn validation_fills_defaults_and_drops_unknown_keys() {
        let args = validate_arguments(
            "echo",
            &EchoTool.parameters(),
            &json!({"text": "hi", "verbose": true}),
        )
        .unwrap();
        assert_eq!(args["text"], "hi");
        assert_eq!(args["times"], 1);
        assert!(!args.contains_key("verbose"));
    }

    #[test]
    fn validation_coerces_compatible_types() {
        let args = validate_arguments("echo", &EchoTool.parameters(), &json!({"text": 42, "times": "3"})).unwrap();
        assert_eq!(args["text"], "42");
        assert_eq!(args["times"], 3);
    }

    #[test]
    fn validation_rejects_missing_required() {
        let err = validate_arguments("echo", &EchoTool.parameters(), &json!({})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
        assert!(err.to_string().contains("text"));
    }

    #[test]
    fn validation_rejects_type_mismatch() {
        let err = validate_arguments("echo", &EchoTool.parameters(), &json!({"text": "hi", "times": "lots"}))
            .unwrap_err();
        assert!(err.to_string().contains("expected integer"));
    }

    #[test]
    fn validation_rejects_non_object_arguments() {
        let err = validate_arguments("echo", &EchoTool.parameters(), &json!(["hi"])).unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn boolean_and_number_coercion() {
        assert_eq!(ParamType::Boolean.coerce(&json!("TRUE")), Some(json!(true)));
        assert_eq!(ParamType::Boolean.coerce(&json!("maybe")), None);
        assert_eq!(ParamType::Number.coerce(&json!("2.5")), Some(json!(2.5)));
        assert_eq!(ParamType::Integer.coerce(&json!(4.0)), Some(json!(4)));
        assert_eq!(ParamType::Integer.coerce(&json!(4.5)), None);
        assert_eq!(ParamType::Array.coerce(&json!("x")), None);
    }

    #[tokio::test]
    async fn registry_execute_tool() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let tool = registry.get("echo").unwrap();
        let args = validate_arguments("echo", &tool.parameters(), &json!({"text": "ab", "times": 2})).unwrap();
        let output = tool.execute(args).await.unwrap();
        assert_eq!(output, "abab");
    }

    #[test]
    fn failed_result_content_mentions_error() {
        let result = ToolResult::failure("c1", "echo", "boom");
        assert_eq!(result.content_for_model(), "Error: boom");
        assert!(!result.success);
    }
}
