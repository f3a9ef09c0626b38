//! Interpreting a model reply as either tool requests or a final answer.
//!
//! Native `tool_calls` win. Otherwise the text is inspected for a JSON
//! command object such as `{"tool_name": "grep", "arguments": {"pattern": "ERROR"}}`,
//! bare or inside a fenced code block. The OpenAI-style
//! `{"function": {"name": ..., "arguments": "..."}}` wrapper is unwrapped.
//! Anything else is the final answer.

use serde_json::{Map, Value};
use thiserror::Error;

use thinkloop_core::llm::{ChatResponse, RawToolCall};
use thinkloop_core::tool::ToolCall;

/// What the model asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelAction {
    /// Run these tools, then ask again.
    ToolCalls { content: String, calls: Vec<ToolCall> },

    /// The run is done.
    FinalAnswer(String),
}

/// Model output that looked like a tool request but could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ParseError(pub String);

/// Classify a model reply.
pub fn parse_response(response: &ChatResponse) -> Result<ModelAction, ParseError> {
    let content = response.content.as_deref().unwrap_or("").trim();

    if !response.tool_calls.is_empty() {
        let calls = response
            .tool_calls
            .iter()
            .map(native_call)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(ModelAction::ToolCalls {
            content: content.to_string(),
            calls,
        });
    }

    if content.is_empty() {
        return Err(ParseError("empty response: expected a tool call or an answer".into()));
    }

    match extract_command(content) {
        Some(Candidate { json, whole, prose }) => match serde_json::from_str::<Value>(json) {
            Ok(Value::Object(object)) if is_command(&object) => {
                let call = command_call(&object)?;
                Ok(ModelAction::ToolCalls {
                    content: prose,
                    calls: vec![call],
                })
            }
            Ok(Value::Object(_)) if !whole => Ok(ModelAction::FinalAnswer(content.to_string())),
            Ok(_) => Err(ParseError(
                "JSON reply is not a tool command: expected an object with a \"tool\" field".into(),
            )),
            Err(e) if whole => Err(ParseError(format!("invalid JSON command: {e}"))),
            Err(_) => Ok(ModelAction::FinalAnswer(content.to_string())),
        },
        None => Ok(ModelAction::FinalAnswer(content.to_string())),
    }
}

fn native_call(raw: &RawToolCall) -> Result<ToolCall, ParseError> {
    if raw.name.trim().is_empty() {
        return Err(ParseError("tool call is missing a tool name".into()));
    }

    let arguments = if raw.arguments.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str::<Value>(&raw.arguments).map_err(|e| {
            ParseError(format!("arguments for '{}' are not valid JSON: {e}", raw.name))
        })?
    };
    let arguments = match arguments {
        Value::Object(_) => arguments,
        Value::Null => Value::Object(Map::new()),
        other => {
            return Err(ParseError(format!(
                "arguments for '{}' must be a JSON object, got {other}",
                raw.name
            )));
        }
    };

    let id = if raw.id.trim().is_empty() {
        new_call_id()
    } else {
        raw.id.clone()
    };
    Ok(ToolCall::new(id, raw.name.trim(), arguments))
}

struct Candidate<'a> {
    json: &'a str,
    /// The whole reply is the JSON block, so a broken one is a failed command.
    whole: bool,
    /// Text the model wrote around the JSON.
    prose: String,
}

/// Find a JSON object the model may have meant as a command.
fn extract_command(content: &str) -> Option<Candidate<'_>> {
    if let Some(fence) = fenced_block(content) {
        let inner = fence.body.trim();
        if inner.starts_with('{') {
            let before = content[..fence.start].trim();
            let after = content[fence.end..].trim();
            return Some(Candidate {
                json: inner,
                whole: before.is_empty() && after.is_empty(),
                prose: join_prose(before, after),
            });
        }
    }

    if content.starts_with('{') {
        let end = content.rfind('}').map(|i| i + 1).unwrap_or(content.len());
        return Some(Candidate {
            json: &content[..end],
            whole: true,
            prose: content[end..].trim().to_string(),
        });
    }
    None
}

fn join_prose(before: &str, after: &str) -> String {
    match (before.is_empty(), after.is_empty()) {
        (false, false) => format!("{before}\n{after}"),
        (false, true) => before.to_string(),
        (true, _) => after.to_string(),
    }
}

struct Fence<'a> {
    /// Offset of the opening ```
    start: usize,
    /// Offset just past the closing ```
    end: usize,
    body: &'a str,
}

/// The first ``` fence, with its body stripped of the language tag.
fn fenced_block(content: &str) -> Option<Fence<'_>> {
    let start = content.find("```")?;
    let after = &content[start + 3..];
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let tag = after[..body_start].trim();
    if !(tag.is_empty() || tag.eq_ignore_ascii_case("json")) {
        return None;
    }
    let body = &after[body_start..];
    let len = body.find("```")?;
    Some(Fence {
        start,
        end: start + 3 + body_start + len + 3,
        body: &body[..len],
    })
}

fn is_command(object: &Map<String, Value>) -> bool {
    ["tool_name", "tool", "name"]
        .iter()
        .any(|key| object.contains_key(*key))
        || matches!(object.get("function"), Some(Value::Object(inner)) if inner.contains_key("name"))
}

fn command_call(object: &Map<String, Value>) -> Result<ToolCall, ParseError> {
    let id = object
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(new_call_id);

    // {"id": ..., "type": "function", "function": {"name": ..., "arguments": "{...}"}}
    let object = match object.get("function") {
        Some(Value::Object(inner)) if !object.contains_key("tool_name") && !object.contains_key("tool") => inner,
        _ => object,
    };

    let name = object
        .get("tool_name")
        .or_else(|| object.get("tool"))
        .or_else(|| object.get("name"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ParseError("tool command is missing a tool name".into()))?;

    let arguments = match object
        .get("arguments")
        .or_else(|| object.get("args"))
        .or_else(|| object.get("parameters"))
    {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::Object(args)) => Value::Object(args.clone()),
        Some(Value::String(encoded)) if encoded.trim().is_empty() => Value::Object(Map::new()),
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Object(args)) => Value::Object(args),
            _ => {
                return Err(ParseError(format!(
                    "arguments for '{name}' must be a JSON object, got {encoded:?}"
                )));
            }
        },
        Some(other) => {
            return Err(ParseError(format!(
                "arguments for '{name}' must be a JSON object, got {other}"
            )));
        }
    };

    Ok(ToolCall::new(id, name, arguments))
}

fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}
