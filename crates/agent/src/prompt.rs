//! Prompt construction: system prompt + tool catalog + bounded history.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use thinkloop_core::agent::AgentCapabilities;
use thinkloop_core::llm::{ChatMessage, ToolDefinition};
use thinkloop_core::tool::{ToolInfo, ToolRegistry};
use thinkloop_core::turn::{ConversationContext, Role, Turn};

const COMMAND_FORMAT: &str = "To use a tool, call it through the tool-calling interface, or reply with \
only a JSON object of the form {\"tool_name\": \"<name>\", \"arguments\": {...}}. \
When you have the final answer, reply with plain text and no tool call, or call \
task_completed with the answer as its message.";

/// Messages and tool definitions for one model call.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

pub struct PromptConstructor {
    registry: Arc<ToolRegistry>,
}

impl PromptConstructor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Build the prompt for the next model call.
    ///
    /// `task` is re-stated right after the system message when the current
    /// request has scrolled out of the history window. `notes` are appended
    /// last and never stored.
    pub fn build(
        &self,
        capabilities: &AgentCapabilities,
        context: &ConversationContext,
        task: Option<&str>,
        notes: &[ChatMessage],
    ) -> Prompt {
        let tools: Vec<ToolInfo> = self
            .registry
            .list()
            .into_iter()
            .filter(|t| capabilities.can_use_tool(&t.name))
            .collect();

        let mut messages = vec![ChatMessage::system(system_prompt(capabilities, &tools))];
        if let Some(task) = task {
            messages.push(ChatMessage::user(task));
        }
        messages.extend(history_messages(context.turns()));
        messages.extend(notes.iter().cloned());

        Prompt {
            messages,
            tools: self.registry.definitions(&capabilities.authorized_tools),
        }
    }
}

fn system_prompt(capabilities: &AgentCapabilities, tools: &[ToolInfo]) -> String {
    let mut prompt = capabilities.system_prompt.trim().to_string();

    if tools.is_empty() {
        prompt.push_str("\n\nNo tools are available. Answer directly.");
        return prompt;
    }

    prompt.push_str("\n\n## Available tools\n");
    for tool in tools {
        let params: Vec<String> = tool
            .parameters
            .iter()
            .map(|p| {
                let req = if p.required { ", required" } else { "" };
                format!("{} ({}{req})", p.name, p.kind.as_str())
            })
            .collect();
        if params.is_empty() {
            prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        } else {
            prompt.push_str(&format!(
                "- {}: {} Parameters: {}\n",
                tool.name,
                tool.description,
                params.join(", ")
            ));
        }
    }
    prompt.push('\n');
    prompt.push_str(COMMAND_FORMAT);
    prompt
}

/// Convert stored turns to chat messages.
///
/// The window can cut a tool exchange in half: tool results whose request
/// fell out of the window are dropped, and requested calls without a result
/// are stripped from their assistant message.
fn history_messages(turns: &[Turn]) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = Vec::with_capacity(turns.len());
    let mut pending: HashSet<String> = HashSet::new();
    let mut requester: Option<usize> = None;

    for turn in turns {
        if turn.role == Role::Tool {
            let call_id = turn.metadata.tool_call_id.clone().unwrap_or_default();
            if pending.remove(&call_id) {
                messages.push(ChatMessage::tool(
                    call_id,
                    turn.metadata.tool_name.clone().unwrap_or_default(),
                    turn.content.clone(),
                ));
            } else {
                debug!(call_id = %call_id, "Dropping tool result without its request");
            }
            continue;
        }

        close_exchange(&mut messages, &mut pending, requester.take());

        let message = match turn.role {
            Role::User => ChatMessage::user(&turn.content),
            Role::System => ChatMessage::system(&turn.content),
            _ if turn.has_tool_calls() => {
                pending = turn.metadata.tool_calls.iter().map(|c| c.id.clone()).collect();
                requester = Some(messages.len());
                ChatMessage::assistant_with_tool_calls(&turn.content, turn.metadata.tool_calls.clone())
            }
            _ => ChatMessage::assistant(&turn.content),
        };
        messages.push(message);
    }
    close_exchange(&mut messages, &mut pending, requester);
    messages
}

fn close_exchange(messages: &mut Vec<ChatMessage>, pending: &mut HashSet<String>, requester: Option<usize>) {
    if pending.is_empty() {
        return;
    }
    if let Some(index) = requester {
        let message = &mut messages[index];
        message.tool_calls.retain(|c| !pending.contains(&c.id));
        if message.tool_calls.is_empty() && message.content.trim().is_empty() {
            messages.remove(index);
        }
    }
    pending.clear();
}
