//! task_completed: the model's explicit end-of-run signal.
//!
//! The agent loop intercepts calls to this tool and ends the run with the
//! `message` argument as the answer. It is registered so that it shows up in
//! the tool catalog; `execute` only runs when a caller invokes it directly.

use async_trait::async_trait;
use serde_json::{Value, json};

use thinkloop_core::error::ToolError;
use thinkloop_core::tool::{DEFAULT_COMPLETION_MESSAGE, ParamType, TASK_COMPLETED, Tool, ToolArgs, ToolParameter};

pub struct TaskCompletedTool;

#[async_trait]
impl Tool for TaskCompletedTool {
    fn name(&self) -> &str {
        TASK_COMPLETED
    }

    fn description(&self) -> &str {
        "Call this when the objective is achieved. The message is returned to the user as the final answer."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::optional(
            "message",
            ParamType::String,
            "Final summary of what was achieved",
            Some(json!(DEFAULT_COMPLETION_MESSAGE)),
        )]
    }

    fn category(&self) -> &str {
        "control"
    }

    async fn execute(&self, arguments: ToolArgs) -> Result<String, ToolError> {
        Ok(arguments
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_COMPLETION_MESSAGE)
            .to_string())
    }
}
