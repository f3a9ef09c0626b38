//! read_file: read a text file inside the workspace.

use async_trait::async_trait;
use tracing::debug;

use thinkloop_core::error::ToolError;
use thinkloop_core::tool::{ParamType, Tool, ToolArgs, ToolParameter};

use crate::path::Sandbox;
use crate::{str_arg, truncate_output};

pub struct FileReadTool {
    sandbox: Sandbox,
    max_output_bytes: usize,
}

impl FileReadTool {
    pub fn new(sandbox: Sandbox, max_output_bytes: usize) -> Self {
        Self {
            sandbox,
            max_output_bytes,
        }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file. Paths are relative to the workspace root."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("path", ParamType::String, "The file path to read"),
            ToolParameter::optional(
                "max_bytes",
                ParamType::Integer,
                "Return at most this many bytes",
                None,
            ),
        ]
    }

    fn category(&self) -> &str {
        "filesystem"
    }

    async fn execute(&self, arguments: ToolArgs) -> Result<String, ToolError> {
        let path = str_arg(&arguments, self.name(), "path")?;
        let resolved = self
            .sandbox
            .resolve(path)
            .map_err(|e| e.into_tool_error(self.name()))?;

        if resolved.is_dir() {
            return Err(ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("'{path}' is a directory; use list_dir"),
            });
        }

        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("Failed to read file '{path}': {e}"),
            })?;

        let limit = arguments
            .get("max_bytes")
            .and_then(|v| v.as_u64())
            .map(|n| (n as usize).min(self.max_output_bytes))
            .unwrap_or(self.max_output_bytes);

        debug!(path = %self.sandbox.display(&resolved), bytes = content.len(), "Read file");
        Ok(truncate_output(content, limit))
    }
}
