//! write_file: create, overwrite, or append to a file inside the workspace.

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::info;

use thinkloop_core::error::ToolError;
use thinkloop_core::tool::{ParamType, Tool, ToolArgs, ToolParameter};

use crate::path::Sandbox;
use crate::str_arg;

pub struct FileWriteTool {
    sandbox: Sandbox,
}

impl FileWriteTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }

    fn failed(&self, reason: String) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason,
        }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file and parent directories if needed; overwrites unless append is true."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("path", ParamType::String, "The file path to write to"),
            ToolParameter::required("content", ParamType::String, "The content to write"),
            ToolParameter::optional(
                "append",
                ParamType::Boolean,
                "Append instead of overwriting",
                Some(json!(false)),
            ),
        ]
    }

    fn category(&self) -> &str {
        "filesystem"
    }

    fn is_dangerous(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: ToolArgs) -> Result<String, ToolError> {
        let path = str_arg(&arguments, self.name(), "path")?;
        let content = str_arg(&arguments, self.name(), "content")?;
        let append = arguments.get("append").and_then(|v| v.as_bool()).unwrap_or(false);

        let resolved = self
            .sandbox
            .resolve(path)
            .map_err(|e| e.into_tool_error(self.name()))?;

        if resolved.is_dir() {
            return Err(self.failed(format!("'{path}' is a directory")));
        }
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.failed(format!("Failed to create parent directory: {e}")))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&resolved)
            .await
            .map_err(|e| self.failed(format!("Failed to open '{path}': {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| self.failed(format!("Failed to write '{path}': {e}")))?;
        file.flush()
            .await
            .map_err(|e| self.failed(format!("Failed to write '{path}': {e}")))?;

        let shown = self.sandbox.display(&resolved);
        info!(path = %shown, bytes = content.len(), append, "Wrote file");
        let verb = if append { "Appended" } else { "Wrote" };
        Ok(format!("{verb} {} bytes to {shown}", content.len()))
    }
}
