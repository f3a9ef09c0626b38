//! list_dir: list directory entries inside the workspace.

use async_trait::async_trait;
use serde_json::json;
use walkdir::WalkDir;

use thinkloop_core::error::ToolError;
use thinkloop_core::tool::{ParamType, Tool, ToolArgs, ToolParameter};

use crate::path::Sandbox;
use crate::{is_skipped_dir, str_arg};

const MAX_ENTRIES: usize = 500;

pub struct ListDirTool {
    sandbox: Sandbox,
}

impl ListDirTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List files and directories. Directories end with '/'. Set recursive to walk subdirectories."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::optional("path", ParamType::String, "Directory to list", Some(json!("."))),
            ToolParameter::optional(
                "recursive",
                ParamType::Boolean,
                "Include subdirectories",
                Some(json!(false)),
            ),
        ]
    }

    fn category(&self) -> &str {
        "filesystem"
    }

    async fn execute(&self, arguments: ToolArgs) -> Result<String, ToolError> {
        let path = str_arg(&arguments, self.name(), "path").unwrap_or(".");
        let recursive = arguments.get("recursive").and_then(|v| v.as_bool()).unwrap_or(false);

        let resolved = self
            .sandbox
            .resolve(path)
            .map_err(|e| e.into_tool_error(self.name()))?;
        if !resolved.is_dir() {
            return Err(ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("'{path}' is not a directory"),
            });
        }

        let sandbox = self.sandbox.clone();
        let listing = tokio::task::spawn_blocking(move || {
            let walker = WalkDir::new(&resolved)
                .min_depth(1)
                .max_depth(if recursive { usize::MAX } else { 1 })
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| {
                    !recursive || !(e.file_type().is_dir() && is_skipped_dir(&e.file_name().to_string_lossy()))
                });

            let mut entries = Vec::new();
            let mut truncated = false;
            for entry in walker.filter_map(|e| e.ok()) {
                if entries.len() >= MAX_ENTRIES {
                    truncated = true;
                    break;
                }
                let mut shown = sandbox.display(entry.path());
                if entry.file_type().is_dir() {
                    shown.push('/');
                }
                entries.push(shown);
            }
            (entries, truncated)
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "list_dir".into(),
            reason: e.to_string(),
        })?;

        let (entries, truncated) = listing;
        if entries.is_empty() {
            return Ok(format!("{path} is empty"));
        }
        let mut output = entries.join("\n");
        if truncated {
            output.push_str(&format!("\n... (showing first {MAX_ENTRIES} entries)"));
        }
        Ok(output)
    }
}
