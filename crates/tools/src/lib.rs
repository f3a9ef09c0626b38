//! Built-in tool implementations for thinkloop.
//!
//! Tools give the agent the ability to interact with its workspace:
//! read/write files, list directories, search contents, and run shell
//! commands. File tools are confined to the workspace by [`path::Sandbox`].
//! [`TaskCompletedTool`] lets the model end a run explicitly.

pub mod control;
pub mod file_read;
pub mod file_write;
pub mod grep;
pub mod list_dir;
pub mod path;
pub mod shell;

use std::sync::Arc;

use thinkloop_config::ToolsConfig;
use thinkloop_core::error::ToolError;
use thinkloop_core::tool::{ToolArgs, ToolRegistry};

pub use control::TaskCompletedTool;
pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use grep::GrepTool;
pub use list_dir::ListDirTool;
pub use path::{PathValidationError, Sandbox, default_forbidden_paths};
pub use shell::ShellTool;

/// Directories never descended into by recursive tools.
pub(crate) const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    "venv",
    ".venv",
    ".tox",
];

pub(crate) fn is_skipped_dir(name: &str) -> bool {
    SKIP_DIRS.contains(&name)
}

/// Fetch a string argument.
pub(crate) fn str_arg<'a>(arguments: &'a ToolArgs, tool_name: &str, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments {
            tool_name: tool_name.to_string(),
            reason: format!("Missing '{key}' argument"),
        })
}

/// Cut `text` to at most `max_bytes` on a char boundary, noting the cut.
pub(crate) fn truncate_output(mut text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let total = text.len();
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str(&format!("\n... (truncated, {total} bytes total)"));
    text
}

/// Create a registry with all built-in tools, sandboxed to the configured workspace.
pub fn default_registry(config: &ToolsConfig) -> Result<ToolRegistry, PathValidationError> {
    let root = config.resolved_workspace();
    let sandbox = Sandbox::new(&root, &default_forbidden_paths())?;

    let registry = ToolRegistry::new();
    registry.register(Arc::new(FileReadTool::new(sandbox.clone(), config.max_output_bytes)));
    registry.register(Arc::new(FileWriteTool::new(sandbox.clone())));
    registry.register(Arc::new(ListDirTool::new(sandbox.clone())));
    registry.register(Arc::new(GrepTool::new(sandbox.clone())));
    registry.register(Arc::new(ShellTool::new(
        config.allowed_commands.clone(),
        sandbox.root(),
        config.max_output_bytes,
    )));
    registry.register(Arc::new(TaskCompletedTool));
    Ok(registry)
}
