//! grep: regex search over file contents inside the workspace.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::json;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

use thinkloop_core::error::ToolError;
use thinkloop_core::tool::{ParamType, Tool, ToolArgs, ToolParameter};

use crate::path::Sandbox;
use crate::{is_skipped_dir, str_arg};

const DEFAULT_MAX_RESULTS: u64 = 50;

pub struct GrepTool {
    sandbox: Sandbox,
}

impl GrepTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Returns matching lines as path:line:text."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("pattern", ParamType::String, "Regex pattern to search for"),
            ToolParameter::optional(
                "path",
                ParamType::String,
                "File or directory to search, relative to the workspace",
                Some(json!(".")),
            ),
            ToolParameter::optional(
                "case_insensitive",
                ParamType::Boolean,
                "Ignore case when matching",
                Some(json!(false)),
            ),
            ToolParameter::optional(
                "max_results",
                ParamType::Integer,
                "Stop after this many matching lines",
                Some(json!(DEFAULT_MAX_RESULTS)),
            ),
        ]
    }

    fn category(&self) -> &str {
        "search"
    }

    async fn execute(&self, arguments: ToolArgs) -> Result<String, ToolError> {
        let pattern = str_arg(&arguments, self.name(), "pattern")?.to_string();
        let path = str_arg(&arguments, self.name(), "path").unwrap_or(".");
        let case_insensitive = arguments
            .get("case_insensitive")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let max_results = arguments
            .get("max_results")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .max(1) as usize;

        let re = RegexBuilder::new(&pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| ToolError::InvalidArguments {
                tool_name: self.name().into(),
                reason: format!("Invalid regex pattern: {e}"),
            })?;

        let resolved = self
            .sandbox
            .resolve(path)
            .map_err(|e| e.into_tool_error(self.name()))?;
        if !resolved.exists() {
            return Err(ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("Path not found: {path}"),
            });
        }

        let sandbox = self.sandbox.clone();
        let (matches, files_matched) = tokio::task::spawn_blocking(move || {
            search(&resolved, &sandbox, &re, max_results)
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "grep".into(),
            reason: e.to_string(),
        })?;

        if matches.is_empty() {
            return Ok(format!("No matches found for pattern: {pattern}"));
        }

        let total = matches.len();
        let capped = if total >= max_results { ", results capped" } else { "" };
        Ok(format!(
            "{}\n\n[{total} match(es) in {files_matched} file(s){capped}]",
            matches.join("\n")
        ))
    }
}

fn search(root: &Path, sandbox: &Sandbox, re: &Regex, max_results: usize) -> (Vec<String>, usize) {
    let mut matches = Vec::new();
    let mut files_matched = 0;

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !(e.file_type().is_dir() && is_skipped_dir(&e.file_name().to_string_lossy())));

    for entry in walker.filter_map(|e| e.ok()) {
        if matches.len() >= max_results {
            break;
        }
        if !entry.file_type().is_file() || is_likely_binary(entry.path()) {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };

        let shown = sandbox.display(entry.path());
        let mut file_has_match = false;
        for (line_num, line) in content.lines().enumerate() {
            if matches.len() >= max_results {
                break;
            }
            if re.is_match(line) {
                if !file_has_match {
                    files_matched += 1;
                    file_has_match = true;
                }
                matches.push(format!("{shown}:{}:{line}", line_num + 1));
            }
        }
    }

    (matches, files_matched)
}

fn is_likely_binary(path: &Path) -> bool {
    let Ok(mut file) = std::fs::File::open(path) else {
        return true;
    };
    let mut buf = [0u8; 512];
    match file.read(&mut buf) {
        Ok(n) => buf[..n].contains(&0),
        Err(_) => true,
    }
}
