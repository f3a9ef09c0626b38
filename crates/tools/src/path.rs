//! Path sandboxing: confine file tools to a workspace directory.
//!
//! Relative paths resolve against the workspace root. Every resolved path is
//! canonicalized (through its nearest existing ancestor when the target does
//! not exist yet) and must stay under the root and outside forbidden
//! prefixes.

use std::path::{Component, Path, PathBuf};

use thinkloop_core::error::ToolError;

#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' is outside the workspace")]
    OutsideWorkspace { path: String },

    #[error("Path '{path}' matches forbidden pattern '{pattern}'")]
    ForbiddenPath { path: String, pattern: String },

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Failed to canonicalize path '{path}': {reason}")]
    CanonicalizeFailed { path: String, reason: String },
}

impl PathValidationError {
    pub fn into_tool_error(self, tool_name: &str) -> ToolError {
        ToolError::PermissionDenied {
            tool_name: tool_name.to_string(),
            reason: self.to_string(),
        }
    }
}

/// Default prefixes no tool may touch, even inside the workspace.
pub fn default_forbidden_paths() -> Vec<String> {
    vec!["~/.ssh".into(), "~/.gnupg".into(), "~/.aws".into(), "/etc".into()]
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    forbidden: Vec<PathBuf>,
    forbidden_patterns: Vec<String>,
}

impl Sandbox {
    /// A sandbox rooted at `root`, which must exist.
    pub fn new(root: impl AsRef<Path>, forbidden_paths: &[String]) -> Result<Self, PathValidationError> {
        let raw = root.as_ref();
        let root = raw.canonicalize().map_err(|e| PathValidationError::CanonicalizeFailed {
            path: raw.display().to_string(),
            reason: e.to_string(),
        })?;
        let forbidden = forbidden_paths
            .iter()
            .map(|p| {
                let expanded = PathBuf::from(expand_tilde(p));
                expanded.canonicalize().unwrap_or(expanded)
            })
            .collect();
        Ok(Self {
            root,
            forbidden,
            forbidden_patterns: forbidden_paths.to_vec(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a user-supplied path to a canonical path inside the workspace.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, PathValidationError> {
        let input = Path::new(path);
        if input.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(PathValidationError::PathTraversal { path: path.into() });
        }

        let joined = if input.is_absolute() {
            input.to_path_buf()
        } else {
            self.root.join(input)
        };
        let canonical = canonicalize_lenient(&joined).map_err(|reason| PathValidationError::CanonicalizeFailed {
            path: path.into(),
            reason,
        })?;

        if let Some(idx) = self.forbidden.iter().position(|f| canonical.starts_with(f)) {
            return Err(PathValidationError::ForbiddenPath {
                path: path.into(),
                pattern: self.forbidden_patterns[idx].clone(),
            });
        }

        if !canonical.starts_with(&self.root) {
            return Err(PathValidationError::OutsideWorkspace { path: path.into() });
        }

        Ok(canonical)
    }

    /// Path shown to the model: relative to the root where possible.
    pub fn display(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        if rel.as_os_str().is_empty() {
            ".".into()
        } else {
            rel.to_string_lossy().replace('\\', "/")
        }
    }
}

/// Canonicalize the nearest existing ancestor and re-append the rest.
fn canonicalize_lenient(path: &Path) -> Result<PathBuf, String> {
    let mut existing = path;
    let mut rest = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return Err("no existing ancestor".into()),
        }
    }
    let mut canonical = existing.canonicalize().map_err(|e| e.to_string())?;
    for name in rest.into_iter().rev() {
        canonical.push(name);
    }
    Ok(canonical)
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if (path.starts_with("~/") || path == "~")
        && let Some(home) = home_dir()
    {
        return path.replacen('~', &home, 1);
    }
    path.to_string()
}

fn home_dir() -> Option<String> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok()
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok()
    }
}
