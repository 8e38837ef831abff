//! Tool registry and execution environment.
//!
//! Tools are pure functions over a claimed work-in-progress VFS plus a narrow
//! [`ToolContext`]; session-level consequences are declared as
//! [`SideEffect`] directives that the turn executor interprets. Built-in
//! tools are compiled in; user tools are declarative manifests under
//! `./tools/` gated by hash-based approval. No tool can reach a shell: the
//! ones that need a real filesystem run a fixed, discovered command inside a
//! materialised tempdir under a timeout.

pub mod approval;
pub mod builtin;
pub mod context;
pub mod inline;
pub mod matching;
pub mod registry;
pub mod user;

pub use approval::ApprovalStore;
pub use context::{SessionLookup, SessionView, SideEffect, ToolContext, ToolOutput};
pub use inline::{parse_inline_commands, InlineCommand};
pub use registry::{ToolRegistry, ToolResolution};
pub use user::{UserTool, UserToolManifest};

use std::time::Duration;

use forge_git::GitError;
use forge_vfs::{VfsError, WorkInProgress};
use serde::Serialize;
use serde_json::Value;

pub type ToolExecResult = Result<ToolOutput, ToolError>;

/// Tool-level failures. These become error tool-result messages surfaced to
/// the agent for self-correction; they never abort the turn on their own.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("bad arguments: {message}")]
    BadArguments { message: String },
    #[error("ambiguous match: {count} occurrences")]
    AmbiguousMatch { count: usize },
    #[error("{message}")]
    Failed { message: String },
    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error(transparent)]
    Vfs(#[from] VfsError),
    #[error(transparent)]
    Git(#[from] GitError),
}

impl ToolError {
    pub fn bad_arguments(message: impl Into<String>) -> Self {
        Self::BadArguments {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// The taxonomy name surfaced in error tool results.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::BadArguments { .. } => "BadArguments",
            ToolError::AmbiguousMatch { .. } => "AmbiguousMatch",
            ToolError::Failed { .. } => "ToolFailed",
            ToolError::Timeout { .. } => "ToolTimeout",
            ToolError::Vfs(VfsError::NotFound { .. }) => "NotFound",
            ToolError::Vfs(VfsError::Binary { .. }) => "Binary",
            ToolError::Vfs(VfsError::BadPath { .. }) => "BadPath",
            ToolError::Vfs(VfsError::ReadOnly) => "ReadOnly",
            ToolError::Vfs(VfsError::OverlayPoisoned { .. }) => "OverlayPoisoned",
            ToolError::Vfs(_) => "ToolFailed",
            ToolError::Git(GitError::MergeConflict { .. }) => "MergeConflict",
            ToolError::Git(GitError::RefRaced { .. }) => "RefRaced",
            ToolError::Git(_) => "ToolFailed",
        }
    }
}

/// How the model invokes a tool: a structured call through the protocol, or
/// pseudo-XML inline in prose.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Invocation {
    Api,
    Inline,
}

/// Schema advertised to the model.
#[derive(Clone, Debug, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One executable tool.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn schema(&self) -> ToolSchema;

    fn invocation(&self) -> Invocation {
        Invocation::Api
    }

    /// Per-invocation deadline. Tools that run external commands override
    /// this with the executor-supplied exec budget.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    fn execute(
        &self,
        vfs: &mut WorkInProgress,
        args: &Value,
        ctx: &ToolContext,
    ) -> ToolExecResult;
}

pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::bad_arguments(format!("'{key}' must be a string")))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

pub(crate) fn string_array(args: &Value, key: &str) -> Result<Vec<String>, ToolError> {
    match args.get(key) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ToolError::bad_arguments(format!("'{key}' items must be strings")))
            })
            .collect(),
        Some(Value::String(raw)) => Err(ToolError::bad_arguments(format!(
            "'{key}' must be an array, not a string; got {raw:?}"
        ))),
        Some(_) => Err(ToolError::bad_arguments(format!("'{key}' must be an array"))),
    }
}
