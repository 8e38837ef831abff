//! The narrow surface tools see, and the directives they hand back.

use std::sync::Arc;
use std::time::Duration;

use forge_git::{Author, GitBackend};
use forge_llm::ModelClient;
use serde_json::Value;

/// Tracked session record, one per branch.
pub const SESSION_FILE: &str = ".forge/session.json";

/// Declared session-level consequence of a tool call. Tools stay pure over
/// the VFS; the turn executor interprets these after the call returns.
#[derive(Clone, Debug, PartialEq)]
pub enum SideEffect {
    /// Add the path to the session's active files (full content in context).
    OpenFile { path: String },
    /// Drop the path from the session's active files.
    CloseFile { path: String },
    /// Mark this call's result block ephemeral in the prompt stream.
    EphemeralResult,
    /// Close a sub-commit now, mid-turn.
    CommitNow { message: String },
    /// A child session was forked; start it with the instruction.
    SpawnChild { branch: String, instruction: String },
    /// Suspend the turn until one of the listed children is ready.
    WaitChildren { branches: Vec<String> },
    /// These paths changed under the overlay; refresh their context blocks.
    FilesModified { paths: Vec<String> },
    /// Fold a range of tool-result blocks into a summary.
    CompactToolResults { from: u32, to: u32, summary: String },
    /// Discard this call's scratchpad argument from the prompt stream.
    CompactThink,
}

/// Structured result of a successful tool call.
#[derive(Clone, Debug, Default)]
pub struct ToolOutput {
    pub value: Value,
    pub effects: Vec<SideEffect>,
}

impl ToolOutput {
    pub fn value(value: Value) -> Self {
        Self {
            value,
            effects: Vec::new(),
        }
    }

    pub fn with_effect(mut self, effect: SideEffect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Point-in-time view of another session, supplied by the registry.
#[derive(Clone, Debug)]
pub struct SessionView {
    /// Lifecycle state in its snake_case wire spelling.
    pub state: String,
    pub parent_branch: Option<String>,
    pub yield_message: Option<String>,
    pub last_assistant: Option<String>,
}

impl SessionView {
    /// A child is ready when it has reached a stopping point a waiting
    /// parent can act on.
    pub fn is_ready(&self) -> bool {
        matches!(
            self.state.as_str(),
            "idle" | "completed" | "waiting_input" | "waiting_children" | "error"
        )
    }
}

/// Session directory as tools see it. Implemented by the session registry;
/// tools never touch live sessions directly.
pub trait SessionLookup: Send + Sync {
    fn session_view(&self, branch: &str) -> Option<SessionView>;
}

/// Everything a tool may reach beyond its VFS handle.
#[derive(Clone)]
pub struct ToolContext {
    pub branch: String,
    pub backend: Arc<GitBackend>,
    pub author: Author,
    pub sessions: Option<Arc<dyn SessionLookup>>,
    /// Auxiliary model for one-shot queries (scout). Absent in hosts that
    /// configure none.
    pub aux_model: Option<Arc<dyn ModelClient>>,
    pub aux_model_name: String,
    /// Runtime handle for tools that must await the auxiliary model from a
    /// blocking worker thread.
    pub runtime: Option<tokio::runtime::Handle>,
    /// Deadline for tools that run external commands.
    pub exec_timeout: Duration,
}

impl ToolContext {
    pub fn new(branch: impl Into<String>, backend: Arc<GitBackend>) -> Self {
        Self {
            branch: branch.into(),
            backend,
            author: Author::default(),
            sessions: None,
            aux_model: None,
            aux_model_name: "aux".to_string(),
            runtime: None,
            exec_timeout: Duration::from_secs(300),
        }
    }
}
