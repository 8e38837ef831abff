//! Sessions, turns and the registry.
//!
//! A session lives on a branch: its conversation and lifecycle state persist
//! in `.forge/session.json` inside that branch's tree, so forking a branch
//! forks the conversation. A [`LiveSession`] is the in-memory projection that
//! owns the writable VFS and runs turns; the [`SessionRegistry`] indexes live
//! sessions by branch, guards load/unload, and relays child-completion
//! notifications to waiting parents.

mod events;
mod live;
mod registry;
mod settings;
mod state;
mod store;
mod summary;
mod turn;
mod user_cache;

pub use events::SessionEvent;
pub use live::{LiveSession, ObserverGuard};
pub use registry::SessionRegistry;
pub use settings::Settings;
pub use state::{ensure_transition, SessionState};
pub use store::{PendingWait, SessionRecord, MERGED_DIR, SESSION_FILE, SESSION_VERSION};
pub use summary::SummaryCache;
pub use user_cache::{BranchHints, UserStateCache};

use forge_git::GitError;
use forge_llm::LlmError;
use forge_tools::approval::ApprovalError;
use forge_vfs::VfsError;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("illegal transition {from:?} -> {to:?}")]
    IllegalTransition {
        from: SessionState,
        to: SessionState,
    },
    #[error("session record version {found} is newer than supported {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("no session on branch '{branch}'")]
    NoSession { branch: String },
    #[error("session '{branch}' cannot be unloaded in state {state:?}")]
    Busy {
        branch: String,
        state: SessionState,
    },
    #[error("session '{branch}' has attached observers")]
    ObserversAttached { branch: String },
    #[error("model unavailable after {attempts} attempt(s): {message}")]
    ModelUnavailable { attempts: usize, message: String },
    #[error("turn cancelled")]
    Cancelled,
    #[error("record serialisation failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Vfs(#[from] VfsError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
}

impl SessionError {
    /// The taxonomy name surfaced in error events.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::IllegalTransition { .. } => "IllegalTransition",
            SessionError::UnsupportedVersion { .. } => "UnsupportedVersion",
            SessionError::NoSession { .. } => "NoSession",
            SessionError::Busy { .. } => "Busy",
            SessionError::ObserversAttached { .. } => "ObserversAttached",
            SessionError::ModelUnavailable { .. } => "ModelUnavailable",
            SessionError::Cancelled => "Cancelled",
            SessionError::Serde(_) => "CorruptRecord",
            SessionError::Vfs(VfsError::OverlayPoisoned { .. }) => "OverlayPoisoned",
            SessionError::Vfs(VfsError::NotFound { .. }) => "NotFound",
            SessionError::Vfs(VfsError::Binary { .. }) => "Binary",
            SessionError::Vfs(VfsError::BadPath { .. }) => "BadPath",
            SessionError::Vfs(VfsError::Git(err)) => git_kind(err),
            SessionError::Vfs(_) => "VfsError",
            SessionError::Git(err) => git_kind(err),
            SessionError::Llm(LlmError::Unavailable { .. }) => "ModelUnavailable",
            SessionError::Llm(LlmError::Protocol { .. }) => "ModelProtocolError",
            SessionError::Llm(LlmError::QuotaExhausted { .. }) => "QuotaExhausted",
            SessionError::Llm(LlmError::AuthFailure { .. }) => "AuthFailure",
            SessionError::Llm(LlmError::Cancelled) => "Cancelled",
            SessionError::Approval(_) => "ApprovalStore",
        }
    }
}

fn git_kind(err: &GitError) -> &'static str {
    match err {
        GitError::RefRaced { .. } => "RefRaced",
        GitError::MergeConflict { .. } => "MergeConflict",
        GitError::WorkdirDirty { .. } => "WorkdirDirty",
        GitError::CorruptObject { .. } => "CorruptObject",
        _ => "GitError",
    }
}
