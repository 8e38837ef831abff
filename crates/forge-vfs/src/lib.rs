//! Virtual filesystem layered over git objects.
//!
//! Two views share one interface: [`CommitView`] resolves reads from a fixed
//! commit and rejects writes, [`WorkInProgress`] layers an in-memory overlay
//! of writes and delete tombstones over a base commit and commits the overlay
//! atomically. Neither view ever touches the working directory.

mod binary;
mod commit_view;
mod overlay;
mod path;

pub use binary::is_binary_path;
pub use commit_view::CommitView;
pub use overlay::{CommitOptions, OverlaySnapshot, PendingChange, UndoAction, WorkInProgress};
pub use path::normalize_path;

use forge_git::GitError;

pub type VfsResult<T> = Result<T, VfsError>;

#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    #[error("file not found: {path}")]
    NotFound { path: String },
    #[error("this view is read-only")]
    ReadOnly,
    #[error("{path} is a binary file, not readable as text")]
    Binary { path: String },
    #[error("bad path '{path}': {reason}")]
    BadPath { path: String, reason: String },
    #[error("overlay poisoned: {detail}")]
    OverlayPoisoned { detail: String },
    #[error("no pending changes to commit")]
    NoChanges,
    #[error("i/o failure at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Git(#[from] GitError),
}

/// Uniform file API shared by commit views and work-in-progress views.
///
/// Paths are repository-relative, forward-slash separated, pre-normalised by
/// [`normalize_path`]. `read` refuses binary files; `read_bytes` does not.
pub trait Vfs {
    fn read(&self, path: &str) -> VfsResult<String>;
    fn read_bytes(&self, path: &str) -> VfsResult<Vec<u8>>;
    fn write(&mut self, path: &str, contents: &str) -> VfsResult<()>;
    fn delete(&mut self, path: &str) -> VfsResult<()>;
    fn exists(&self, path: &str) -> VfsResult<bool>;
    fn list(&self) -> VfsResult<Vec<String>>;

    fn is_binary(&self, path: &str) -> bool {
        is_binary_path(path)
    }
}

pub(crate) fn decode_text(path: &str, bytes: Vec<u8>) -> VfsResult<String> {
    if is_binary_path(path) {
        return Err(VfsError::Binary {
            path: path.to_string(),
        });
    }
    // Lossy decode mirrors reading with errors="replace"; git blobs carry no
    // encoding metadata.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
