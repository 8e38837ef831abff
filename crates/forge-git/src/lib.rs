//! Git object store adapter.
//!
//! Everything the rest of the workspace knows about git goes through
//! [`GitBackend`]: blob and tree reads, in-memory tree construction, branch
//! commits with compare-and-swap ref updates, three-way merges, and the one
//! sanctioned path that touches the working directory
//! ([`GitBackend::working_tree_sync`]).

mod backend;
mod commit_kind;
mod tree;

pub use backend::{Author, CommitInfo, GitBackend, MergeOutcome};
pub use commit_kind::{format_commit_message, parse_commit_kind, CommitKind};
pub use git2::Oid;
pub use tree::TreeChange;

use std::path::PathBuf;

pub type GitResult<T> = Result<T, GitError>;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("branch '{branch}' moved: expected tip {expected}, found {actual}")]
    RefRaced {
        branch: String,
        expected: Oid,
        actual: Oid,
    },
    #[error("three-way merge conflicts on {} path(s): {}", .paths.len(), .paths.join(", "))]
    MergeConflict { paths: Vec<String> },
    #[error("working tree at {workdir:?} has uncommitted changes")]
    WorkdirDirty { workdir: PathBuf },
    #[error("branch '{branch}' not found")]
    BranchNotFound { branch: String },
    #[error("branch '{branch}' already exists")]
    BranchExists { branch: String },
    #[error("object {oid} not found")]
    ObjectNotFound { oid: Oid },
    #[error("object {oid} is corrupt or has unexpected type: {detail}")]
    CorruptObject { oid: Oid, detail: String },
    #[error("repository has no working directory")]
    Bare,
    #[error(transparent)]
    Raw(#[from] git2::Error),
}
