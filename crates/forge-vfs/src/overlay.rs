//! Writable work-in-progress view.
//!
//! Accumulates an overlay of writes and delete tombstones on top of a base
//! commit during a turn, then commits the whole overlay as one tree. A claim
//! discipline asserts single-thread access: tool workers claim before
//! touching the view and release on the way out, and an imbalance surfaces
//! as `OverlayPoisoned` rather than silent interleaving.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use indexmap::IndexMap;
use tempfile::TempDir;

use forge_git::{Author, CommitKind, GitBackend, GitError, MergeOutcome, Oid, TreeChange};

use crate::path::normalize_path;
use crate::{decode_text, Vfs, VfsError, VfsResult};

/// One overlay entry. A write replaces a previous delete for the path and
/// vice versa; absence falls through to the base commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingChange {
    Write(String),
    Delete,
}

/// Cloned overlay state, used to unwind a cancelled or failed tool.
#[derive(Clone, Debug, Default)]
pub struct OverlaySnapshot {
    pending: IndexMap<String, PendingChange>,
}

/// What [`WorkInProgress::undo_path`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UndoAction {
    /// Pending edit dropped; the base version shows through again.
    Reverted,
    /// A file created this turn was removed.
    Removed,
    /// A delete tombstone was lifted, restoring the base version.
    Restored,
}

#[derive(Clone, Debug)]
pub struct CommitOptions {
    pub message: String,
    pub kind: CommitKind,
    pub author: Author,
}

pub struct WorkInProgress {
    backend: Arc<GitBackend>,
    branch: String,
    base: Oid,
    pending: IndexMap<String, PendingChange>,
    owner: Option<ThreadId>,
}

impl std::fmt::Debug for WorkInProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkInProgress")
            .field("branch", &self.branch)
            .field("base", &self.base)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl WorkInProgress {
    /// Open a writable view at the current tip of `branch`.
    pub fn open(backend: Arc<GitBackend>, branch: &str) -> VfsResult<Self> {
        let base = backend.branch_tip(branch)?;
        Ok(Self {
            backend,
            branch: branch.to_string(),
            base,
            pending: IndexMap::new(),
            owner: None,
        })
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn base_commit(&self) -> Oid {
        self.base
    }

    pub fn backend(&self) -> &Arc<GitBackend> {
        &self.backend
    }

    // ---- claim discipline --------------------------------------------------

    /// Claim the view for the current thread. Fails when another thread holds
    /// the claim; re-claiming from the owning thread is a no-op.
    pub fn claim(&mut self) -> VfsResult<()> {
        let current = thread::current().id();
        match self.owner {
            Some(owner) if owner != current => Err(VfsError::OverlayPoisoned {
                detail: format!("already claimed by {owner:?}, claim from {current:?}"),
            }),
            _ => {
                self.owner = Some(current);
                Ok(())
            }
        }
    }

    /// Release the claim. Fails when the caller is not the owner.
    pub fn release(&mut self) -> VfsResult<()> {
        let current = thread::current().id();
        match self.owner {
            Some(owner) if owner == current => {
                self.owner = None;
                Ok(())
            }
            other => Err(VfsError::OverlayPoisoned {
                detail: format!("release from {current:?}, owner {other:?}"),
            }),
        }
    }

    fn ensure_owner(&self) -> VfsResult<()> {
        let current = thread::current().id();
        match self.owner {
            Some(owner) if owner != current => Err(VfsError::OverlayPoisoned {
                detail: format!("owned by {owner:?}, accessed from {current:?}"),
            }),
            _ => Ok(()),
        }
    }

    // ---- overlay accessors -------------------------------------------------

    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_changes(&self) -> &IndexMap<String, PendingChange> {
        &self.pending
    }

    pub fn written_paths(&self) -> Vec<String> {
        self.pending
            .iter()
            .filter(|(_, change)| matches!(change, PendingChange::Write(_)))
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn deleted_paths(&self) -> Vec<String> {
        self.pending
            .iter()
            .filter(|(_, change)| matches!(change, PendingChange::Delete))
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn snapshot(&self) -> OverlaySnapshot {
        OverlaySnapshot {
            pending: self.pending.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: OverlaySnapshot) {
        self.pending = snapshot.pending;
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Drop all pending changes for `path`, reverting it to the base commit.
    pub fn undo_path(&mut self, path: &str) -> VfsResult<UndoAction> {
        self.ensure_owner()?;
        let path = normalize_path(path)?;
        let Some(change) = self.pending.shift_remove(&path) else {
            return Err(VfsError::NotFound { path });
        };
        let in_base = self.backend.blob_oid_at(self.base, &path)?.is_some();
        Ok(match (change, in_base) {
            (PendingChange::Delete, true) => UndoAction::Restored,
            (PendingChange::Write(_), true) => UndoAction::Reverted,
            (_, false) => UndoAction::Removed,
        })
    }

    // ---- commit ------------------------------------------------------------

    /// Materialise the overlay into a tree and commit it atomically onto the
    /// branch. On a raced ref the overlay tree is three-way merged against
    /// the new tip and the commit retried; an unresolvable conflict clears
    /// the overlay and fails with `MergeConflict`. On success the overlay is
    /// cleared and the base advances to the new commit.
    pub fn commit(&mut self, options: &CommitOptions) -> VfsResult<Oid> {
        self.ensure_owner()?;
        if self.pending.is_empty() {
            return Err(VfsError::NoChanges);
        }

        let changes: Vec<(String, TreeChange)> = self
            .pending
            .iter()
            .map(|(path, change)| {
                let entry = match change {
                    PendingChange::Write(text) => TreeChange::Blob(text.as_bytes().to_vec()),
                    PendingChange::Delete => TreeChange::Delete,
                };
                (path.clone(), entry)
            })
            .collect();

        let base_tree = self.backend.tree_of(self.base)?;
        let mut tree = self.backend.build_tree(Some(base_tree), &changes)?;
        let mut parent = self.base;

        // Two ref races in a row means another writer is live; after the
        // second merge the loop gives up and surfaces the race.
        for _ in 0..3 {
            match self.backend.commit_tree(
                &self.branch,
                tree,
                &[parent],
                &options.message,
                options.kind,
                &options.author,
            ) {
                Ok(oid) => {
                    self.pending.clear();
                    self.base = oid;
                    return Ok(oid);
                }
                Err(GitError::RefRaced { actual, .. }) => {
                    let tip_tree = self.backend.tree_of(actual)?;
                    match self.backend.three_way_merge(base_tree, tree, tip_tree)? {
                        MergeOutcome::Clean(merged) => {
                            tracing::debug!(
                                branch = %self.branch,
                                tip = %actual,
                                "ref raced; retrying with merged tree"
                            );
                            tree = merged;
                            parent = actual;
                        }
                        MergeOutcome::Conflicts(paths) => {
                            self.pending.clear();
                            return Err(GitError::MergeConflict { paths }.into());
                        }
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(VfsError::OverlayPoisoned {
            detail: format!("branch '{}' kept racing during commit", self.branch),
        })
    }

    /// Write the fully resolved tree (base + overlay, binaries included) into
    /// a fresh temporary directory for external command execution. The
    /// directory is discarded when the returned handle drops.
    pub fn materialize_to_tempdir(&self) -> VfsResult<TempDir> {
        self.ensure_owner()?;
        let dir = TempDir::with_prefix("forge-vfs-").map_err(|source| VfsError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        for path in self.list()? {
            let bytes = self.read_bytes(&path)?;
            let target = dir.path().join(&path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|source| VfsError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            std::fs::write(&target, bytes).map_err(|source| VfsError::Io {
                path: target.clone(),
                source,
            })?;
        }
        Ok(dir)
    }
}

impl Vfs for WorkInProgress {
    fn read(&self, path: &str) -> VfsResult<String> {
        let path = normalize_path(path)?;
        decode_text(&path, self.read_bytes(&path)?)
    }

    fn read_bytes(&self, path: &str) -> VfsResult<Vec<u8>> {
        self.ensure_owner()?;
        let path = normalize_path(path)?;
        match self.pending.get(&path) {
            Some(PendingChange::Write(text)) => Ok(text.as_bytes().to_vec()),
            Some(PendingChange::Delete) => Err(VfsError::NotFound { path }),
            None => self
                .backend
                .read_file(self.base, &path)?
                .ok_or(VfsError::NotFound { path }),
        }
    }

    fn write(&mut self, path: &str, contents: &str) -> VfsResult<()> {
        self.ensure_owner()?;
        let path = normalize_path(path)?;
        self.pending
            .insert(path, PendingChange::Write(contents.to_string()));
        Ok(())
    }

    fn delete(&mut self, path: &str) -> VfsResult<()> {
        self.ensure_owner()?;
        let path = normalize_path(path)?;
        // Idempotent even when the base has no such file; the tombstone is a
        // no-op at tree build time.
        self.pending.insert(path, PendingChange::Delete);
        Ok(())
    }

    fn exists(&self, path: &str) -> VfsResult<bool> {
        self.ensure_owner()?;
        let path = normalize_path(path)?;
        match self.pending.get(&path) {
            Some(PendingChange::Write(_)) => Ok(true),
            Some(PendingChange::Delete) => Ok(false),
            None => Ok(self.backend.blob_oid_at(self.base, &path)?.is_some()),
        }
    }

    fn list(&self) -> VfsResult<Vec<String>> {
        self.ensure_owner()?;
        let mut files: Vec<String> = self.backend.list_files(self.base)?;
        for (path, change) in &self.pending {
            match change {
                PendingChange::Write(_) => {
                    if !files.contains(path) {
                        files.push(path.clone());
                    }
                }
                PendingChange::Delete => files.retain(|p| p != path),
            }
        }
        files.sort();
        Ok(files)
    }
}
