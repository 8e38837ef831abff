//! Read-only view of a single commit.

use std::sync::Arc;

use forge_git::{GitBackend, Oid};

use crate::path::normalize_path;
use crate::{decode_text, Vfs, VfsError, VfsResult};

/// Resolves every read from one commit's tree. Writes fail with `ReadOnly`.
#[derive(Clone, Debug)]
pub struct CommitView {
    backend: Arc<GitBackend>,
    commit: Oid,
}

impl CommitView {
    pub fn new(backend: Arc<GitBackend>, commit: Oid) -> Self {
        Self { backend, commit }
    }

    pub fn at_branch_tip(backend: Arc<GitBackend>, branch: &str) -> VfsResult<Self> {
        let commit = backend.branch_tip(branch)?;
        Ok(Self::new(backend, commit))
    }

    pub fn commit(&self) -> Oid {
        self.commit
    }
}

impl Vfs for CommitView {
    fn read(&self, path: &str) -> VfsResult<String> {
        let path = normalize_path(path)?;
        decode_text(&path, self.read_bytes(&path)?)
    }

    fn read_bytes(&self, path: &str) -> VfsResult<Vec<u8>> {
        let path = normalize_path(path)?;
        self.backend
            .read_file(self.commit, &path)?
            .ok_or(VfsError::NotFound { path })
    }

    fn write(&mut self, _path: &str, _contents: &str) -> VfsResult<()> {
        Err(VfsError::ReadOnly)
    }

    fn delete(&mut self, _path: &str) -> VfsResult<()> {
        Err(VfsError::ReadOnly)
    }

    fn exists(&self, path: &str) -> VfsResult<bool> {
        let path = normalize_path(path)?;
        Ok(self.backend.blob_oid_at(self.commit, &path)?.is_some())
    }

    fn list(&self) -> VfsResult<Vec<String>> {
        Ok(self.backend.list_files(self.commit)?)
    }
}
