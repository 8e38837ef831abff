//! Hash-based tool approval, persisted at `.forge/approved_tools.json`.
//!
//! Repository-level and untracked: an approval covers the tool's exact
//! source bytes, so any edit demands re-approval. Writes go to a sibling
//! temp file and rename into place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const APPROVED_TOOLS_FILE: &str = ".forge/approved_tools.json";

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval store i/o failure at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("approval store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct ApprovalStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl ApprovalStore {
    /// Load the store under the repository workdir, starting empty when the
    /// file does not exist yet.
    pub fn load(repo_workdir: impl AsRef<Path>) -> Result<Self, ApprovalError> {
        let path = repo_workdir.as_ref().join(APPROVED_TOOLS_FILE);
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(ApprovalError::Io { path, source }),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_approved(&self, tool: &str, content_hash: &str) -> bool {
        self.lock().get(tool).map(String::as_str) == Some(content_hash)
    }

    pub fn approved_hash(&self, tool: &str) -> Option<String> {
        self.lock().get(tool).cloned()
    }

    /// Record an approval and persist atomically.
    pub fn approve(&self, tool: &str, content_hash: &str) -> Result<(), ApprovalError> {
        let snapshot = {
            let mut entries = self.lock();
            entries.insert(tool.to_string(), content_hash.to_string());
            entries.clone()
        };
        self.persist(&snapshot)
    }

    /// Drop an approval (rejection or tool removal) and persist.
    pub fn reject(&self, tool: &str) -> Result<(), ApprovalError> {
        let snapshot = {
            let mut entries = self.lock();
            entries.remove(tool);
            entries.clone()
        };
        self.persist(&snapshot)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), ApprovalError> {
        let io_err = |path: &Path, source| ApprovalError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let body = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}

/// SHA-256 of tool source bytes, hex-encoded. The approval currency.
pub fn content_hash(source: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(source.as_bytes()))
}
