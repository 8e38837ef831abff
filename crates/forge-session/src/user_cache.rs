//! Untracked per-user state, keyed by repository path: per-branch open-files
//! hints and the last-opened branch. Pure convenience for hosts; nothing in
//! here is authoritative.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchHints {
    #[serde(default)]
    pub open_files: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct RepoState {
    #[serde(default)]
    last_branch: Option<String>,
    #[serde(default)]
    branches: BTreeMap<String, BranchHints>,
}

#[derive(Clone, Debug)]
pub struct UserStateCache {
    file: PathBuf,
}

impl UserStateCache {
    /// Cache under the user's cache directory, keyed by the canonical
    /// repository path.
    pub fn open_default(repo_path: &Path) -> Option<Self> {
        dirs::cache_dir().map(|base| Self::open_at(base.join("forge").join("state"), repo_path))
    }

    /// Cache rooted at an explicit directory (tests, custom hosts).
    pub fn open_at(root: impl Into<PathBuf>, repo_path: &Path) -> Self {
        let canonical = repo_path
            .canonicalize()
            .unwrap_or_else(|_| repo_path.to_path_buf());
        let key = hex::encode(Sha256::digest(canonical.to_string_lossy().as_bytes()));
        Self {
            file: root.into().join(format!("{key}.json")),
        }
    }

    fn read(&self) -> RepoState {
        std::fs::read_to_string(&self.file)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn write(&self, state: &RepoState) {
        let Some(parent) = self.file.parent() else {
            return;
        };
        if std::fs::create_dir_all(parent).is_err() {
            return;
        }
        match serde_json::to_string_pretty(state) {
            Ok(body) => {
                if let Err(err) = std::fs::write(&self.file, body) {
                    tracing::warn!(file = ?self.file, %err, "user state write failed");
                }
            }
            Err(err) => tracing::warn!(%err, "user state serialise failed"),
        }
    }

    pub fn last_branch(&self) -> Option<String> {
        self.read().last_branch
    }

    pub fn set_last_branch(&self, branch: &str) {
        let mut state = self.read();
        state.last_branch = Some(branch.to_string());
        self.write(&state);
    }

    pub fn branch_hints(&self, branch: &str) -> BranchHints {
        self.read().branches.get(branch).cloned().unwrap_or_default()
    }

    pub fn set_branch_hints(&self, branch: &str, hints: BranchHints) {
        let mut state = self.read();
        state.branches.insert(branch.to_string(), hints);
        self.write(&state);
    }
}
