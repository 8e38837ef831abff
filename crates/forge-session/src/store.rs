//! The persisted session record.
//!
//! One JSON file per branch, tracked in git, written into every turn commit.
//! Parsing is forward-compatible (unknown fields are ignored); a record from
//! a newer major version is refused rather than silently mangled.

use serde::{Deserialize, Serialize};

use forge_git::{GitBackend, Oid};
use forge_llm::ChatMessage;
use forge_vfs::{Vfs, WorkInProgress};

use crate::state::SessionState;
use crate::{SessionError, SessionResult};

pub use forge_tools::context::SESSION_FILE;

/// Archived records of branches merged away live here on the destination.
pub const MERGED_DIR: &str = ".forge/merged";

pub const SESSION_VERSION: u32 = 1;

fn default_version() -> u32 {
    SESSION_VERSION
}

fn default_state() -> SessionState {
    SessionState::Idle
}

/// Recorded while a session is blocked on children, so a restart can pick the
/// wait back up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingWait {
    pub branches: Vec<String>,
    /// The suspended `wait_session` call; its result is delivered under this
    /// id when the wait resolves.
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub active_files: Vec<String>,
    #[serde(default)]
    pub parent_branch: Option<String>,
    #[serde(default)]
    pub child_branches: Vec<String>,
    #[serde(default = "default_state")]
    pub state: SessionState,
    #[serde(default)]
    pub pending_wait: Option<PendingWait>,
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self {
            version: SESSION_VERSION,
            messages: Vec::new(),
            active_files: Vec::new(),
            parent_branch: None,
            child_branches: Vec::new(),
            state: SessionState::Idle,
            pending_wait: None,
        }
    }
}

impl SessionRecord {
    /// Parse the record stored in `commit`, or `None` when the branch has no
    /// session.
    pub fn load_at(backend: &GitBackend, commit: Oid) -> SessionResult<Option<Self>> {
        let Some(bytes) = backend.read_file(commit, SESSION_FILE)? else {
            return Ok(None);
        };
        let record: SessionRecord = serde_json::from_slice(&bytes)?;
        if record.version > SESSION_VERSION {
            return Err(SessionError::UnsupportedVersion {
                found: record.version,
                supported: SESSION_VERSION,
            });
        }
        Ok(Some(record))
    }

    pub fn to_json(&self) -> SessionResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Serialise into the overlay so the record rides in the next commit.
    pub fn write_into(&self, vfs: &mut WorkInProgress) -> SessionResult<()> {
        vfs.write(SESSION_FILE, &self.to_json()?)?;
        Ok(())
    }

    pub fn last_assistant_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == forge_llm::Role::Assistant && !m.content.is_empty())
            .map(|m| m.content.clone())
    }
}

/// Where a merged-away branch's record is archived on the destination.
/// Session-file conflicts on merge resolve by archiving the source branch's
/// record here and keeping the destination's; policy over recovery, never
/// interactive.
pub fn archive_path(branch: &str) -> String {
    format!("{MERGED_DIR}/{branch}.json")
}
