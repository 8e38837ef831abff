//! Explicitly constructed settings, threaded through construction. There is
//! no process-wide settings singleton.

use std::time::Duration;

use forge_git::Author;

#[derive(Clone, Debug)]
pub struct Settings {
    pub author: Author,
    /// Model name passed to the streaming client.
    pub model: String,
    /// Model name for auxiliary one-shot calls (commit messages, summaries,
    /// scout) when an auxiliary client is configured.
    pub aux_model: String,
    pub system_prompt: String,
    /// Stream re-open budget per turn for retryable transport errors.
    pub max_stream_retries: usize,
    /// Deadline for plain tool invocations.
    pub tool_timeout: Duration,
    /// Deadline for tools that run external commands.
    pub exec_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            author: Author::default(),
            model: "default".to_string(),
            aux_model: "aux".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_stream_retries: 3,
            tool_timeout: Duration::from_secs(30),
            exec_timeout: Duration::from_secs(300),
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a coding agent working inside a git-backed virtual filesystem. Every \
file you write, edit or delete lands in a pending overlay that commits \
atomically when your turn ends; nothing touches the user's working tree. \
Repository summaries and the full content of your active files appear above \
the conversation. Use update_context to open and close files, grep_open to \
find call sites, and commit to cut an atomic checkpoint mid-turn. Prefer \
search_replace for surgical edits and write_file for whole files. Tool \
results marked ephemeral disappear after one turn, so act on them \
immediately.";
