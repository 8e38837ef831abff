//! Events emitted to observers. The sole interface between sessions and any
//! UI: observers subscribe and react, they never reach into session
//! internals.

use serde::Serialize;
use serde_json::Value;

use forge_llm::ChatMessage;

use crate::state::SessionState;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    MessageAppended {
        message: ChatMessage,
    },
    /// Streaming assistant text grew.
    Chunk {
        text: String,
    },
    /// A streaming tool call's argument text grew.
    ToolCallDelta {
        index: usize,
        fragment: String,
    },
    ToolCallStarted {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolCallResult {
        id: String,
        name: String,
        result: Value,
        is_error: bool,
    },
    TurnFinished {
        commit: Option<String>,
    },
    StateChanged {
        state: SessionState,
    },
    ApprovalRequired {
        tool: String,
        hash: String,
    },
    ContextUpdated {
        active_files: Vec<String>,
    },
    Error {
        kind: String,
        detail: String,
    },
}
