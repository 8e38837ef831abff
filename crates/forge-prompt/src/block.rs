//! Content blocks.

use forge_llm::ToolCallData;

/// Stable identity of a block. Re-appended blocks get fresh ids; an id is
/// never reused, so tests can assert that a "modification" really was a
/// delete-plus-append.
pub type BlockId = u64;

#[derive(Clone, Debug, PartialEq)]
pub enum BlockKind {
    Summary {
        path: String,
    },
    File {
        path: String,
    },
    User {
        index: usize,
    },
    Assistant {
        index: usize,
        tool_calls: Vec<ToolCallData>,
    },
    ToolResult {
        index: usize,
        tool_call_id: String,
        display_id: u32,
        ephemeral: bool,
        expired: bool,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    pub text: String,
}

impl Block {
    pub fn message_index(&self) -> Option<usize> {
        match &self.kind {
            BlockKind::User { index }
            | BlockKind::Assistant { index, .. }
            | BlockKind::ToolResult { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn file_path(&self) -> Option<&str> {
        match &self.kind {
            BlockKind::File { path } => Some(path),
            _ => None,
        }
    }
}
