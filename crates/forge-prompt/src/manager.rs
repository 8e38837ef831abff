//! The append-only stream with deletions.

use std::collections::HashMap;

use forge_llm::{ChatMessage, ToolCallData};

use crate::block::{Block, BlockId, BlockKind};

const EPHEMERAL_PLACEHOLDER: &str =
    "[result expired: this ephemeral output was only available for one turn]";

pub struct PromptManager {
    system: String,
    summaries: Vec<Block>,
    files: Vec<Block>,
    conversation: Vec<Block>,
    next_block_id: BlockId,
    next_display_id: u32,
    /// Display id (small integer the model sees) to real tool_call_id.
    display_map: HashMap<u32, String>,
}

impl PromptManager {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system: system_prompt.into(),
            summaries: Vec::new(),
            files: Vec::new(),
            conversation: Vec::new(),
            next_block_id: 1,
            next_display_id: 1,
            display_map: HashMap::new(),
        }
    }

    fn block(&mut self, kind: BlockKind, text: String) -> Block {
        let id = self.next_block_id;
        self.next_block_id += 1;
        Block { id, kind, text }
    }

    // ---- summaries ---------------------------------------------------------

    /// Add or refresh the summary for `path`. A refresh deletes the old block
    /// and appends at the end of the summary region.
    pub fn add_summary(&mut self, path: &str, text: &str) {
        self.summaries.retain(|b| {
            !matches!(&b.kind, BlockKind::Summary { path: p } if p == path)
        });
        let block = self.block(
            BlockKind::Summary {
                path: path.to_string(),
            },
            format!("[summary] {path}\n{text}"),
        );
        self.summaries.push(block);
    }

    // ---- files -------------------------------------------------------------

    /// Add or refresh the full content of `path` in context.
    ///
    /// When the file already has a block, that block and every file block
    /// after it are deleted and re-appended (the others keeping their
    /// relative order), so the modified file ends up last in the file region
    /// and the prefix up to the earliest unchanged file survives.
    pub fn append_file_content(&mut self, path: &str, contents: &str) {
        if let Some(pos) = self.files.iter().position(|b| b.file_path() == Some(path)) {
            let tail = self.files.split_off(pos);
            let relocated = tail.len() - 1;
            if relocated > 0 {
                tracing::debug!(path, relocated, "relocating file blocks to region tail");
            }
            for old in tail.into_iter().skip(1) {
                let block = self.block(old.kind, old.text);
                self.files.push(block);
            }
        }
        let block = self.block(
            BlockKind::File {
                path: path.to_string(),
            },
            format!(
                "[CONTEXT: full contents of {path}. Informative only, not a question.]\n\n\
                 ```\n{contents}\n```"
            ),
        );
        self.files.push(block);
    }

    pub fn remove_file_content(&mut self, path: &str) {
        self.files.retain(|b| b.file_path() != Some(path));
    }

    /// Paths currently held as full-content blocks, in stream order.
    pub fn active_files(&self) -> Vec<String> {
        self.files
            .iter()
            .filter_map(|b| b.file_path().map(str::to_string))
            .collect()
    }

    // ---- conversation ------------------------------------------------------

    fn delete_message_index(&mut self, index: usize) {
        self.conversation.retain(|b| b.message_index() != Some(index));
    }

    pub fn append_user_message(&mut self, index: usize, text: &str) {
        self.delete_message_index(index);
        let block = self.block(BlockKind::User { index }, text.to_string());
        self.conversation.push(block);
    }

    pub fn append_assistant_message(
        &mut self,
        index: usize,
        text: &str,
        tool_calls: &[ToolCallData],
    ) {
        self.delete_message_index(index);
        let block = self.block(
            BlockKind::Assistant {
                index,
                tool_calls: tool_calls.to_vec(),
            },
            text.to_string(),
        );
        self.conversation.push(block);
    }

    /// Append a tool result and assign it a small display id the model can
    /// reference in `compact` calls. Returns the display id.
    pub fn append_tool_result(
        &mut self,
        index: usize,
        tool_call_id: &str,
        text: &str,
        ephemeral: bool,
    ) -> u32 {
        self.delete_message_index(index);
        let display_id = self.next_display_id;
        self.next_display_id += 1;
        self.display_map
            .insert(display_id, tool_call_id.to_string());
        let block = self.block(
            BlockKind::ToolResult {
                index,
                tool_call_id: tool_call_id.to_string(),
                display_id,
                ephemeral,
                expired: false,
            },
            format!("[id {display_id}] {text}"),
        );
        self.conversation.push(block);
        display_id
    }

    /// Turn boundary: every ephemeral tool result still carrying its payload
    /// is replaced (delete + insert at the same position) by a placeholder,
    /// freeing the payload from the cacheable prefix-extending region.
    pub fn begin_turn(&mut self) {
        for slot in &mut self.conversation {
            if let BlockKind::ToolResult {
                index,
                tool_call_id,
                display_id,
                ephemeral: true,
                expired: false,
            } = &slot.kind
            {
                let replacement_kind = BlockKind::ToolResult {
                    index: *index,
                    tool_call_id: tool_call_id.clone(),
                    display_id: *display_id,
                    ephemeral: true,
                    expired: true,
                };
                let text = format!("[id {display_id}] {EPHEMERAL_PLACEHOLDER}");
                let id = self.next_block_id;
                self.next_block_id += 1;
                *slot = Block {
                    id,
                    kind: replacement_kind,
                    text,
                };
            }
        }
    }

    // ---- compaction --------------------------------------------------------

    /// Replace the tool-result blocks whose display ids fall in
    /// `from..=to` with one summary block. Returns how many blocks were
    /// folded and which requested ids were not found.
    pub fn compact_tool_results(
        &mut self,
        from: u32,
        to: u32,
        summary: &str,
    ) -> (usize, Vec<u32>) {
        let wanted: Vec<u32> = (from..=to).collect();
        let present: Vec<u32> = self
            .conversation
            .iter()
            .filter_map(|b| match &b.kind {
                BlockKind::ToolResult { display_id, .. } if wanted.contains(display_id) => {
                    Some(*display_id)
                }
                _ => None,
            })
            .collect();
        let missing: Vec<u32> = wanted
            .iter()
            .copied()
            .filter(|id| !present.contains(id))
            .collect();
        if present.is_empty() {
            return (0, missing);
        }

        let mut replaced = false;
        let mut compacted = 0usize;
        let mut kept = Vec::with_capacity(self.conversation.len());
        let mut next_id = self.next_block_id;
        for b in self.conversation.drain(..) {
            let in_range = matches!(
                &b.kind,
                BlockKind::ToolResult { display_id, .. } if wanted.contains(display_id)
            );
            if !in_range {
                kept.push(b);
                continue;
            }
            compacted += 1;
            if !replaced {
                replaced = true;
                let kind = b.kind.clone();
                kept.push(Block {
                    id: next_id,
                    kind,
                    text: format!("[compacted ids {from}-{to}] {summary}"),
                });
                next_id += 1;
            }
        }
        self.next_block_id = next_id;
        self.conversation = kept;
        (compacted, missing)
    }

    /// Discard a `think` call's scratchpad: rewrite the recorded call's
    /// arguments to a stub so only the conclusion (in the tool result)
    /// remains in context.
    pub fn compact_think_call(&mut self, tool_call_id: &str) -> bool {
        for slot in &mut self.conversation {
            if let BlockKind::Assistant { tool_calls, .. } = &mut slot.kind {
                for call in tool_calls {
                    if call.id == tool_call_id && call.name == "think" {
                        call.arguments = "{\"_compacted\":true}".to_string();
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn resolve_display_id(&self, display_id: u32) -> Option<&str> {
        self.display_map.get(&display_id).map(String::as_str)
    }

    pub fn clear_conversation(&mut self) {
        self.conversation.clear();
        self.next_display_id = 1;
        self.display_map.clear();
    }

    // ---- render ------------------------------------------------------------

    /// Flatten to API messages: system, summaries, files, conversation. The
    /// final message carries the cache boundary.
    pub fn render(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(
            1 + self.summaries.len() + self.files.len() + self.conversation.len(),
        );
        messages.push(ChatMessage::system(self.system.clone()));
        for block in self.summaries.iter().chain(&self.files) {
            messages.push(ChatMessage::user(block.text.clone()));
        }
        for block in &self.conversation {
            let message = match &block.kind {
                BlockKind::User { .. } => ChatMessage::user(block.text.clone()),
                BlockKind::Assistant { tool_calls, .. } => {
                    ChatMessage::assistant_with_calls(block.text.clone(), tool_calls.clone())
                }
                BlockKind::ToolResult { tool_call_id, .. } => {
                    ChatMessage::tool_result(tool_call_id.clone(), block.text.clone())
                }
                BlockKind::Summary { .. } | BlockKind::File { .. } => unreachable!(),
            };
            messages.push(message);
        }
        if let Some(last) = messages.last_mut() {
            last.cache_boundary = true;
        }
        messages
    }

    /// Block ids in stream order, for prefix-stability assertions.
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.summaries
            .iter()
            .chain(&self.files)
            .chain(&self.conversation)
            .map(|b| b.id)
            .collect()
    }

    /// File blocks as (path, block id) pairs in region order.
    pub fn file_blocks(&self) -> Vec<(String, BlockId)> {
        self.files
            .iter()
            .filter_map(|b| b.file_path().map(|p| (p.to_string(), b.id)))
            .collect()
    }
}
