use serde_json::{json, Value};

use forge_vfs::{UndoAction, WorkInProgress};

use crate::context::{SideEffect, ToolContext, ToolOutput};
use crate::{require_str, Tool, ToolExecResult, ToolSchema};

/// Revert one path to its base-commit state, dropping this turn's pending
/// edits to it. Only works before the overlay commits.
pub struct UndoEdit;

impl Tool for UndoEdit {
    fn name(&self) -> &str {
        "undo_edit"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "undo_edit".to_string(),
            description: "Revert a file to its state at the start of the turn, undoing all \
                          pending edits to it. A file created this turn is removed; a file \
                          deleted this turn is restored. Committed changes are out of reach."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "filepath": { "type": "string" }
                },
                "required": ["filepath"]
            }),
        }
    }

    fn execute(
        &self,
        vfs: &mut WorkInProgress,
        args: &Value,
        _ctx: &ToolContext,
    ) -> ToolExecResult {
        let filepath = require_str(args, "filepath")?;
        let action = vfs.undo_path(filepath)?;
        let message = match action {
            UndoAction::Reverted => format!("reverted {filepath} to its base version"),
            UndoAction::Removed => format!("removed {filepath} (created this turn)"),
            UndoAction::Restored => format!("restored deleted file {filepath}"),
        };
        Ok(ToolOutput::value(json!({
            "success": true,
            "message": message,
        }))
        .with_effect(SideEffect::FilesModified {
            paths: vec![filepath.to_string()],
        }))
    }
}
