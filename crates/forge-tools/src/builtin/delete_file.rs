use serde_json::{json, Value};

use forge_vfs::{Vfs, VfsError, WorkInProgress};

use crate::context::{SideEffect, ToolContext, ToolOutput};
use crate::{require_str, Invocation, Tool, ToolError, ToolExecResult, ToolSchema};

/// Delete a file; the tombstone commits with the rest of the turn.
pub struct DeleteFile;

impl Tool for DeleteFile {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn invocation(&self) -> Invocation {
        Invocation::Inline
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "delete_file".to_string(),
            description: "Delete a file. The deletion is committed with the other changes at \
                          the end of the turn."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "filepath": { "type": "string", "description": "Path to delete" }
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
        if !vfs.exists(filepath)? {
            return Err(ToolError::Vfs(VfsError::NotFound {
                path: filepath.to_string(),
            }));
        }
        vfs.delete(filepath)?;
        Ok(ToolOutput::value(json!({
            "success": true,
            "message": format!("deleted {filepath}"),
        }))
        .with_effect(SideEffect::CloseFile {
            path: filepath.to_string(),
        }))
    }
}
