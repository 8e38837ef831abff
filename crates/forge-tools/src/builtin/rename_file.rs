use serde_json::{json, Value};

use forge_vfs::{Vfs, WorkInProgress};

use crate::context::{SideEffect, ToolContext, ToolOutput};
use crate::{require_str, Invocation, Tool, ToolError, ToolExecResult, ToolSchema};

/// Move a file: read, write to the new path, delete the old.
pub struct RenameFile;

impl Tool for RenameFile {
    fn name(&self) -> &str {
        "rename_file"
    }

    fn invocation(&self) -> Invocation {
        Invocation::Inline
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "rename_file".to_string(),
            description: "Rename or move a file.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "old_path": { "type": "string" },
                    "new_path": { "type": "string" }
                },
                "required": ["old_path", "new_path"]
            }),
        }
    }

    fn execute(
        &self,
        vfs: &mut WorkInProgress,
        args: &Value,
        _ctx: &ToolContext,
    ) -> ToolExecResult {
        let old_path = require_str(args, "old_path")?;
        let new_path = require_str(args, "new_path")?;

        if vfs.exists(new_path)? {
            return Err(ToolError::failed(format!(
                "destination already exists: {new_path}"
            )));
        }
        let content = vfs.read(old_path)?;
        vfs.write(new_path, &content)?;
        vfs.delete(old_path)?;

        Ok(ToolOutput::value(json!({
            "success": true,
            "message": format!("renamed {old_path} -> {new_path}"),
        }))
        .with_effect(SideEffect::CloseFile {
            path: old_path.to_string(),
        })
        .with_effect(SideEffect::FilesModified {
            paths: vec![new_path.to_string()],
        }))
    }
}
