use serde_json::{json, Value};

use forge_vfs::{Vfs, WorkInProgress};

use crate::context::{SideEffect, ToolContext, ToolOutput};
use crate::{string_array, Tool, ToolError, ToolExecResult, ToolSchema};

/// Batch add/remove of active files.
pub struct UpdateContext;

impl Tool for UpdateContext {
    fn name(&self) -> &str {
        "update_context"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "update_context".to_string(),
            description: "Add or remove files from active context in one call. Batch your \
                          loads; close files you no longer need, their full content costs \
                          tokens every turn."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "add": {
                        "type": "array", "items": { "type": "string" },
                        "description": "Paths to load into context"
                    },
                    "remove": {
                        "type": "array", "items": { "type": "string" },
                        "description": "Paths to drop from context"
                    }
                }
            }),
        }
    }

    fn execute(
        &self,
        vfs: &mut WorkInProgress,
        args: &Value,
        _ctx: &ToolContext,
    ) -> ToolExecResult {
        let add = string_array(args, "add")?;
        let remove = string_array(args, "remove")?;
        if add.is_empty() && remove.is_empty() {
            return Err(ToolError::bad_arguments("nothing to add or remove"));
        }

        for path in &add {
            if !vfs.exists(path)? {
                return Err(ToolError::Vfs(forge_vfs::VfsError::NotFound {
                    path: path.clone(),
                }));
            }
            if vfs.is_binary(path) {
                return Err(ToolError::Vfs(forge_vfs::VfsError::Binary {
                    path: path.clone(),
                }));
            }
        }

        let mut output = ToolOutput::value(json!({
            "success": true,
            "message": format!("added {} file(s), removed {} file(s)", add.len(), remove.len()),
        }));
        for path in add {
            output = output.with_effect(SideEffect::OpenFile { path });
        }
        for path in remove {
            output = output.with_effect(SideEffect::CloseFile { path });
        }
        Ok(output)
    }
}
