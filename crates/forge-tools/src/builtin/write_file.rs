use serde_json::{json, Value};

use forge_vfs::{Vfs, WorkInProgress};

use crate::context::{SideEffect, ToolContext, ToolOutput};
use crate::{require_str, Invocation, Tool, ToolExecResult, ToolSchema};

/// Write complete file content, creating or overwriting.
pub struct WriteFile;

impl Tool for WriteFile {
    fn name(&self) -> &str {
        "write_file"
    }

    fn invocation(&self) -> Invocation {
        Invocation::Inline
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "write_file".to_string(),
            description: "Write complete file content. Creates a new file or overwrites an \
                          existing one; use for new files or full rewrites."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "filepath": { "type": "string", "description": "Path to write" },
                    "content": { "type": "string", "description": "Complete file content" }
                },
                "required": ["filepath", "content"]
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
        let content = require_str(args, "content")?;
        vfs.write(filepath, content)?;
        Ok(ToolOutput::value(json!({
            "success": true,
            "message": format!("wrote {} bytes to {filepath}", content.len()),
        }))
        .with_effect(SideEffect::FilesModified {
            paths: vec![filepath.to_string()],
        }))
    }
}
