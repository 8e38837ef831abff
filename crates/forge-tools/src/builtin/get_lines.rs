use serde_json::{json, Value};

use forge_vfs::{Vfs, WorkInProgress};

use crate::context::{SideEffect, ToolContext, ToolOutput};
use crate::{require_str, Tool, ToolError, ToolExecResult, ToolSchema};

/// Peek at lines around a line number. The result is ephemeral: it lives for
/// one turn and then collapses to a placeholder.
pub struct GetLines;

impl Tool for GetLines {
    fn name(&self) -> &str {
        "get_lines"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "get_lines".to_string(),
            description: "Show lines around a line number (for chasing error locations). \
                          EPHEMERAL: the output is replaced by a placeholder after one turn, \
                          so act on it immediately."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "filepath": { "type": "string" },
                    "line": { "type": "integer", "description": "1-indexed target line" },
                    "radius": { "type": "integer", "description": "Lines before and after (default 10)" }
                },
                "required": ["filepath", "line"]
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
        let line = args
            .get("line")
            .and_then(Value::as_u64)
            .filter(|n| *n >= 1)
            .ok_or_else(|| ToolError::bad_arguments("'line' must be a positive integer"))?
            as usize;
        let radius = args.get("radius").and_then(Value::as_u64).unwrap_or(10) as usize;

        let content = vfs.read(filepath)?;
        let lines: Vec<&str> = content.split('\n').collect();
        if line > lines.len() {
            return Err(ToolError::failed(format!(
                "line {line} is beyond end of file ({} lines)",
                lines.len()
            )));
        }

        let start = line.saturating_sub(1).saturating_sub(radius);
        let end = (line + radius).min(lines.len());
        let mut rendered = String::new();
        for (offset, text) in lines[start..end].iter().enumerate() {
            let number = start + offset + 1;
            let marker = if number == line { ">>>" } else { "   " };
            rendered.push_str(&format!("{marker} {number:4} | {text}\n"));
        }

        Ok(ToolOutput::value(json!({
            "success": true,
            "filepath": filepath,
            "range": format!("{}-{end}", start + 1),
            "content": rendered,
        }))
        .with_effect(SideEffect::EphemeralResult))
    }
}
