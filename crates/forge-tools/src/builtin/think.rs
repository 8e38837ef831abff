use serde_json::{json, Value};

use forge_vfs::WorkInProgress;

use crate::context::{SideEffect, ToolContext, ToolOutput};
use crate::{require_str, Tool, ToolError, ToolExecResult, ToolSchema};

/// Extended-reasoning scratchpad. The scratchpad argument is discarded from
/// the prompt stream after the call; only the conclusion stays in context.
pub struct Think;

impl Tool for Think {
    fn name(&self) -> &str {
        "think"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "think".to_string(),
            description: "Work through a hard problem step by step. The scratchpad is \
                          discarded automatically; only your conclusion is kept. Good for \
                          planning multi-step changes and weighing tradeoffs."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "scratchpad": {
                        "type": "string",
                        "description": "Working space; discarded after the call"
                    },
                    "conclusion": {
                        "type": "string",
                        "description": "The decision or insight worth keeping"
                    }
                },
                "required": ["scratchpad", "conclusion"]
            }),
        }
    }

    fn execute(
        &self,
        _vfs: &mut WorkInProgress,
        args: &Value,
        _ctx: &ToolContext,
    ) -> ToolExecResult {
        let scratchpad = require_str(args, "scratchpad")?;
        let conclusion = require_str(args, "conclusion")?;
        if conclusion.trim().is_empty() {
            return Err(ToolError::bad_arguments("no conclusion provided"));
        }
        Ok(ToolOutput::value(json!({
            "success": true,
            "conclusion": conclusion,
            "message": format!(
                "thought through ~{} words, concluded",
                scratchpad.split_whitespace().count()
            ),
        }))
        .with_effect(SideEffect::CompactThink))
    }
}
