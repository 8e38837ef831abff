use serde_json::{json, Value};

use forge_vfs::WorkInProgress;

use crate::context::{SideEffect, ToolContext, ToolOutput};
use crate::{require_str, Tool, ToolError, ToolExecResult, ToolSchema};

/// Fold a range of tool results into a summary to reclaim context. Result
/// blocks carry `[id N]` markers the model references here.
pub struct Compact;

fn parse_id(args: &Value, key: &str) -> Result<u32, ToolError> {
    if let Some(n) = args.get(key).and_then(Value::as_u64) {
        return u32::try_from(n)
            .map_err(|_| ToolError::bad_arguments(format!("'{key}' out of range")));
    }
    if let Some(raw) = args.get(key).and_then(Value::as_str) {
        return raw
            .trim()
            .parse()
            .map_err(|_| ToolError::bad_arguments(format!("'{key}' must be a numeric id")));
    }
    Err(ToolError::bad_arguments(format!("'{key}' is required")))
}

impl Tool for Compact {
    fn name(&self) -> &str {
        "compact"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "compact".to_string(),
            description: "Replace a range of earlier tool results with a summary to reclaim \
                          context. Reference the [id N] markers shown on results; include \
                          enough detail in the summary to stay oriented."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "from_id": { "type": "string", "description": "First result id (inclusive)" },
                    "to_id": { "type": "string", "description": "Last result id (inclusive)" },
                    "summary": { "type": "string", "description": "What those results amounted to" }
                },
                "required": ["from_id", "to_id", "summary"]
            }),
        }
    }

    fn execute(
        &self,
        _vfs: &mut WorkInProgress,
        args: &Value,
        _ctx: &ToolContext,
    ) -> ToolExecResult {
        let from = parse_id(args, "from_id")?;
        let to = parse_id(args, "to_id")?;
        let summary = require_str(args, "summary")?;
        if summary.trim().is_empty() {
            return Err(ToolError::bad_arguments("'summary' must not be empty"));
        }
        if from > to {
            return Err(ToolError::bad_arguments("'from_id' must not exceed 'to_id'"));
        }
        Ok(ToolOutput::value(json!({
            "success": true,
            "message": format!("compacting results {from}-{to}"),
        }))
        .with_effect(SideEffect::CompactToolResults {
            from,
            to,
            summary: summary.to_string(),
        }))
    }
}
