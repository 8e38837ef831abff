use serde_json::{json, Value};

use forge_vfs::WorkInProgress;

use crate::context::{SideEffect, ToolContext, ToolOutput};
use crate::{require_str, Invocation, Tool, ToolError, ToolExecResult, ToolSchema};

/// Close a sub-commit mid-turn, so one turn can leave a sequence of atomic
/// checkpoints instead of a single blob of changes. The executor performs
/// the actual commit so the session record rides along.
pub struct Commit;

impl Tool for Commit {
    fn name(&self) -> &str {
        "commit"
    }

    fn invocation(&self) -> Invocation {
        Invocation::Inline
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "commit".to_string(),
            description: "Commit pending changes now, mid-turn, with a descriptive message. \
                          Use for one atomic commit per logical change; you can keep editing \
                          afterwards."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string", "description": "Commit message" }
                },
                "required": ["message"]
            }),
        }
    }

    fn execute(
        &self,
        vfs: &mut WorkInProgress,
        args: &Value,
        _ctx: &ToolContext,
    ) -> ToolExecResult {
        let message = require_str(args, "message")?.trim();
        if message.is_empty() {
            return Err(ToolError::bad_arguments("'message' must not be empty"));
        }
        if !vfs.has_changes() {
            return Err(ToolError::failed("no pending changes to commit"));
        }
        Ok(ToolOutput::value(json!({
            "success": true,
            "message": format!(
                "committing {} pending change(s)",
                vfs.pending_changes().len()
            ),
        }))
        .with_effect(SideEffect::CommitNow {
            message: message.to_string(),
        }))
    }
}
