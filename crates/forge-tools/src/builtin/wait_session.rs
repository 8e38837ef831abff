use serde_json::{json, Value};

use forge_vfs::WorkInProgress;

use crate::context::{SessionView, SideEffect, ToolContext, ToolOutput, SESSION_FILE};
use crate::{string_array, Tool, ToolError, ToolExecResult, ToolSchema};

/// Wait until one of the named child sessions reaches a stopping point. If a
/// child is already ready the call returns immediately; otherwise the turn
/// suspends until the registry wakes it.
pub struct WaitSession;

impl Tool for WaitSession {
    fn name(&self) -> &str {
        "wait_session"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "wait_session".to_string(),
            description: "Wait for one of the listed child sessions to finish or ask a \
                          question. Returns immediately when a child is already ready; \
                          otherwise this session suspends until one is. The returned message \
                          is the child's result."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "branches": {
                        "type": "array", "items": { "type": "string" },
                        "description": "Child branch names to wait on; any one being ready resolves the wait"
                    }
                },
                "required": ["branches"]
            }),
        }
    }

    fn execute(
        &self,
        _vfs: &mut WorkInProgress,
        args: &Value,
        ctx: &ToolContext,
    ) -> ToolExecResult {
        let branches = string_array(args, "branches")?;
        if branches.is_empty() {
            return Err(ToolError::bad_arguments("at least one branch is required"));
        }

        let mut running = Vec::new();
        for branch in &branches {
            if !ctx.backend.branch_exists(branch)? {
                return Err(ToolError::failed(format!("branch '{branch}' does not exist")));
            }
            let view = session_view(ctx, branch)?.ok_or_else(|| {
                ToolError::failed(format!("branch '{branch}' is not a session"))
            })?;
            if view.parent_branch.as_deref() != Some(ctx.branch.as_str()) {
                return Err(ToolError::failed(format!(
                    "branch '{branch}' is not a child of this session"
                )));
            }

            if view.is_ready() {
                let merge_clean = ctx.backend.merge_probe_clean(
                    ctx.backend.branch_tip(&ctx.branch)?,
                    ctx.backend.branch_tip(branch)?,
                    &[SESSION_FILE],
                )?;
                return Ok(ToolOutput::value(json!({
                    "success": true,
                    "ready": true,
                    "branch": branch,
                    "state": view.state,
                    "message": view
                        .yield_message
                        .unwrap_or_else(|| "task completed".to_string()),
                    "last_response": view.last_assistant,
                    "merge_clean": merge_clean,
                })));
            }
            running.push(branch.clone());
        }

        Ok(ToolOutput::value(json!({
            "success": true,
            "ready": false,
            "waiting_on": running,
            "message": "all child sessions still running; this session will suspend",
        }))
        .with_effect(SideEffect::WaitChildren { branches }))
    }
}

/// Live registry state when the child is loaded, committed record otherwise.
fn session_view(ctx: &ToolContext, branch: &str) -> Result<Option<SessionView>, ToolError> {
    if let Some(sessions) = &ctx.sessions {
        if let Some(view) = sessions.session_view(branch) {
            return Ok(Some(view));
        }
    }
    let tip = ctx.backend.branch_tip(branch)?;
    let Some(bytes) = ctx.backend.read_file(tip, SESSION_FILE)? else {
        return Ok(None);
    };
    let record: Value = match serde_json::from_slice(&bytes) {
        Ok(record) => record,
        Err(_) => return Ok(None),
    };
    Ok(Some(SessionView {
        state: record
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or("idle")
            .to_string(),
        parent_branch: record
            .get("parent_branch")
            .and_then(Value::as_str)
            .map(str::to_string),
        yield_message: record
            .get("pending_wait")
            .and_then(|w| w.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string),
        last_assistant: record
            .get("messages")
            .and_then(Value::as_array)
            .and_then(|messages| {
                messages.iter().rev().find_map(|m| {
                    (m.get("role").and_then(Value::as_str) == Some("assistant"))
                        .then(|| m.get("content").and_then(Value::as_str))
                        .flatten()
                        .map(str::to_string)
                })
            }),
    }))
}
