use serde_json::{json, Value};

use forge_git::CommitKind;
use forge_vfs::{CommitOptions, Vfs, WorkInProgress};

use crate::context::{SideEffect, ToolContext, ToolOutput, SESSION_FILE};
use crate::{require_str, Tool, ToolError, ToolExecResult, ToolSchema};

/// Fork a child session onto a new branch and start it with an instruction.
/// The child branch gets a committed session record (parent link, empty
/// conversation) before its first turn.
pub struct SpawnSession;

impl Tool for SpawnSession {
    fn name(&self) -> &str {
        "spawn_session"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "spawn_session".to_string(),
            description: "Create a child session on a new branch forked from the current \
                          commit and start it immediately. The child starts fresh with ONLY \
                          your instruction: spell out the files, the problem, the approach \
                          and what done looks like. Check on it later with wait_session."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "branch_name": {
                        "type": "string",
                        "description": "Branch for the child (convention: ai/<task>)"
                    },
                    "instruction": {
                        "type": "string",
                        "description": "Complete, self-contained instruction for the child"
                    }
                },
                "required": ["branch_name", "instruction"]
            }),
        }
    }

    fn execute(
        &self,
        vfs: &mut WorkInProgress,
        args: &Value,
        ctx: &ToolContext,
    ) -> ToolExecResult {
        let branch_name = require_str(args, "branch_name")?;
        let instruction = require_str(args, "instruction")?;
        if branch_name.trim().is_empty() || instruction.trim().is_empty() {
            return Err(ToolError::bad_arguments(
                "branch_name and instruction must be non-empty",
            ));
        }
        if ctx.backend.branch_exists(branch_name)? {
            return Err(ToolError::failed(format!(
                "branch '{branch_name}' already exists"
            )));
        }
        // The parent/child relationship is a forest; refuse a name already in
        // our ancestor chain.
        if ancestor_chain(ctx)?.iter().any(|b| b == branch_name) {
            return Err(ToolError::failed(format!(
                "'{branch_name}' is an ancestor of this session"
            )));
        }

        ctx.backend.create_branch(branch_name, vfs.base_commit())?;

        let record = json!({
            "version": 1,
            "messages": [],
            "active_files": [],
            "parent_branch": ctx.branch,
            "child_branches": [],
            "state": "idle",
            "pending_wait": null,
        });
        let mut child_vfs = WorkInProgress::open(ctx.backend.clone(), branch_name)?;
        child_vfs.claim()?;
        child_vfs.write(SESSION_FILE, &serde_json::to_string_pretty(&record).map_err(
            |err| ToolError::failed(format!("serialising child session record: {err}")),
        )?)?;
        child_vfs.commit(&CommitOptions {
            message: format!("initialize child session: {branch_name}"),
            kind: CommitKind::Prepare,
            author: ctx.author.clone(),
        })?;
        child_vfs.release()?;

        Ok(ToolOutput::value(json!({
            "success": true,
            "branch": branch_name,
            "message": format!(
                "started child session on '{branch_name}'; use wait_session([\"{branch_name}\"]) \
                 to collect its result"
            ),
        }))
        .with_effect(SideEffect::SpawnChild {
            branch: branch_name.to_string(),
            instruction: instruction.to_string(),
        }))
    }
}

/// Branch names from this session upward through parent links, read from the
/// committed session records.
fn ancestor_chain(ctx: &ToolContext) -> Result<Vec<String>, ToolError> {
    let mut chain = vec![ctx.branch.clone()];
    let mut current = ctx.branch.clone();
    // Parent links form a forest; the bound guards against a corrupted chain.
    for _ in 0..64 {
        let Some(parent) = parent_of(ctx, &current)? else {
            break;
        };
        if chain.contains(&parent) {
            break;
        }
        chain.push(parent.clone());
        current = parent;
    }
    Ok(chain)
}

fn parent_of(ctx: &ToolContext, branch: &str) -> Result<Option<String>, ToolError> {
    if !ctx.backend.branch_exists(branch)? {
        return Ok(None);
    }
    let tip = ctx.backend.branch_tip(branch)?;
    let Some(bytes) = ctx.backend.read_file(tip, SESSION_FILE)? else {
        return Ok(None);
    };
    let record: Value = match serde_json::from_slice(&bytes) {
        Ok(record) => record,
        Err(_) => return Ok(None),
    };
    Ok(record
        .get("parent_branch")
        .and_then(Value::as_str)
        .map(str::to_string))
}
