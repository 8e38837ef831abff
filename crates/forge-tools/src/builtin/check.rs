use serde_json::{json, Value};

use forge_vfs::{is_binary_path, Vfs, WorkInProgress};

use crate::builtin::exec_util::{discover_check_command, run_command, truncate_output};
use crate::context::{SideEffect, ToolContext, ToolOutput};
use crate::{Invocation, Tool, ToolError, ToolExecResult, ToolSchema};

/// Run the project's check command (format/lint/typecheck) against the
/// materialised tree. Formatter edits are written back into the overlay.
pub struct Check;

impl Tool for Check {
    fn name(&self) -> &str {
        "check"
    }

    fn invocation(&self) -> Invocation {
        Invocation::Inline
    }

    fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(300)
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "check".to_string(),
            description: "Run the project's check command (Makefile `check` target, or the \
                          ecosystem default) on your current state. Formatting fixes are \
                          applied back; type and lint errors come back for you to fix."
                .to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    fn execute(
        &self,
        vfs: &mut WorkInProgress,
        _args: &Value,
        ctx: &ToolContext,
    ) -> ToolExecResult {
        let dir = vfs.materialize_to_tempdir()?;
        let (argv, description) = discover_check_command(dir.path())
            .ok_or_else(|| ToolError::failed("no check command discovered for this project"))?;

        let output = run_command(&argv, dir.path(), ctx.exec_timeout)?;
        let modified = write_back_changes(vfs, dir.path())?;
        let passed = output.status == 0;

        let mut result = ToolOutput::value(json!({
            "success": passed,
            "check_command": description.clone(),
            "message": if passed {
                format!("{description} passed")
            } else {
                format!("{description} failed")
            },
            "output": truncate_output(&format!("{}\n{}", output.stdout, output.stderr)),
            "formatted_files": modified.clone(),
        }));
        if !modified.is_empty() {
            result = result.with_effect(SideEffect::FilesModified { paths: modified });
        }
        Ok(result)
    }
}

/// Fold formatter/tool edits in the tempdir back into the overlay. Only text
/// files already known to the VFS are considered; the tempdir is otherwise
/// read-only from the tool's perspective.
pub(crate) fn write_back_changes(
    vfs: &mut WorkInProgress,
    dir: &std::path::Path,
) -> Result<Vec<String>, ToolError> {
    let mut modified = Vec::new();
    for path in vfs.list()? {
        if is_binary_path(&path) {
            continue;
        }
        let on_disk = dir.join(&path);
        let Ok(new_content) = std::fs::read_to_string(&on_disk) else {
            continue;
        };
        let old_content = vfs.read(&path)?;
        if new_content != old_content {
            vfs.write(&path, &new_content)?;
            modified.push(path);
        }
    }
    Ok(modified)
}
