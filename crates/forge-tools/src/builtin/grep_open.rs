use serde_json::{json, Value};

use forge_vfs::{Vfs, WorkInProgress};

use crate::builtin::grep_util::{compile_pattern, exclude_dirs_from, searchable_files};
use crate::context::{SideEffect, ToolContext, ToolOutput};
use crate::{require_str, Tool, ToolExecResult, ToolSchema};

/// Search all text files and pull every matching file into active context.
/// The discovery step before changing call sites.
pub struct GrepOpen;

impl Tool for GrepOpen {
    fn name(&self) -> &str {
        "grep_open"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "grep_open".to_string(),
            description: "Search every file for a regex and add all matching files to active \
                          context. Use to find call sites or usages before editing."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Regex to search for" },
                    "exclude_dirs": {
                        "type": "array", "items": { "type": "string" },
                        "description": "Directory names to skip (defaults to VCS/vendor dirs)"
                    }
                },
                "required": ["pattern"]
            }),
        }
    }

    fn execute(
        &self,
        vfs: &mut WorkInProgress,
        args: &Value,
        _ctx: &ToolContext,
    ) -> ToolExecResult {
        let pattern = require_str(args, "pattern")?;
        let regex = compile_pattern(pattern)?;
        let exclude_dirs = exclude_dirs_from(args);

        let mut matches = Vec::new();
        let mut output = ToolOutput::default();
        for path in searchable_files(vfs, &exclude_dirs)? {
            let Ok(content) = vfs.read(&path) else {
                continue;
            };
            let count = regex.find_iter(&content).count();
            if count > 0 {
                matches.push(json!({ "filepath": path.clone(), "match_count": count }));
                output.effects.push(SideEffect::OpenFile { path });
            }
        }

        output.value = json!({
            "success": true,
            "message": format!("{} file(s) match '{pattern}'", matches.len()),
            "matches": matches,
        });
        Ok(output)
    }
}
