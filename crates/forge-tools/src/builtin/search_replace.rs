use serde_json::{json, Value};

use forge_vfs::{Vfs, WorkInProgress};

use crate::context::{SideEffect, ToolContext, ToolOutput};
use crate::matching::{closest_match, exact_occurrences, find_fuzzy_unique};
use crate::{require_str, Invocation, Tool, ToolError, ToolExecResult, ToolSchema};

/// Search/replace edit with exact-first, whitespace-tolerant-second matching
/// and ambiguity detection. An ambiguous or absent match leaves the overlay
/// untouched.
pub struct SearchReplace;

impl Tool for SearchReplace {
    fn name(&self) -> &str {
        "search_replace"
    }

    fn invocation(&self) -> Invocation {
        Invocation::Inline
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "search_replace".to_string(),
            description: "Edit a file by replacing exact text. Falls back to a \
                          whitespace-tolerant match when the exact text is absent; fails when \
                          the match is ambiguous."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "filepath": { "type": "string" },
                    "search": { "type": "string", "description": "Exact text to find" },
                    "replace": { "type": "string", "description": "Replacement text" }
                },
                "required": ["filepath", "search", "replace"]
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
        let search = require_str(args, "search")?;
        let replace = require_str(args, "replace")?;
        if search.is_empty() {
            return Err(ToolError::bad_arguments("'search' must not be empty"));
        }

        let content = vfs.read(filepath)?;

        match exact_occurrences(&content, search) {
            1 => {
                let updated = content.replacen(search, replace, 1);
                vfs.write(filepath, &updated)?;
                return Ok(modified(filepath, "exact"));
            }
            0 => {}
            count => return Err(ToolError::AmbiguousMatch { count }),
        }

        // No exact hit; try the whitespace-tolerant line-wise match.
        let lines: Vec<&str> = content.split('\n').collect();
        let needle: Vec<&str> = search.trim_end_matches('\n').split('\n').collect();
        match find_fuzzy_unique(&lines, &needle) {
            Ok(Some(idx)) => {
                let mut updated: Vec<&str> = Vec::with_capacity(lines.len());
                updated.extend_from_slice(&lines[..idx]);
                let replacement: Vec<&str> =
                    replace.trim_end_matches('\n').split('\n').collect();
                if !(replacement.len() == 1 && replacement[0].is_empty()) {
                    updated.extend_from_slice(&replacement);
                }
                updated.extend_from_slice(&lines[idx + needle.len()..]);
                vfs.write(filepath, &updated.join("\n"))?;
                Ok(modified(filepath, "whitespace-tolerant"))
            }
            Err(count) => Err(ToolError::AmbiguousMatch { count }),
            Ok(None) => {
                let report = match closest_match(&lines, &needle) {
                    Some((line, _, diff)) => format!(
                        "search text not found in {filepath}; closest match at line {line}:\n{diff}"
                    ),
                    None => format!("search text not found in {filepath}"),
                };
                Err(ToolError::failed(report))
            }
        }
    }
}

fn modified(filepath: &str, mode: &str) -> ToolOutput {
    ToolOutput::value(json!({
        "success": true,
        "message": format!("replaced in {filepath} ({mode} match)"),
    }))
    .with_effect(SideEffect::FilesModified {
        paths: vec![filepath.to_string()],
    })
}
