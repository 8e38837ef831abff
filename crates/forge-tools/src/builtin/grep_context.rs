use serde_json::{json, Value};

use forge_vfs::{Vfs, WorkInProgress};

use crate::builtin::grep_util::{compile_pattern, exclude_dirs_from, searchable_files};
use crate::context::{SideEffect, ToolContext, ToolOutput};
use crate::{optional_str, require_str, Tool, ToolExecResult, ToolSchema};

const DEFAULT_MAX_MATCHES: u64 = 10;

/// Peek at matches with surrounding lines, without loading whole files.
/// Results are ephemeral.
pub struct GrepContext;

impl Tool for GrepContext {
    fn name(&self) -> &str {
        "grep_context"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "grep_context".to_string(),
            description: "Search for a regex and show lines around each match WITHOUT adding \
                          files to context. EPHEMERAL: snippets are replaced by a placeholder \
                          after one turn."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string" },
                    "before": { "type": "integer", "description": "Lines before each match (default 3)" },
                    "after": { "type": "integer", "description": "Lines after each match (default 3)" },
                    "file": { "type": "string", "description": "Limit the search to one file" },
                    "max_matches": { "type": "integer", "description": "Cap on returned matches (default 10)" },
                    "exclude_dirs": { "type": "array", "items": { "type": "string" } }
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
        let before = args.get("before").and_then(Value::as_u64).unwrap_or(3) as usize;
        let after = args.get("after").and_then(Value::as_u64).unwrap_or(3) as usize;
        let max_matches = args
            .get("max_matches")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_MATCHES) as usize;

        let files = match optional_str(args, "file") {
            Some(single) => vec![single.to_string()],
            None => searchable_files(vfs, &exclude_dirs_from(args))?,
        };

        let mut snippets = Vec::new();
        let mut total = 0usize;
        'files: for path in files {
            let content = match vfs.read(&path) {
                Ok(content) => content,
                Err(err) if optional_str(args, "file").is_some() => return Err(err.into()),
                Err(_) => continue,
            };
            let lines: Vec<&str> = content.split('\n').collect();
            for (i, line) in lines.iter().enumerate() {
                if !regex.is_match(line) {
                    continue;
                }
                total += 1;
                if snippets.len() >= max_matches {
                    continue 'files;
                }
                let start = i.saturating_sub(before);
                let end = (i + after + 1).min(lines.len());
                let mut snippet = String::new();
                for (offset, text) in lines[start..end].iter().enumerate() {
                    let number = start + offset + 1;
                    let marker = if start + offset == i { ">>>" } else { "   " };
                    snippet.push_str(&format!("{marker} {number:4} | {text}\n"));
                }
                snippets.push(json!({
                    "filepath": path.clone(),
                    "line": i + 1,
                    "snippet": snippet,
                }));
            }
        }

        let shown = snippets.len();
        Ok(ToolOutput::value(json!({
            "success": true,
            "message": format!("{shown} of {total} match(es) shown"),
            "snippets": snippets,
            "total_matches": total,
        }))
        .with_effect(SideEffect::EphemeralResult))
    }
}
