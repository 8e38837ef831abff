use serde_json::{json, Value};

use forge_llm::{complete, ChatMessage, Request, RequestOptions};
use forge_vfs::{Vfs, WorkInProgress};

use crate::context::{SideEffect, ToolContext, ToolOutput};
use crate::{require_str, string_array, Tool, ToolError, ToolExecResult, ToolSchema};

/// One-shot question over many files, answered by the cheap auxiliary model.
/// Lets the agent examine more files than fit in its own context.
pub struct Scout;

impl Tool for Scout {
    fn name(&self) -> &str {
        "scout"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "scout".to_string(),
            description: "Send many files to a smaller model to answer a question or identify \
                          which files matter. The scout has no memory and no tools; it only \
                          sees the files you pass. EPHEMERAL result."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array", "items": { "type": "string" },
                        "description": "Paths to show the scout"
                    },
                    "question": { "type": "string", "description": "What to ask about them" }
                },
                "required": ["files", "question"]
            }),
        }
    }

    fn execute(
        &self,
        vfs: &mut WorkInProgress,
        args: &Value,
        ctx: &ToolContext,
    ) -> ToolExecResult {
        let files = string_array(args, "files")?;
        let question = require_str(args, "question")?;
        if files.is_empty() {
            return Err(ToolError::bad_arguments("no files specified"));
        }
        let (Some(model), Some(runtime)) = (&ctx.aux_model, &ctx.runtime) else {
            return Err(ToolError::failed("no auxiliary model configured"));
        };

        let mut sections = Vec::new();
        let mut skipped = Vec::new();
        for path in &files {
            match vfs.read(path) {
                Ok(content) => sections.push(format!("=== {path} ===\n{content}")),
                Err(err) => skipped.push(format!("{path}: {err}")),
            }
        }
        if sections.is_empty() {
            return Err(ToolError::failed(format!(
                "could not read any of the requested files: {}",
                skipped.join("; ")
            )));
        }

        let prompt = format!(
            "You are a code analysis assistant. Answer the question from the file contents \
             below. Be specific; reference file names and line numbers.\n\nFILES:\n{}\n\n\
             QUESTION: {question}",
            sections.join("\n\n")
        );
        let request = Request {
            messages: vec![ChatMessage::user(prompt)],
            tools: Vec::new(),
            options: RequestOptions {
                model: ctx.aux_model_name.clone(),
                ..RequestOptions::default()
            },
        };
        let answer = runtime
            .block_on(complete(model.as_ref(), request))
            .map_err(|err| ToolError::failed(format!("scout model failed: {err}")))?;

        Ok(ToolOutput::value(json!({
            "success": true,
            "answer": answer.content,
            "files_examined": sections.len(),
            "file_errors": skipped,
        }))
        .with_effect(SideEffect::EphemeralResult))
    }
}
