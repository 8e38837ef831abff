//! Declarative user tools.
//!
//! A user tool is a JSON manifest under `./tools/` in the repository: name,
//! description, a JSON-schema parameter shape, and a fixed argv template run
//! inside a materialised tempdir with the call's arguments appended as one
//! JSON argument. No shell is ever involved, and the tempdir is discarded
//! afterwards, so a user tool can observe the tree but not mutate it.

use serde::Deserialize;
use serde_json::{json, Value};

use forge_vfs::{Vfs, WorkInProgress};

use crate::approval::content_hash;
use crate::builtin::exec_util::{run_command, truncate_output};
use crate::context::{ToolContext, ToolOutput};
use crate::{Tool, ToolError, ToolExecResult, ToolSchema};

pub const USER_TOOLS_DIR: &str = "tools";

#[derive(Clone, Debug, Deserialize)]
pub struct UserToolManifest {
    pub name: String,
    pub description: String,
    #[serde(default = "default_parameters")]
    pub parameters: Value,
    pub command: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_parameters() -> Value {
    json!({ "type": "object", "properties": {} })
}

#[derive(Clone, Debug)]
pub struct UserTool {
    manifest: UserToolManifest,
    source: String,
}

impl UserTool {
    /// Load `tools/<name>.json` through the VFS (committed plus pending
    /// state). Returns `None` when no manifest exists.
    pub fn load(vfs: &WorkInProgress, name: &str) -> Result<Option<UserTool>, ToolError> {
        let path = format!("{USER_TOOLS_DIR}/{name}.json");
        let source = match vfs.read(&path) {
            Ok(source) => source,
            Err(forge_vfs::VfsError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let manifest: UserToolManifest = serde_json::from_str(&source)
            .map_err(|err| ToolError::failed(format!("invalid tool manifest {path}: {err}")))?;
        if manifest.name != name {
            return Err(ToolError::failed(format!(
                "tool manifest {path} declares name '{}'",
                manifest.name
            )));
        }
        if manifest.command.is_empty() {
            return Err(ToolError::failed(format!(
                "tool manifest {path} has an empty command"
            )));
        }
        Ok(Some(UserTool { manifest, source }))
    }

    /// Every manifest name under `tools/`, whether or not it parses.
    pub fn list_names(vfs: &WorkInProgress) -> Result<Vec<String>, ToolError> {
        let prefix = format!("{USER_TOOLS_DIR}/");
        let mut names = Vec::new();
        for path in vfs.list()? {
            if let Some(rest) = path.strip_prefix(&prefix) {
                if let Some(name) = rest.strip_suffix(".json") {
                    if !name.contains('/') {
                        names.push(name.to_string());
                    }
                }
            }
        }
        Ok(names)
    }

    /// The approval currency: hash of the manifest bytes.
    pub fn content_hash(&self) -> String {
        content_hash(&self.source)
    }
}

impl Tool for UserTool {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.manifest.name.clone(),
            description: self.manifest.description.clone(),
            parameters: self.manifest.parameters.clone(),
        }
    }

    fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.manifest.timeout_secs.unwrap_or(300))
    }

    fn execute(
        &self,
        vfs: &mut WorkInProgress,
        args: &Value,
        ctx: &ToolContext,
    ) -> ToolExecResult {
        let dir = vfs.materialize_to_tempdir()?;
        let mut argv = self.manifest.command.clone();
        argv.push(args.to_string());
        let timeout = self
            .manifest
            .timeout_secs
            .map(std::time::Duration::from_secs)
            .unwrap_or(ctx.exec_timeout);

        let output = run_command(&argv, dir.path(), timeout)?;
        Ok(ToolOutput::value(json!({
            "success": output.status == 0,
            "exit_status": output.status,
            "stdout": truncate_output(&output.stdout),
            "stderr": truncate_output(&output.stderr),
        })))
    }
}
