//! Tool discovery and schema enumeration.

use std::sync::Arc;

use indexmap::IndexMap;

use forge_vfs::WorkInProgress;

use crate::approval::ApprovalStore;
use crate::builtin;
use crate::user::UserTool;
use crate::{Invocation, Tool, ToolError, ToolSchema};

/// What a tool name resolved to.
pub enum ToolResolution {
    Builtin(Arc<dyn Tool>),
    /// A user tool; approval is the executor's problem.
    User(UserTool),
    Unknown,
}

pub struct ToolRegistry {
    builtins: IndexMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Registry with the full built-in set.
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            builtins: IndexMap::new(),
        };
        for tool in builtin::all() {
            registry.register(tool);
        }
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.builtins.insert(tool.name().to_string(), tool);
    }

    pub fn builtin(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.builtins.get(name).cloned()
    }

    /// Resolve a tool name: built-ins shadow user tools.
    pub fn resolve(&self, name: &str, vfs: &WorkInProgress) -> Result<ToolResolution, ToolError> {
        if let Some(tool) = self.builtins.get(name) {
            return Ok(ToolResolution::Builtin(Arc::clone(tool)));
        }
        match UserTool::load(vfs, name)? {
            Some(tool) => Ok(ToolResolution::User(tool)),
            None => Ok(ToolResolution::Unknown),
        }
    }

    /// Schemas for the structured tool-call channel: API built-ins plus
    /// approved user tools. Inline tools are reached through prose, not the
    /// protocol, so they are not advertised here.
    pub fn api_schemas(
        &self,
        vfs: &WorkInProgress,
        approvals: &ApprovalStore,
    ) -> Result<Vec<ToolSchema>, ToolError> {
        let mut schemas: Vec<ToolSchema> = self
            .builtins
            .values()
            .filter(|tool| tool.invocation() == Invocation::Api)
            .map(|tool| tool.schema())
            .collect();

        for name in UserTool::list_names(vfs)? {
            if self.builtins.contains_key(&name) {
                continue;
            }
            let Some(tool) = UserTool::load(vfs, &name)? else {
                continue;
            };
            if approvals.is_approved(&name, &tool.content_hash()) {
                schemas.push(tool.schema());
            }
        }
        Ok(schemas)
    }

    /// User tools currently lacking a valid approval, for the host's
    /// approval surface: (name, hash, is_new).
    pub fn unapproved_user_tools(
        &self,
        vfs: &WorkInProgress,
        approvals: &ApprovalStore,
    ) -> Result<Vec<(String, String, bool)>, ToolError> {
        let mut out = Vec::new();
        for name in UserTool::list_names(vfs)? {
            let Some(tool) = UserTool::load(vfs, &name)? else {
                continue;
            };
            let hash = tool.content_hash();
            if !approvals.is_approved(&name, &hash) {
                let is_new = approvals.approved_hash(&name).is_none();
                out.push((name, hash, is_new));
            }
        }
        Ok(out)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
