//! Shared filtering for the grep tools.

use forge_vfs::{is_binary_path, Vfs, WorkInProgress};

use crate::ToolError;

pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    ".git",
    ".forge",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "venv",
];

pub fn excluded(path: &str, exclude_dirs: &[String]) -> bool {
    exclude_dirs.iter().any(|dir| {
        path.starts_with(&format!("{dir}/")) || path.contains(&format!("/{dir}/"))
    })
}

/// Text files to search, honoring the exclusion list.
pub fn searchable_files(
    vfs: &WorkInProgress,
    exclude_dirs: &[String],
) -> Result<Vec<String>, ToolError> {
    Ok(vfs
        .list()?
        .into_iter()
        .filter(|path| !is_binary_path(path))
        .filter(|path| !excluded(path, exclude_dirs))
        .collect())
}

pub fn compile_pattern(pattern: &str) -> Result<regex::Regex, ToolError> {
    regex::Regex::new(pattern)
        .map_err(|err| ToolError::bad_arguments(format!("invalid regex pattern: {err}")))
}

pub fn exclude_dirs_from(args: &serde_json::Value) -> Vec<String> {
    match crate::string_array(args, "exclude_dirs") {
        Ok(dirs) if !dirs.is_empty() => dirs,
        _ => DEFAULT_EXCLUDE_DIRS.iter().map(|s| s.to_string()).collect(),
    }
}
