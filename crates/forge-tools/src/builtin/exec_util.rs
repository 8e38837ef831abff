//! Bounded external command execution for tools that need a real filesystem.
//!
//! Commands run inside a materialised tempdir, never through a shell, and
//! are killed at the deadline. Output is truncated to a fixed budget before
//! it can reach the prompt stream.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::ToolError;

const OUTPUT_BUDGET: usize = 16 * 1024;

#[derive(Debug)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Run `argv` in `cwd` with a deadline. The child is killed on timeout.
pub fn run_command(argv: &[String], cwd: &Path, timeout: Duration) -> Result<CommandOutput, ToolError> {
    let (program, rest) = argv
        .split_first()
        .ok_or_else(|| ToolError::bad_arguments("empty command"))?;

    let mut child = Command::new(program)
        .args(rest)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| ToolError::failed(format!("could not start '{program}': {err}")))?;

    // Drain pipes on threads so a chatty child cannot deadlock against the
    // timeout wait.
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_reader = std::thread::spawn(move || read_all(stdout));
    let err_reader = std::thread::spawn(move || read_all(stderr));

    let status = match child
        .wait_timeout(timeout)
        .map_err(|err| ToolError::failed(format!("waiting for '{program}': {err}")))?
    {
        Some(status) => status.code().unwrap_or(-1),
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ToolError::Timeout {
                seconds: timeout.as_secs(),
            });
        }
    };

    let stdout = out_reader.join().unwrap_or_default();
    let stderr = err_reader.join().unwrap_or_default();
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
    })
}

fn read_all(pipe: Option<impl Read>) -> String {
    let mut buffer = String::new();
    if let Some(mut pipe) = pipe {
        let mut bytes = Vec::new();
        if pipe.read_to_end(&mut bytes).is_ok() {
            buffer = String::from_utf8_lossy(&bytes).into_owned();
        }
    }
    buffer
}

/// Cap tool output at the fixed budget, keeping the head and the tail.
pub fn truncate_output(text: &str) -> String {
    if text.len() <= OUTPUT_BUDGET {
        return text.to_string();
    }
    let head_budget = OUTPUT_BUDGET * 3 / 4;
    let tail_budget = OUTPUT_BUDGET / 4;
    let head_end = floor_char_boundary(text, head_budget);
    let tail_start = floor_char_boundary(text, text.len() - tail_budget);
    format!(
        "{}\n[... {} bytes truncated ...]\n{}",
        &text[..head_end],
        text.len() - head_end - (text.len() - tail_start),
        &text[tail_start..]
    )
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Discover the project's test command: Makefile `test` target first, then
/// ecosystem defaults.
pub fn discover_test_command(dir: &Path) -> Option<(Vec<String>, String)> {
    if makefile_has_target(dir, "test") {
        return Some((command(&["make", "test"]), "make test".into()));
    }
    if dir.join("Cargo.toml").exists() {
        return Some((command(&["cargo", "test"]), "cargo test".into()));
    }
    if has_pytest_markers(dir) {
        return Some((
            command(&["python3", "-m", "pytest"]),
            "pytest".into(),
        ));
    }
    if package_json_has_script(dir, "test") {
        return Some((command(&["npm", "test"]), "npm test".into()));
    }
    if dir.join("go.mod").exists() {
        return Some((command(&["go", "test", "./..."]), "go test".into()));
    }
    None
}

/// Discover the project's check command: Makefile `check` target first, then
/// ecosystem defaults.
pub fn discover_check_command(dir: &Path) -> Option<(Vec<String>, String)> {
    if makefile_has_target(dir, "check") {
        return Some((command(&["make", "check"]), "make check".into()));
    }
    if dir.join("Cargo.toml").exists() {
        return Some((command(&["cargo", "check"]), "cargo check".into()));
    }
    if has_pytest_markers(dir) || dir.join("pyproject.toml").exists() {
        return Some((
            command(&["python3", "-m", "compileall", "-q", "."]),
            "python compileall".into(),
        ));
    }
    if package_json_has_script(dir, "lint") {
        return Some((command(&["npm", "run", "lint"]), "npm run lint".into()));
    }
    None
}

fn command(argv: &[&str]) -> Vec<String> {
    argv.iter().map(|s| s.to_string()).collect()
}

fn makefile_has_target(dir: &Path, target: &str) -> bool {
    let Ok(content) = std::fs::read_to_string(dir.join("Makefile")) else {
        return false;
    };
    let prefix = format!("{target}:");
    content.lines().any(|line| line.starts_with(&prefix))
}

fn has_pytest_markers(dir: &Path) -> bool {
    if dir.join("pytest.ini").exists() || dir.join("conftest.py").exists() {
        return true;
    }
    if let Ok(content) = std::fs::read_to_string(dir.join("pyproject.toml")) {
        if content.contains("[tool.pytest") {
            return true;
        }
    }
    false
}

fn package_json_has_script(dir: &Path, script: &str) -> bool {
    let Ok(content) = std::fs::read_to_string(dir.join("package.json")) else {
        return false;
    };
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&content) else {
        return false;
    };
    parsed
        .get("scripts")
        .and_then(|s| s.get(script))
        .is_some()
}
