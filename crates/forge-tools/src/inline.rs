//! Inline command channel.
//!
//! Some tools are invoked as pseudo-XML embedded in assistant prose instead
//! of structured calls, which saves a round-trip when the model narrates
//! around an edit. Commands are parsed front-to-back; anything inside a
//! fenced code block is prose, not a command.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

/// A parsed inline command with its byte span in the source text.
#[derive(Clone, Debug, PartialEq)]
pub struct InlineCommand {
    pub tool: String,
    pub args: Value,
    pub start: usize,
    pub end: usize,
}

static EDIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)<edit\s+path="([^"]+)"(?:\s+escape="(html)")?\s*>\s*<search>\n?(.*?)\n?</search>\s*<replace>\n?(.*?)\n?</replace>\s*</edit>"#,
    )
    .expect("static regex")
});

static WRITE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<write\s+path="([^"]+)"\s*>\n?(.*?)\n?</write>"#).expect("static regex")
});

static DELETE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<delete\s+path="([^"]+)"\s*/>"#).expect("static regex"));

static RENAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<rename\s+old="([^"]+)"\s+new="([^"]+)"\s*/>"#).expect("static regex")
});

static CHECK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<check\s*/>").expect("static regex"));

static RUN_TESTS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<run_tests(?:\s+pattern="([^"]*)")?\s*/>"#).expect("static regex")
});

static COMMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<commit\s+message="([^"]+)"\s*/>"#).expect("static regex"));

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*```").expect("static regex"));

/// Byte ranges covered by fenced code blocks. An unclosed fence runs to the
/// end of the text (it is still streaming or malformed; either way its
/// content is not a command).
fn fenced_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut open: Option<usize> = None;
    for fence in FENCE_RE.find_iter(text) {
        match open.take() {
            None => open = Some(fence.start()),
            Some(start) => ranges.push((start, fence.end())),
        }
    }
    if let Some(start) = open {
        ranges.push((start, text.len()));
    }
    ranges
}

fn inside_fence(ranges: &[(usize, usize)], pos: usize) -> bool {
    ranges.iter().any(|(start, end)| pos >= *start && pos < *end)
}

/// Undo the `escape="html"` encoding used when the edited file itself
/// contains the marker syntax.
fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Parse every inline command outside fenced code blocks, in document order.
pub fn parse_inline_commands(text: &str) -> Vec<InlineCommand> {
    let fences = fenced_ranges(text);
    let mut commands = Vec::new();

    for caps in EDIT_RE.captures_iter(text) {
        let whole = caps.get(0).expect("group 0");
        let escape_html = caps.get(2).is_some();
        let mut search = caps[3].to_string();
        let mut replace = caps[4].to_string();
        if escape_html {
            search = unescape_html(&search);
            replace = unescape_html(&replace);
        }
        commands.push(InlineCommand {
            tool: "search_replace".to_string(),
            args: json!({
                "filepath": &caps[1],
                "search": search,
                "replace": replace,
            }),
            start: whole.start(),
            end: whole.end(),
        });
    }
    for caps in WRITE_RE.captures_iter(text) {
        let whole = caps.get(0).expect("group 0");
        commands.push(InlineCommand {
            tool: "write_file".to_string(),
            args: json!({ "filepath": &caps[1], "content": &caps[2] }),
            start: whole.start(),
            end: whole.end(),
        });
    }
    for caps in DELETE_RE.captures_iter(text) {
        let whole = caps.get(0).expect("group 0");
        commands.push(InlineCommand {
            tool: "delete_file".to_string(),
            args: json!({ "filepath": &caps[1] }),
            start: whole.start(),
            end: whole.end(),
        });
    }
    for caps in RENAME_RE.captures_iter(text) {
        let whole = caps.get(0).expect("group 0");
        commands.push(InlineCommand {
            tool: "rename_file".to_string(),
            args: json!({ "old_path": &caps[1], "new_path": &caps[2] }),
            start: whole.start(),
            end: whole.end(),
        });
    }
    for found in CHECK_RE.find_iter(text) {
        commands.push(InlineCommand {
            tool: "check".to_string(),
            args: json!({}),
            start: found.start(),
            end: found.end(),
        });
    }
    for caps in RUN_TESTS_RE.captures_iter(text) {
        let whole = caps.get(0).expect("group 0");
        let mut args = json!({});
        if let Some(pattern) = caps.get(1) {
            args = json!({ "pattern": pattern.as_str() });
        }
        commands.push(InlineCommand {
            tool: "run_tests".to_string(),
            args,
            start: whole.start(),
            end: whole.end(),
        });
    }
    for caps in COMMIT_RE.captures_iter(text) {
        let whole = caps.get(0).expect("group 0");
        commands.push(InlineCommand {
            tool: "commit".to_string(),
            args: json!({ "message": &caps[1] }),
            start: whole.start(),
            end: whole.end(),
        });
    }

    commands.retain(|cmd| !inside_fence(&fences, cmd.start));
    commands.sort_by_key(|cmd| cmd.start);
    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_edit_blocks_in_document_order() {
        let text = "First:\n<edit path=\"a.rs\">\n<search>\nold_a\n</search>\n<replace>\nnew_a\n</replace>\n</edit>\nthen <delete path=\"b.rs\"/> done.";
        let commands = parse_inline_commands(text);
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].tool, "search_replace");
        assert_eq!(commands[0].args["filepath"], "a.rs");
        assert_eq!(commands[0].args["search"], "old_a");
        assert_eq!(commands[0].args["replace"], "new_a");
        assert_eq!(commands[1].tool, "delete_file");
        assert!(commands[0].start < commands[1].start);
    }

    #[test]
    fn commands_inside_fenced_blocks_are_ignored() {
        let text = "Example only:\n```\n<delete path=\"a.rs\"/>\n```\nbut this one is real: <delete path=\"b.rs\"/>";
        let commands = parse_inline_commands(text);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].args["filepath"], "b.rs");
    }

    #[test]
    fn unclosed_fence_swallows_the_rest() {
        let text = "```rust\n<check/>\n";
        assert!(parse_inline_commands(text).is_empty());
    }

    #[test]
    fn html_escape_unescapes_bodies() {
        let text = "<edit path=\"t.xml\" escape=\"html\">\n<search>\n&lt;a&gt; &amp; &lt;b&gt;\n</search>\n<replace>\n&lt;c&gt;\n</replace>\n</edit>";
        let commands = parse_inline_commands(text);
        assert_eq!(commands[0].args["search"], "<a> & <b>");
        assert_eq!(commands[0].args["replace"], "<c>");
    }

    #[test]
    fn parses_self_closing_commands() {
        let text = "<check/> then <run_tests pattern=\"overlay\"/> then <commit message=\"tidy\"/> and <rename old=\"a\" new=\"b\"/>";
        let commands = parse_inline_commands(text);
        let tools: Vec<&str> = commands.iter().map(|c| c.tool.as_str()).collect();
        assert_eq!(tools, vec!["check", "run_tests", "commit", "rename_file"]);
        assert_eq!(commands[1].args["pattern"], "overlay");
        assert_eq!(commands[2].args["message"], "tidy");
    }
}
