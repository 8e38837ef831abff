mod common;

use std::time::Duration;

use anyhow::Result;
use common::*;
use serde_json::json;

use forge_git::{parse_commit_kind, Author, CommitKind};
use forge_llm::{LlmError, Role, StopReason, StreamEvent};
use forge_session::{SessionEvent, SessionState, SESSION_FILE};
use forge_vfs::{CommitOptions, Vfs, WorkInProgress};

type Script = Vec<Result<StreamEvent, LlmError>>;

fn multi_edit_script() -> Script {
    let mut events = vec![text("Applying the edits.")];
    events.extend(tool_call(
        0,
        "call_1",
        "write_file",
        json!({ "filepath": "a.txt", "content": "x\n" }),
    ));
    events.extend(tool_call(
        1,
        "call_2",
        "delete_file",
        json!({ "filepath": "b.txt" }),
    ));
    events.extend(tool_call(
        2,
        "call_3",
        "write_file",
        json!({ "filepath": "c.txt", "content": "3\n" }),
    ));
    events.push(stop(StopReason::ToolUse));
    script(events)
}

fn add_user_tool(harness: &Harness) -> Result<()> {
    let mut vfs = WorkInProgress::open(harness.backend.clone(), "main")?;
    vfs.claim()?;
    vfs.write(
        "tools/noop.json",
        &json!({
            "name": "noop",
            "description": "does nothing",
            "command": ["true"],
        })
        .to_string(),
    )?;
    vfs.commit(&CommitOptions {
        message: "add user tool".to_string(),
        kind: CommitKind::Major,
        author: Author::default(),
    })?;
    vfs.release()?;
    Ok(())
}

async fn wait_for_approval_request(
    rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
) -> String {
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            if let SessionEvent::ApprovalRequired { tool, .. } = rx.recv().await.expect("events") {
                return tool;
            }
        }
    })
    .await
    .expect("approval requested")
}

#[tokio::test(flavor = "multi_thread")]
async fn atomic_multi_file_edit_turn() -> Result<()> {
    let harness = Harness::new(&[("a.txt", "1\n"), ("b.txt", "2\n")])?;
    let base = harness.tip("main");

    harness.client.push_script(multi_edit_script());
    harness
        .client
        .push_script(script(vec![text("All done."), stop(StopReason::EndTurn)]));

    let session = harness.registry.load("main")?;
    let mut rx = session.subscribe();
    harness.registry.send_message("main", "swap the files around")?;
    let commit = wait_turn(&mut rx).await.expect("commit produced");

    // Exactly one commit, parented on the pre-turn tip.
    let tip = harness.tip("main");
    assert_eq!(tip.to_string(), commit);
    let info = harness.backend.read_commit(tip)?;
    assert_eq!(info.parents, vec![base]);

    // The tree holds the code changes and the updated session record.
    assert_eq!(harness.file_at_tip("main", "a.txt").as_deref(), Some("x\n"));
    assert_eq!(harness.file_at_tip("main", "c.txt").as_deref(), Some("3\n"));
    assert!(harness.file_at_tip("main", "b.txt").is_none());

    let record = harness.record_at_tip("main");
    assert_eq!(record.state, SessionState::Idle);
    assert!(record
        .messages
        .iter()
        .any(|m| m.role == Role::User && m.content.contains("swap the files")));
    assert!(record.messages.iter().any(|m| m.role == Role::Tool));

    assert_eq!(session.state(), SessionState::Idle);
    // No auxiliary model is configured, so the local fallback names the edit.
    assert!(info.message.starts_with("edit: "), "got {:?}", info.message);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn ambiguous_search_replace_leaves_tree_untouched() -> Result<()> {
    let harness = Harness::new(&[("f.py", "foo\nbar foo\nbaz foo\n")])?;

    let mut events = Vec::new();
    events.extend(tool_call(
        0,
        "call_1",
        "search_replace",
        json!({ "filepath": "f.py", "search": "foo", "replace": "qux" }),
    ));
    events.push(stop(StopReason::ToolUse));
    harness.client.push_script(script(events));
    harness.client.push_script(script(vec![
        text("I need to disambiguate."),
        stop(StopReason::EndTurn),
    ]));

    let session = harness.registry.load("main")?;
    let mut rx = session.subscribe();
    harness.registry.send_message("main", "rename foo")?;
    wait_turn(&mut rx).await.expect("commit");

    assert_eq!(
        harness.file_at_tip("main", "f.py").as_deref(),
        Some("foo\nbar foo\nbaz foo\n")
    );
    let record = harness.record_at_tip("main");
    let tool_result = record
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("tool result");
    assert!(tool_result.content.contains("AmbiguousMatch"));
    assert!(tool_result.content.contains("3 occurrences"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn inline_edit_commands_execute_from_prose() -> Result<()> {
    let harness = Harness::new(&[("lib.rs", "fn old_name() {}\n")])?;

    let prose = "Renaming the function now.\n\
        <edit path=\"lib.rs\">\n<search>\nfn old_name() {}\n</search>\n\
        <replace>\nfn new_name() {}\n</replace>\n</edit>\n\
        And an example that must NOT run:\n```\n<delete path=\"lib.rs\"/>\n```\n";
    harness
        .client
        .push_script(script(vec![text(prose), stop(StopReason::EndTurn)]));
    harness
        .client
        .push_script(script(vec![text("Renamed."), stop(StopReason::EndTurn)]));

    let session = harness.registry.load("main")?;
    let mut rx = session.subscribe();
    harness.registry.send_message("main", "rename old_name")?;
    wait_turn(&mut rx).await.expect("commit");

    assert_eq!(
        harness.file_at_tip("main", "lib.rs").as_deref(),
        Some("fn new_name() {}\n")
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn transport_errors_retry_within_budget() -> Result<()> {
    let harness = Harness::new(&[("a.txt", "1\n")])?;

    harness
        .client
        .push_script(vec![Err(LlmError::unavailable("503"))]);
    harness
        .client
        .push_script(vec![Err(LlmError::unavailable("503 again"))]);
    harness
        .client
        .push_script(script(vec![text("Recovered."), stop(StopReason::EndTurn)]));

    let session = harness.registry.load("main")?;
    let mut rx = session.subscribe();
    harness.registry.send_message("main", "hello")?;
    wait_turn(&mut rx).await.expect("commit");

    let record = harness.record_at_tip("main");
    let notes = record
        .messages
        .iter()
        .filter(|m| m.role == Role::User && m.content.starts_with("[transport error"))
        .count();
    assert_eq!(notes, 2);
    assert_eq!(session.state(), SessionState::Idle);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn non_retriable_model_error_fails_the_turn() -> Result<()> {
    let harness = Harness::new(&[("a.txt", "1\n")])?;
    let base = harness.tip("main");

    harness.client.push_script(vec![Err(LlmError::AuthFailure {
        message: "bad key".to_string(),
    })]);

    let session = harness.registry.load("main")?;
    let mut rx = session.subscribe();
    harness.registry.send_message("main", "hello")?;
    let kind = wait_error(&mut rx).await;

    assert_eq!(kind, "AuthFailure");
    assert_eq!(session.state(), SessionState::Error);
    assert_eq!(harness.tip("main"), base, "no commit on a failed turn");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_budget_exhaustion_errors_with_model_unavailable() -> Result<()> {
    let harness = Harness::new(&[("a.txt", "1\n")])?;

    for _ in 0..4 {
        harness
            .client
            .push_script(vec![Err(LlmError::unavailable("down"))]);
    }

    let session = harness.registry.load("main")?;
    let mut rx = session.subscribe();
    harness.registry.send_message("main", "hello")?;
    let kind = wait_error(&mut rx).await;
    assert_eq!(kind, "ModelUnavailable");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_mid_turn_drops_overlay_and_keeps_ref() -> Result<()> {
    let harness = Harness::new(&[("a.txt", "1\n")])?;
    add_user_tool(&harness)?;
    let base = harness.tip("main");

    // The write lands in the overlay, then the unapproved tool suspends the
    // turn at the approval gate, a clean point to cancel at.
    let mut events = Vec::new();
    events.extend(tool_call(
        0,
        "call_1",
        "write_file",
        json!({ "filepath": "scratch.txt", "content": "pending\n" }),
    ));
    events.extend(tool_call(1, "call_2", "noop", json!({})));
    events.push(stop(StopReason::ToolUse));
    harness.client.push_script(script(events));

    let session = harness.registry.load("main")?;
    let mut rx = session.subscribe();
    harness.registry.send_message("main", "try the tool")?;

    wait_for_approval_request(&mut rx).await;
    assert!(harness.registry.cancel_turn("main"));

    let commit = wait_turn(&mut rx).await;
    assert!(commit.is_none(), "cancelled turn makes no commit");
    assert_eq!(harness.tip("main"), base, "branch ref unchanged");
    assert_eq!(session.state(), SessionState::Idle);

    let record = session.record_snapshot();
    assert!(record
        .messages
        .iter()
        .any(|m| m.content.contains("[turn cancelled by user]")));
    assert!(harness.file_at_tip("main", "scratch.txt").is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn approved_user_tool_executes_and_approval_persists() -> Result<()> {
    let harness = Harness::new(&[("data.txt", "line\n")])?;
    add_user_tool(&harness)?;

    let mut events = Vec::new();
    events.extend(tool_call(0, "call_1", "noop", json!({})));
    events.push(stop(StopReason::ToolUse));
    harness.client.push_script(script(events));
    harness
        .client
        .push_script(script(vec![text("Tool ran."), stop(StopReason::EndTurn)]));

    let session = harness.registry.load("main")?;
    let mut rx = session.subscribe();
    harness.registry.send_message("main", "run noop")?;

    let tool = wait_for_approval_request(&mut rx).await;
    assert_eq!(tool, "noop");
    assert!(session.resolve_approval(true));
    wait_turn(&mut rx).await.expect("commit");

    let record = harness.record_at_tip("main");
    let result = record
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("tool result");
    assert!(
        result.content.contains("\"success\":true"),
        "got {}",
        result.content
    );

    // Second run sails through: the approved hash is persisted.
    let mut events = Vec::new();
    events.extend(tool_call(0, "call_9", "noop", json!({})));
    events.push(stop(StopReason::ToolUse));
    harness.client.push_script(script(events));
    harness
        .client
        .push_script(script(vec![text("Again."), stop(StopReason::EndTurn)]));

    let mut rx = session.subscribe();
    harness.registry.send_message("main", "run it again")?;
    wait_turn(&mut rx).await.expect("commit");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn conversation_only_turn_commits_as_prepare() -> Result<()> {
    let harness = Harness::new(&[("a.txt", "1\n")])?;

    harness.client.push_script(script(vec![
        text("Just chatting."),
        stop(StopReason::EndTurn),
    ]));

    let session = harness.registry.load("main")?;
    let mut rx = session.subscribe();
    harness.registry.send_message("main", "hi")?;
    wait_turn(&mut rx).await.expect("commit");

    let info = harness.backend.read_commit(harness.tip("main"))?;
    let (kind, message) = parse_commit_kind(&info.message);
    assert_eq!(kind, CommitKind::Prepare);
    assert_eq!(message, "conversation turn");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn modified_files_refresh_in_the_next_request() -> Result<()> {
    let harness = Harness::new(&[("a.txt", "old content\n")])?;

    let mut events = Vec::new();
    events.extend(tool_call(
        0,
        "call_1",
        "write_file",
        json!({ "filepath": "a.txt", "content": "new content\n" }),
    ));
    events.push(stop(StopReason::ToolUse));
    harness.client.push_script(script(events));
    harness
        .client
        .push_script(script(vec![text("Done."), stop(StopReason::EndTurn)]));

    let session = harness.registry.load("main")?;
    let mut rx = session.subscribe();
    harness.registry.send_message("main", "rewrite a.txt")?;
    wait_turn(&mut rx).await.expect("commit");

    // Two turn requests; any further calls are auxiliary (commit message).
    let requests = harness.client.requests();
    let turn_requests: Vec<_> = requests
        .iter()
        .filter(|r| r.options.model == "default")
        .collect();
    assert_eq!(turn_requests.len(), 2);

    // After the edit, the follow-up request carries the fresh file content
    // and exactly one cache boundary, on the final message.
    let second = turn_requests[1];
    assert!(second.messages.iter().any(
        |m| m.content.contains("full contents of a.txt") && m.content.contains("new content")
    ));
    let boundaries = second.messages.iter().filter(|m| m.cache_boundary).count();
    assert_eq!(boundaries, 1);
    assert!(second.messages.last().expect("messages").cache_boundary);
    // The record travels inside the commit, never as model context.
    assert!(!second.messages.iter().any(|m| m.content.contains(SESSION_FILE)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn mid_turn_commit_tool_checkpoints() -> Result<()> {
    let harness = Harness::new(&[("a.txt", "1\n")])?;
    let base = harness.tip("main");

    let mut events = Vec::new();
    events.extend(tool_call(
        0,
        "call_1",
        "write_file",
        json!({ "filepath": "step1.txt", "content": "one\n" }),
    ));
    events.extend(tool_call(
        1,
        "call_2",
        "commit",
        json!({ "message": "checkpoint one" }),
    ));
    events.extend(tool_call(
        2,
        "call_3",
        "write_file",
        json!({ "filepath": "step2.txt", "content": "two\n" }),
    ));
    events.push(stop(StopReason::ToolUse));
    harness.client.push_script(script(events));
    harness.client.push_script(script(vec![
        text("Both steps done."),
        stop(StopReason::EndTurn),
    ]));

    let session = harness.registry.load("main")?;
    let mut rx = session.subscribe();
    harness.registry.send_message("main", "two checkpoints please")?;
    wait_turn(&mut rx).await.expect("commit");

    // Two commits above the base: the explicit checkpoint and the turn end.
    let tip_info = harness.backend.read_commit(harness.tip("main"))?;
    let mid = tip_info.parents[0];
    let mid_info = harness.backend.read_commit(mid)?;
    assert_eq!(mid_info.message, "checkpoint one");
    assert_eq!(mid_info.parents, vec![base]);
    assert!(harness.backend.read_file(mid, "step1.txt")?.is_some());
    assert!(harness.backend.read_file(mid, "step2.txt")?.is_none());
    assert_eq!(
        harness.file_at_tip("main", "step2.txt").as_deref(),
        Some("two\n")
    );
    Ok(())
}
