mod common;

use std::time::Duration;

use anyhow::Result;
use common::*;
use serde_json::json;

use forge_git::{Author, CommitKind};
use forge_llm::{Role, StopReason};
use forge_session::{
    PendingWait, SessionError, SessionEvent, SessionRecord, SessionState, MERGED_DIR,
};
use forge_vfs::{CommitOptions, Vfs, WorkInProgress};

/// Commit a handwritten record (and optional files) onto a branch.
fn put_record(
    harness: &Harness,
    branch: &str,
    record: &SessionRecord,
    files: &[(&str, &str)],
) -> Result<()> {
    let mut vfs = WorkInProgress::open(harness.backend.clone(), branch)?;
    vfs.claim()?;
    for (path, contents) in files {
        vfs.write(path, contents)?;
    }
    record.write_into(&mut vfs)?;
    vfs.commit(&CommitOptions {
        message: "fixture state".to_string(),
        kind: CommitKind::Major,
        author: Author::default(),
    })?;
    vfs.release()?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unload_gates_on_state_and_observers() -> Result<()> {
    let harness = Harness::new(&[("a.txt", "1\n")])?;
    let session = harness.registry.load("main")?;

    let (guard, _rx) = session.attach_observer();
    let err = harness.registry.unload("main").expect_err("observed");
    assert!(matches!(err, SessionError::ObserversAttached { .. }));

    drop(guard);
    harness.registry.unload("main")?;
    assert!(harness.registry.get("main").is_none());

    // Unloading persists the open-files hint path without touching git.
    assert!(harness.backend.branch_exists("main")?);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn loading_a_branch_without_a_session_fails() -> Result<()> {
    let harness = Harness::new(&[("a.txt", "1\n")])?;
    harness
        .backend
        .create_branch("bare", harness.tip("main"))?;
    // Strip the record from the new branch.
    {
        let mut vfs = WorkInProgress::open(harness.backend.clone(), "bare")?;
        vfs.claim()?;
        vfs.delete(forge_session::SESSION_FILE)?;
        vfs.commit(&CommitOptions {
            message: "drop session".to_string(),
            kind: CommitKind::Major,
            author: Author::default(),
        })?;
        vfs.release()?;
    }
    let err = harness.registry.load("bare").expect_err("no session");
    assert!(matches!(err, SessionError::NoSession { .. }));

    // ensure_session bootstraps an empty committed record.
    harness.registry.ensure_session("bare")?;
    let session = harness.registry.load("bare")?;
    assert_eq!(session.state(), SessionState::Idle);
    assert!(harness.record_at_tip("bare").messages.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn parent_spawns_child_waits_and_resumes_with_result() -> Result<()> {
    let harness = Harness::new(&[("shared.txt", "base\n")])?;

    // Parent step: fork a child and wait on it, in one batch.
    let mut events = vec![text("Delegating this.")];
    events.extend(tool_call(
        0,
        "call_spawn",
        "spawn_session",
        json!({
            "branch_name": "ai/task",
            "instruction": "write child.txt with the answer",
        }),
    ));
    events.extend(tool_call(
        1,
        "call_wait",
        "wait_session",
        json!({ "branches": ["ai/task"] }),
    ));
    events.push(stop(StopReason::ToolUse));
    harness.client.push_script(script(events));

    // Child turn: one edit, then stop.
    let mut child_events = vec![text("On it.")];
    child_events.extend(tool_call(
        0,
        "call_c1",
        "write_file",
        json!({ "filepath": "child.txt", "content": "42\n" }),
    ));
    child_events.push(stop(StopReason::ToolUse));
    harness.client.push_script(script(child_events));
    harness
        .client
        .push_script(script(vec![text("Child done."), stop(StopReason::EndTurn)]));

    // Parent resumes once the child is idle.
    harness.client.push_script(script(vec![
        text("Child finished; wrapping up."),
        stop(StopReason::EndTurn),
    ]));

    let parent = harness.registry.load("main")?;
    let mut rx = parent.subscribe();
    harness.registry.send_message("main", "delegate the task")?;

    // The parent must pass through WAITING_CHILDREN while the child runs.
    let saw_waiting = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            match rx.recv().await.expect("events") {
                SessionEvent::StateChanged {
                    state: SessionState::WaitingChildren,
                } => return true,
                SessionEvent::TurnFinished { .. } => return false,
                _ => {}
            }
        }
    })
    .await
    .expect("observed parent states");
    assert!(saw_waiting, "parent never suspended on its child");

    wait_turn(&mut rx).await.expect("parent commit");
    assert_eq!(parent.state(), SessionState::Idle);

    // Child ran to completion on its own branch.
    assert_eq!(
        harness.file_at_tip("ai/task", "child.txt").as_deref(),
        Some("42\n")
    );
    let child_record = harness.record_at_tip("ai/task");
    assert_eq!(child_record.parent_branch.as_deref(), Some("main"));
    assert_eq!(child_record.state, SessionState::Idle);

    // The parent's record carries the link and the wait's resolution.
    let parent_record = harness.record_at_tip("main");
    assert_eq!(parent_record.child_branches, vec!["ai/task".to_string()]);
    assert!(parent_record.pending_wait.is_none());
    let wait_result = parent_record
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .find(|m| m.tool_call_id.as_deref() == Some("call_wait"))
        .expect("wait result");
    assert!(wait_result.content.contains("\"ready\":true"));
    assert!(wait_result.content.contains("ai/task"));

    // Registry invariant: both ends stayed loaded throughout.
    assert!(harness.registry.get("main").is_some());
    assert!(harness.registry.get("ai/task").is_some());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn wait_resolves_immediately_for_an_already_finished_child() -> Result<()> {
    let harness = Harness::new(&[("shared.txt", "base\n")])?;

    // A child that already ran to rest, never loaded into the registry.
    harness
        .backend
        .create_branch("ai/done", harness.tip("main"))?;
    put_record(
        &harness,
        "ai/done",
        &SessionRecord {
            parent_branch: Some("main".to_string()),
            state: SessionState::Idle,
            ..SessionRecord::default()
        },
        &[("result.txt", "finished\n")],
    )?;

    let mut events = Vec::new();
    events.extend(tool_call(
        0,
        "call_wait",
        "wait_session",
        json!({ "branches": ["ai/done"] }),
    ));
    events.push(stop(StopReason::ToolUse));
    harness.client.push_script(script(events));
    harness
        .client
        .push_script(script(vec![text("Collected."), stop(StopReason::EndTurn)]));

    let parent = harness.registry.load("main")?;
    let mut rx = parent.subscribe();
    harness.registry.send_message("main", "collect the result")?;
    wait_turn(&mut rx).await.expect("commit");

    let record = harness.record_at_tip("main");
    let wait_result = record
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("wait result");
    assert!(wait_result.content.contains("\"ready\":true"));
    // The wait resolved without the parent ever suspending.
    assert!(record.pending_wait.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn startup_scan_recovers_crashed_and_waiting_sessions() -> Result<()> {
    let harness = Harness::new(&[("a.txt", "1\n")])?;

    // A session that died mid-turn.
    harness
        .backend
        .create_branch("crashed", harness.tip("main"))?;
    put_record(
        &harness,
        "crashed",
        &SessionRecord {
            state: SessionState::Running,
            ..SessionRecord::default()
        },
        &[],
    )?;

    // A parent blocked on a child, plus the child itself.
    harness
        .backend
        .create_branch("waiting", harness.tip("main"))?;
    harness.backend.create_branch("kid", harness.tip("main"))?;
    put_record(
        &harness,
        "waiting",
        &SessionRecord {
            state: SessionState::WaitingChildren,
            child_branches: vec!["kid".to_string()],
            pending_wait: Some(PendingWait {
                branches: vec!["kid".to_string()],
                tool_call_id: "call_wait".to_string(),
                message: Some("waiting on child sessions: kid".to_string()),
            }),
            ..SessionRecord::default()
        },
        &[],
    )?;
    put_record(
        &harness,
        "kid",
        &SessionRecord {
            parent_branch: Some("waiting".to_string()),
            state: SessionState::Running,
            ..SessionRecord::default()
        },
        &[],
    )?;

    let loaded = harness.registry.startup_scan()?;
    assert!(loaded.contains(&"crashed".to_string()));
    assert!(loaded.contains(&"waiting".to_string()));

    // Crash recovery: RUNNING resets to IDLE, nothing auto-resumes.
    let crashed = harness.registry.get("crashed").expect("loaded");
    assert_eq!(crashed.state(), SessionState::Idle);
    let kid = harness.registry.get("kid").expect("child loaded with parent");
    assert_eq!(kid.state(), SessionState::Idle);
    let waiting = harness.registry.get("waiting").expect("loaded");
    assert_eq!(waiting.state(), SessionState::WaitingChildren);
    assert!(harness.client.requests().is_empty(), "no auto-resume");

    // The recovered parent resumes when its child completes a turn.
    harness
        .client
        .push_script(script(vec![text("Kid done."), stop(StopReason::EndTurn)]));
    harness.client.push_script(script(vec![
        text("Resumed after the wait."),
        stop(StopReason::EndTurn),
    ]));

    let mut parent_rx = waiting.subscribe();
    let mut kid_rx = kid.subscribe();
    harness.registry.send_message("kid", "finish up")?;
    wait_turn(&mut kid_rx).await.expect("kid commit");
    wait_turn(&mut parent_rx).await.expect("parent resumed and committed");

    assert_eq!(waiting.state(), SessionState::Idle);
    let parent_record = harness.record_at_tip("waiting");
    assert!(parent_record.pending_wait.is_none());
    let wait_result = parent_record
        .messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("call_wait"))
        .expect("resumed wait result");
    assert!(wait_result.content.contains("\"ready\":true"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_child_archives_its_session_record() -> Result<()> {
    let harness = Harness::new(&[("shared.txt", "base\n")])?;

    harness
        .backend
        .create_branch("ai/task", harness.tip("main"))?;
    put_record(
        &harness,
        "ai/task",
        &SessionRecord {
            parent_branch: Some("main".to_string()),
            state: SessionState::Idle,
            ..SessionRecord::default()
        },
        &[("feature.txt", "new feature\n")],
    )?;

    let commit = harness.registry.merge_child("main", "ai/task")?;
    assert_eq!(harness.tip("main"), commit);

    let info = harness.backend.read_commit(commit)?;
    assert_eq!(info.parents.len(), 2, "a real merge commit");

    // The child's work arrived; the parent's record won; the child's record
    // is archived.
    assert_eq!(
        harness.file_at_tip("main", "feature.txt").as_deref(),
        Some("new feature\n")
    );
    let record = harness.record_at_tip("main");
    assert!(record.parent_branch.is_none(), "destination record kept");
    let archived = harness
        .file_at_tip("main", &format!("{MERGED_DIR}/ai/task.json"))
        .expect("archived record");
    assert!(archived.contains("\"parent_branch\": \"main\""));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn spawning_an_ancestor_branch_is_refused() -> Result<()> {
    let harness = Harness::new(&[("a.txt", "1\n")])?;

    let mut events = Vec::new();
    events.extend(tool_call(
        0,
        "call_spawn",
        "spawn_session",
        json!({ "branch_name": "main", "instruction": "loop forever" }),
    ));
    events.push(stop(StopReason::ToolUse));
    harness.client.push_script(script(events));
    harness
        .client
        .push_script(script(vec![text("Understood."), stop(StopReason::EndTurn)]));

    let session = harness.registry.load("main")?;
    let mut rx = session.subscribe();
    harness.registry.send_message("main", "spawn yourself")?;
    wait_turn(&mut rx).await.expect("commit");

    let record = harness.record_at_tip("main");
    let result = record
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("tool result");
    assert!(
        result.content.contains("already exists") || result.content.contains("ancestor"),
        "got {}",
        result.content
    );
    assert!(record.child_branches.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn summaries_populate_from_the_auxiliary_model_and_cache() -> Result<()> {
    let harness = Harness::new_with_aux(&[("lib.rs", "pub fn alpha() {}\n")])?;

    // One aux completion for the single summarisable file.
    harness.client.push_script(script(vec![
        text("- alpha(): does the thing"),
        stop(StopReason::EndTurn),
    ]));

    let generated = harness.registry.generate_summaries("main").await?;
    assert_eq!(generated, 1);

    // The summary shows up in the next turn's request.
    harness
        .client
        .push_script(script(vec![text("Hello."), stop(StopReason::EndTurn)]));
    let session = harness.registry.load("main")?;
    let mut rx = session.subscribe();
    harness.registry.send_message("main", "hi")?;
    wait_turn(&mut rx).await.expect("commit");

    let request = harness
        .client
        .requests()
        .into_iter()
        .rev()
        .find(|r| r.options.model == "default")
        .expect("turn request");
    assert!(request
        .messages
        .iter()
        .any(|m| m.content.contains("[summary] lib.rs") && m.content.contains("alpha()")));
    Ok(())
}
