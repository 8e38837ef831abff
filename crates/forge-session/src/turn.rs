//! The turn executor.
//!
//! Drives one agent turn: stream tokens, detect structured and inline tool
//! invocations, dispatch them sequentially against the claimed VFS, iterate
//! until the model stops with no pending calls, then finalise exactly one
//! commit carrying both the code changes and the session record. Every
//! suspension point observes the cancellation token.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use forge_git::{CommitKind, GitError, Oid};
use forge_llm::{
    complete, ChatMessage, EventStream, LlmError, Request, RequestOptions, Role,
    StreamAccumulator, StreamEvent, ToolDefinition,
};
use forge_tools::{
    parse_inline_commands, SessionLookup, SideEffect, Tool, ToolContext, ToolError, ToolOutput,
    ToolResolution,
};
use forge_vfs::{CommitOptions, OverlaySnapshot, Vfs, VfsError, WorkInProgress};

use crate::events::SessionEvent;
use crate::live::{lock_vfs, LiveSession};
use crate::registry::SessionRegistry;
use crate::state::SessionState;
use crate::store::{PendingWait, SESSION_FILE};
use crate::{SessionError, SessionResult};

const TOOL_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

pub(crate) async fn run_turn(
    registry: Arc<SessionRegistry>,
    session: Arc<LiveSession>,
    cancel: CancellationToken,
) {
    let turn_snapshot = match lock_vfs(&session.vfs) {
        Ok(vfs) => vfs.snapshot(),
        Err(err) => {
            fail_session(&session, &err);
            session.clear_cancel();
            return;
        }
    };

    match drive_turn(&registry, &session, &cancel).await {
        Ok(commit) => {
            session.emit(SessionEvent::TurnFinished {
                commit: Some(commit.to_string()),
            });
            let _ = session.set_state(SessionState::Idle);
        }
        Err(SessionError::Cancelled) => {
            // Unwind to the turn boundary: this turn's overlay entries are
            // dropped and no commit exists for the interrupted state.
            if let Ok(mut vfs) = lock_vfs(&session.vfs) {
                vfs.restore(turn_snapshot);
            }
            session.with_inner(|inner| {
                inner.record.pending_wait = None;
                inner.yield_message = None;
            });
            session.push_user("[turn cancelled by user]");
            session.emit(SessionEvent::TurnFinished { commit: None });
            let _ = session.set_state(SessionState::Idle);
        }
        Err(err) => fail_session(&session, &err),
    }

    session.clear_cancel();
    registry.notify_child_done(session.branch());
    // Input queued while the turn was running starts the next one.
    if session.has_pending_inputs() {
        registry.maybe_start_turn(&session);
    }
}

fn fail_session(session: &LiveSession, err: &SessionError) {
    tracing::warn!(branch = session.branch(), kind = err.kind(), %err, "turn failed");
    session.emit(SessionEvent::Error {
        kind: err.kind().to_string(),
        detail: err.to_string(),
    });
    let _ = session.set_state(SessionState::Error);
}

async fn drive_turn(
    registry: &Arc<SessionRegistry>,
    session: &Arc<LiveSession>,
    cancel: &CancellationToken,
) -> SessionResult<Oid> {
    // A dirty checked-out working tree halts the turn before it starts.
    if registry.backend.checked_out_branch()?.as_deref() == Some(session.branch())
        && registry.backend.working_tree_dirty()?
    {
        return Err(SessionError::Git(GitError::WorkdirDirty {
            workdir: registry.backend.workdir()?,
        }));
    }

    session.set_state(SessionState::Running)?;

    for text in session.drain_inputs() {
        session.push_user(&text);
    }
    // Ephemeral results from the previous turn collapse to placeholders.
    session.with_inner(|inner| inner.prompt.begin_turn());

    // A wait that survived suspension (or a restart) resolves before any
    // streaming.
    let pending = session.with_inner(|inner| inner.record.pending_wait.clone());
    if let Some(wait) = pending {
        let value = await_children(registry, session, cancel, &wait.tool_call_id, &wait.branches)
            .await?;
        let rendered = value.to_string();
        session.push_tool_result(&wait.tool_call_id, &rendered, false);
        session.emit(SessionEvent::ToolCallResult {
            id: wait.tool_call_id.clone(),
            name: "wait_session".to_string(),
            result: value,
            is_error: false,
        });
    }

    let mut attempts = 0usize;
    let mut inline_counter = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let request = build_request(registry, session)?;
        let stream = match registry.model.stream(request).await {
            Ok(stream) => stream,
            Err(err) => {
                retry_or_fail(registry, session, err, &mut attempts)?;
                continue;
            }
        };

        let mut acc = StreamAccumulator::default();
        match consume_stream(stream, &mut acc, session, cancel).await {
            Ok(StreamEnd::Cancelled) => {
                if !acc.text().is_empty() {
                    session.push_assistant(&format!("{}\n\n[cancelled]", acc.text()), &[]);
                }
                return Err(SessionError::Cancelled);
            }
            Ok(StreamEnd::Finished) => {}
            Err(err) => {
                retry_or_fail(registry, session, err, &mut attempts)?;
                continue;
            }
        }

        let text = acc.text().to_string();
        let calls = acc.tool_calls().to_vec();
        let inline = parse_inline_commands(&text);
        session.push_assistant(&text, &calls);

        if inline.is_empty() && calls.is_empty() {
            break;
        }

        // Inline commands run first (they appear in the prose), then the
        // structured batch, all in document order, strictly sequential:
        // tools share the VFS, and ordering is observable in the commit.
        let mut invocations: Vec<(String, String, Result<Value, String>)> = Vec::new();
        for command in inline {
            inline_counter += 1;
            invocations.push((
                format!("inline_{inline_counter}"),
                command.tool,
                Ok(command.args),
            ));
        }
        for call in &calls {
            let parsed = if call.arguments.trim().is_empty() {
                Ok(json!({}))
            } else {
                serde_json::from_str(&call.arguments)
                    .map_err(|err| format!("invalid JSON arguments: {err}"))
            };
            invocations.push((call.id.clone(), call.name.clone(), parsed));
        }

        for (call_id, name, parsed) in invocations {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            let args = match parsed {
                Ok(args) => args,
                Err(parse_err) => {
                    // The model sees what it produced and may resubmit.
                    deliver_result(
                        session,
                        &call_id,
                        &name,
                        json!({ "success": false, "kind": "BadArguments", "error": parse_err }),
                        true,
                        false,
                    );
                    break;
                }
            };
            session.emit(SessionEvent::ToolCallStarted {
                id: call_id.clone(),
                name: name.clone(),
                arguments: args.clone(),
            });

            match run_one_tool(registry, session, cancel, &call_id, &name, &args).await? {
                ToolRun::Success { value, ephemeral } => {
                    deliver_result(session, &call_id, &name, value, false, ephemeral);
                }
                ToolRun::Failure { value } => {
                    // Stop-on-first-failure: unattempted calls are not
                    // recorded, the agent resubmits after fixing the issue.
                    deliver_result(session, &call_id, &name, value, true, false);
                    break;
                }
            }
        }
    }

    commit_with_record(registry, session, None, SessionState::Idle).await
}

fn retry_or_fail(
    registry: &Arc<SessionRegistry>,
    session: &LiveSession,
    err: LlmError,
    attempts: &mut usize,
) -> SessionResult<()> {
    let budget = registry.settings.max_stream_retries;
    if err.retryable() && *attempts < budget {
        *attempts += 1;
        tracing::info!(
            branch = session.branch(),
            attempt = *attempts,
            budget,
            %err,
            "reopening model stream"
        );
        session.push_user(&format!(
            "[transport error: {err}; retrying {}/{budget}]",
            *attempts
        ));
        return Ok(());
    }
    if err.retryable() {
        return Err(SessionError::ModelUnavailable {
            attempts: *attempts,
            message: err.to_string(),
        });
    }
    Err(SessionError::Llm(err))
}

enum StreamEnd {
    Finished,
    Cancelled,
}

async fn consume_stream(
    mut stream: EventStream,
    acc: &mut StreamAccumulator,
    session: &LiveSession,
    cancel: &CancellationToken,
) -> Result<StreamEnd, LlmError> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            next = stream.next() => match next {
                Some(Ok(event)) => {
                    match &event {
                        StreamEvent::TextDelta { text } => {
                            session.emit(SessionEvent::Chunk { text: text.clone() });
                        }
                        StreamEvent::ToolCallDelta { index, fragment } => {
                            session.emit(SessionEvent::ToolCallDelta {
                                index: *index,
                                fragment: fragment.clone(),
                            });
                        }
                        _ => {}
                    }
                    let done = matches!(event, StreamEvent::Stop { .. });
                    acc.process(&event);
                    if done {
                        return Ok(StreamEnd::Finished);
                    }
                }
                Some(Err(err)) => return Err(err),
                None => return Ok(StreamEnd::Finished),
            }
        }
    }
}

fn build_request(
    registry: &Arc<SessionRegistry>,
    session: &LiveSession,
) -> SessionResult<Request> {
    let schemas = {
        let mut vfs = lock_vfs(&session.vfs)?;
        vfs.claim()?;
        let schemas = registry.tools.api_schemas(&vfs, &registry.approvals);
        vfs.release()?;
        schemas.map_err(tool_error_to_session)?
    };
    let tools = schemas
        .into_iter()
        .map(|schema| ToolDefinition {
            name: schema.name,
            description: schema.description,
            parameters: schema.parameters,
        })
        .collect();
    let messages = session.with_inner(|inner| inner.prompt.render());
    Ok(Request {
        messages,
        tools,
        options: RequestOptions {
            model: registry.settings.model.clone(),
            ..RequestOptions::default()
        },
    })
}

fn tool_error_to_session(err: ToolError) -> SessionError {
    match err {
        ToolError::Vfs(err) => SessionError::Vfs(err),
        ToolError::Git(err) => SessionError::Git(err),
        other => SessionError::Vfs(VfsError::OverlayPoisoned {
            detail: other.to_string(),
        }),
    }
}

fn deliver_result(
    session: &LiveSession,
    call_id: &str,
    name: &str,
    value: Value,
    is_error: bool,
    ephemeral: bool,
) {
    let rendered = value.to_string();
    session.push_tool_result(call_id, &rendered, ephemeral);
    session.emit(SessionEvent::ToolCallResult {
        id: call_id.to_string(),
        name: name.to_string(),
        result: value,
        is_error,
    });
}

enum ToolRun {
    Success { value: Value, ephemeral: bool },
    Failure { value: Value },
}

async fn run_one_tool(
    registry: &Arc<SessionRegistry>,
    session: &Arc<LiveSession>,
    cancel: &CancellationToken,
    call_id: &str,
    name: &str,
    args: &Value,
) -> SessionResult<ToolRun> {
    let resolution = {
        let mut vfs = lock_vfs(&session.vfs)?;
        vfs.claim()?;
        let resolution = registry.tools.resolve(name, &vfs);
        vfs.release()?;
        resolution
    };
    let resolution = match resolution {
        Ok(resolution) => resolution,
        // A broken user-tool manifest is the agent's problem, not a session
        // failure.
        Err(err) => {
            return Ok(ToolRun::Failure {
                value: json!({
                    "success": false,
                    "kind": err.kind(),
                    "error": err.to_string(),
                }),
            })
        }
    };

    let tool: Arc<dyn Tool> = match resolution {
        ToolResolution::Builtin(tool) => tool,
        ToolResolution::User(user) => {
            let hash = user.content_hash();
            if !registry.approvals.is_approved(name, &hash) {
                let decision = request_approval(session, cancel, name, &hash).await?;
                if !decision {
                    return Ok(ToolRun::Failure {
                        value: json!({
                            "success": false,
                            "kind": "ApprovalRequired",
                            "error": format!("user rejected approval for tool '{name}'"),
                        }),
                    });
                }
                registry.approvals.approve(name, &hash)?;
            }
            Arc::new(user)
        }
        ToolResolution::Unknown => {
            return Ok(ToolRun::Failure {
                value: json!({
                    "success": false,
                    "kind": "UnknownTool",
                    "error": format!("unknown tool: {name}"),
                }),
            })
        }
    };

    let pre_snapshot = lock_vfs(&session.vfs)?.snapshot();
    let ctx = tool_context(registry, session);
    let vfs = Arc::clone(&session.vfs);
    let exec_tool = Arc::clone(&tool);
    let exec_args = args.clone();
    let handle = tokio::task::spawn_blocking(move || execute_claimed(&vfs, &exec_tool, &exec_args, &ctx));

    let deadline = tool.timeout() + TOOL_TIMEOUT_GRACE;
    let result: Result<ToolOutput, ToolError> = tokio::select! {
        _ = cancel.cancelled() => {
            // Best-effort interrupt: the worker finishes its current step,
            // then the pre-tool overlay is restored.
            restore_later(&session.vfs, pre_snapshot.clone());
            return Err(SessionError::Cancelled);
        }
        joined = tokio::time::timeout(deadline, handle) => match joined {
            Err(_elapsed) => {
                restore_later(&session.vfs, pre_snapshot.clone());
                Err(ToolError::Timeout { seconds: deadline.as_secs() })
            }
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                // The tool panicked while holding the claim; the overlay can
                // no longer be trusted.
                return Err(SessionError::Vfs(VfsError::OverlayPoisoned {
                    detail: format!("tool '{name}' panicked: {join_err}"),
                }));
            }
        }
    };

    match result {
        Err(err) => {
            if let Ok(mut vfs) = lock_vfs(&session.vfs) {
                vfs.restore(pre_snapshot);
            }
            Ok(ToolRun::Failure {
                value: json!({
                    "success": false,
                    "kind": err.kind(),
                    "error": err.to_string(),
                }),
            })
        }
        Ok(mut output) => {
            let mut ephemeral = false;
            for effect in std::mem::take(&mut output.effects) {
                apply_effect(
                    registry,
                    session,
                    cancel,
                    call_id,
                    effect,
                    &mut output.value,
                    &mut ephemeral,
                )
                .await?;
            }
            Ok(ToolRun::Success {
                value: output.value,
                ephemeral,
            })
        }
    }
}

fn execute_claimed(
    vfs: &StdMutex<WorkInProgress>,
    tool: &Arc<dyn Tool>,
    args: &Value,
    ctx: &ToolContext,
) -> Result<ToolOutput, ToolError> {
    let mut guard = vfs.lock().map_err(|_| {
        ToolError::Vfs(VfsError::OverlayPoisoned {
            detail: "a previous worker panicked while holding the overlay".to_string(),
        })
    })?;
    guard.claim()?;
    let output = tool.execute(&mut guard, args, ctx);
    let released = guard.release();
    match (output, released) {
        (Err(err), _) => Err(err),
        (Ok(_), Err(err)) => Err(err.into()),
        (Ok(output), Ok(())) => Ok(output),
    }
}

fn restore_later(vfs: &Arc<StdMutex<WorkInProgress>>, snapshot: OverlaySnapshot) {
    let vfs = Arc::clone(vfs);
    tokio::task::spawn_blocking(move || {
        if let Ok(mut guard) = vfs.lock() {
            guard.restore(snapshot);
        }
    });
}

async fn request_approval(
    session: &Arc<LiveSession>,
    cancel: &CancellationToken,
    name: &str,
    hash: &str,
) -> SessionResult<bool> {
    let receiver = session.park_approval();
    session.emit(SessionEvent::ApprovalRequired {
        tool: name.to_string(),
        hash: hash.to_string(),
    });
    tokio::select! {
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        decision = receiver => Ok(decision.unwrap_or(false)),
    }
}

fn tool_context(registry: &Arc<SessionRegistry>, session: &LiveSession) -> ToolContext {
    ToolContext {
        branch: session.branch().to_string(),
        backend: Arc::clone(&registry.backend),
        author: registry.settings.author.clone(),
        sessions: Some(Arc::clone(registry) as Arc<dyn SessionLookup>),
        aux_model: registry.aux_model.clone(),
        aux_model_name: registry.settings.aux_model.clone(),
        runtime: tokio::runtime::Handle::try_current().ok(),
        exec_timeout: registry.settings.exec_timeout,
    }
}

#[allow(clippy::too_many_arguments)]
async fn apply_effect(
    registry: &Arc<SessionRegistry>,
    session: &Arc<LiveSession>,
    cancel: &CancellationToken,
    call_id: &str,
    effect: SideEffect,
    value: &mut Value,
    ephemeral: &mut bool,
) -> SessionResult<()> {
    match effect {
        SideEffect::OpenFile { path } => {
            open_file(session, &path)?;
            emit_context(session);
        }
        SideEffect::CloseFile { path } => {
            session.with_inner(|inner| {
                inner.record.active_files.retain(|p| p != &path);
                inner.prompt.remove_file_content(&path);
            });
            emit_context(session);
        }
        SideEffect::EphemeralResult => *ephemeral = true,
        SideEffect::FilesModified { paths } => {
            for path in paths {
                refresh_file(session, &path)?;
            }
            emit_context(session);
        }
        SideEffect::CommitNow { message } => {
            let oid =
                commit_with_record(registry, session, Some(message), SessionState::Running).await?;
            if let Value::Object(map) = value {
                map.insert("commit".to_string(), json!(oid.to_string()));
            }
        }
        SideEffect::SpawnChild {
            branch,
            instruction,
        } => {
            session.with_inner(|inner| {
                if !inner.record.child_branches.contains(&branch) {
                    inner.record.child_branches.push(branch.clone());
                }
            });
            registry.send_message(&branch, &instruction)?;
        }
        SideEffect::WaitChildren { branches } => {
            *value = await_children(registry, session, cancel, call_id, &branches).await?;
        }
        SideEffect::CompactToolResults { from, to, summary } => {
            let (compacted, missing) = session
                .with_inner(|inner| inner.prompt.compact_tool_results(from, to, &summary));
            if let Value::Object(map) = value {
                map.insert("compacted".to_string(), json!(compacted));
                if !missing.is_empty() {
                    map.insert("missing_ids".to_string(), json!(missing));
                }
            }
        }
        SideEffect::CompactThink => {
            session.with_inner(|inner| inner.prompt.compact_think_call(call_id));
        }
    }
    Ok(())
}

fn emit_context(session: &LiveSession) {
    let active = session.with_inner(|inner| inner.record.active_files.clone());
    session.emit(SessionEvent::ContextUpdated {
        active_files: active,
    });
}

/// Pull a file into active context with its current overlay-visible content.
fn open_file(session: &LiveSession, path: &str) -> SessionResult<()> {
    let content = {
        let mut vfs = lock_vfs(&session.vfs)?;
        vfs.claim()?;
        let content = vfs.read(path);
        vfs.release()?;
        content
    };
    match content {
        Ok(content) => {
            session.with_inner(|inner| {
                if !inner.record.active_files.iter().any(|p| p == path) {
                    inner.record.active_files.push(path.to_string());
                }
                inner.prompt.append_file_content(path, &content);
            });
            Ok(())
        }
        Err(VfsError::NotFound { .. }) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// A path changed under the overlay: move its content block to the file
/// region tail (or drop it if the file is gone), keeping the agent's view of
/// its own edits current.
fn refresh_file(session: &LiveSession, path: &str) -> SessionResult<()> {
    let content = {
        let mut vfs = lock_vfs(&session.vfs)?;
        vfs.claim()?;
        let content = vfs.read(path);
        vfs.release()?;
        content
    };
    match content {
        Ok(content) => {
            session.with_inner(|inner| {
                if !inner.record.active_files.iter().any(|p| p == path) {
                    inner.record.active_files.push(path.to_string());
                }
                inner.prompt.append_file_content(path, &content);
            });
            Ok(())
        }
        Err(VfsError::NotFound { .. }) | Err(VfsError::Binary { .. }) => {
            session.with_inner(|inner| {
                inner.record.active_files.retain(|p| p != path);
                inner.prompt.remove_file_content(path);
            });
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Resolve a wait on children: return immediately when one is already ready
/// (including the race where it completed before we got here), otherwise
/// persist the pending wait, transition to WAITING_CHILDREN and sleep until
/// the registry pings us.
async fn await_children(
    registry: &Arc<SessionRegistry>,
    session: &Arc<LiveSession>,
    cancel: &CancellationToken,
    call_id: &str,
    branches: &[String],
) -> SessionResult<Value> {
    loop {
        if let Some(ready) = first_ready_child(registry, session, branches)? {
            session.set_state(SessionState::Running)?;
            session.with_inner(|inner| {
                inner.record.pending_wait = None;
                inner.yield_message = None;
            });
            return Ok(ready);
        }

        if session.state() != SessionState::WaitingChildren {
            let status = format!("waiting on child sessions: {}", branches.join(", "));
            session.with_inner(|inner| {
                inner.record.pending_wait = Some(PendingWait {
                    branches: branches.to_vec(),
                    tool_call_id: call_id.to_string(),
                    message: Some(status.clone()),
                });
                inner.yield_message = Some(status.clone());
            });
            // Persist before sleeping so a restart can resume the wait.
            commit_with_record(
                registry,
                session,
                Some("awaiting child sessions".to_string()),
                SessionState::WaitingChildren,
            )
            .await?;
            session.set_state(SessionState::WaitingChildren)?;
        }

        let notified = session.child_notify.notified();
        tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            _ = notified => {}
        }
    }
}

fn first_ready_child(
    registry: &Arc<SessionRegistry>,
    session: &LiveSession,
    branches: &[String],
) -> SessionResult<Option<Value>> {
    for branch in branches {
        let Some(view) = child_view(registry, branch)? else {
            continue;
        };
        if !view.is_ready() {
            continue;
        }
        let merge_clean = registry.backend.merge_probe_clean(
            registry.backend.branch_tip(session.branch())?,
            registry.backend.branch_tip(branch)?,
            &[SESSION_FILE],
        )?;
        return Ok(Some(json!({
            "success": true,
            "ready": true,
            "branch": branch,
            "state": view.state,
            "message": view
                .yield_message
                .unwrap_or_else(|| "task completed".to_string()),
            "last_response": view.last_assistant,
            "merge_clean": merge_clean,
        })));
    }
    Ok(None)
}

fn child_view(
    registry: &Arc<SessionRegistry>,
    branch: &str,
) -> SessionResult<Option<forge_tools::SessionView>> {
    if let Some(view) = registry.session_view(branch) {
        return Ok(Some(view));
    }
    // Not loaded: judge by the committed record.
    let tip = registry.backend.branch_tip(branch)?;
    let Some(record) = crate::store::SessionRecord::load_at(&registry.backend, tip)? else {
        return Ok(None);
    };
    Ok(Some(forge_tools::SessionView {
        state: record.state.as_str().to_string(),
        parent_branch: record.parent_branch.clone(),
        yield_message: record.pending_wait.as_ref().and_then(|w| w.message.clone()),
        last_assistant: record.last_assistant_text(),
    }))
}

/// Write the session record into the overlay and commit everything. A turn
/// that changed nothing but the record commits as `Prepare`; real changes
/// commit as `Major` with a generated message when none was given.
async fn commit_with_record(
    registry: &Arc<SessionRegistry>,
    session: &Arc<LiveSession>,
    message: Option<String>,
    persisted_state: SessionState,
) -> SessionResult<Oid> {
    let changed: Vec<String> = {
        let vfs = lock_vfs(&session.vfs)?;
        vfs.pending_changes()
            .keys()
            .filter(|path| path.as_str() != SESSION_FILE)
            .cloned()
            .collect()
    };
    let has_real_changes = !changed.is_empty();
    let kind = if has_real_changes {
        CommitKind::Major
    } else {
        CommitKind::Prepare
    };
    let message = match message {
        Some(message) => message,
        None if !has_real_changes => "conversation turn".to_string(),
        None => generate_commit_message(registry, session, &changed).await,
    };

    let record_json = session.with_inner(|inner| {
        inner.record.state = persisted_state;
        inner.record.to_json()
    })?;

    let oid = {
        let mut vfs = lock_vfs(&session.vfs)?;
        vfs.claim()?;
        vfs.write(SESSION_FILE, &record_json)?;
        let committed = vfs.commit(&CommitOptions {
            message,
            kind,
            author: registry.settings.author.clone(),
        });
        vfs.release()?;
        committed?
    };

    // Fast-forward the checked-out working tree. A dirty tree surfaces as a
    // diagnostic, not a turn failure: the commit itself already happened.
    match registry.backend.working_tree_sync(session.branch(), oid) {
        Ok(_) => {}
        Err(err @ GitError::WorkdirDirty { .. }) => {
            session.emit(SessionEvent::Error {
                kind: "WorkdirDirty".to_string(),
                detail: err.to_string(),
            });
        }
        Err(err) => return Err(err.into()),
    }
    tracing::info!(branch = session.branch(), commit = %oid, "turn committed");
    Ok(oid)
}

async fn generate_commit_message(
    registry: &Arc<SessionRegistry>,
    session: &Arc<LiveSession>,
    changed: &[String],
) -> String {
    let fallback = match changed {
        [single] => format!("edit: {single}"),
        many => format!("edit: {} files", many.len()),
    };
    let Some(aux) = registry.aux_model.clone() else {
        return fallback;
    };

    let last_user = session.with_inner(|inner| {
        inner
            .record
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
    });
    let user_context = last_user
        .map(|text| format!("\nUser's request:\n{text}\n"))
        .unwrap_or_default();
    let file_list = changed
        .iter()
        .map(|path| format!("- {path}"))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "Generate a concise git commit message for these changes.\n{user_context}\n\
         Files changed:\n{file_list}\n\n\
         Respond with ONLY the commit message, conventional-commit style, \
         under 72 characters."
    );
    let request = Request {
        messages: vec![ChatMessage::user(prompt)],
        tools: Vec::new(),
        options: RequestOptions {
            model: registry.settings.aux_model.clone(),
            ..RequestOptions::default()
        },
    };
    match complete(aux.as_ref(), request).await {
        Ok(reply) => {
            let message = reply.content.trim().trim_matches('"').trim().to_string();
            if message.is_empty() {
                fallback
            } else {
                let first_line = message.lines().next().map(str::to_string);
                first_line.unwrap_or(message)
            }
        }
        Err(err) => {
            tracing::debug!(%err, "commit message generation failed; using fallback");
            fallback
        }
    }
}
