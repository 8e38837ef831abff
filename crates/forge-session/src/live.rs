//! The in-memory session instance.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use tokio::sync::{broadcast, oneshot, Notify};
use tokio_util::sync::CancellationToken;

use forge_llm::{ChatMessage, ToolCallData};
use forge_prompt::PromptManager;
use forge_vfs::WorkInProgress;

use crate::events::SessionEvent;
use crate::state::{ensure_transition, SessionState};
use crate::store::SessionRecord;
use crate::{SessionError, SessionResult};

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub(crate) struct SessionInner {
    pub record: SessionRecord,
    pub prompt: PromptManager,
    /// Short status shown to a waiting parent while this session is blocked.
    pub yield_message: Option<String>,
}

/// A live session exclusively owns its writable VFS and pending overlay; the
/// turn executor and tool workers hand the claim back and forth. Observers
/// attach and detach but never own.
pub struct LiveSession {
    branch: String,
    state: StdMutex<SessionState>,
    pub(crate) vfs: Arc<StdMutex<WorkInProgress>>,
    pub(crate) inner: StdMutex<SessionInner>,
    events: broadcast::Sender<SessionEvent>,
    pub(crate) pending_inputs: StdMutex<VecDeque<String>>,
    /// Pinged by the registry when one of this session's children reaches a
    /// stopping point.
    pub(crate) child_notify: Notify,
    cancel: StdMutex<Option<CancellationToken>>,
    observers: AtomicUsize,
    /// Host's pending approval decision for a suspended tool call.
    pub(crate) approval_decision: StdMutex<Option<oneshot::Sender<bool>>>,
}

impl LiveSession {
    pub(crate) fn new(
        branch: String,
        state: SessionState,
        record: SessionRecord,
        prompt: PromptManager,
        vfs: WorkInProgress,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            branch,
            state: StdMutex::new(state),
            vfs: Arc::new(StdMutex::new(vfs)),
            inner: StdMutex::new(SessionInner {
                record,
                prompt,
                yield_message: None,
            }),
            events,
            pending_inputs: StdMutex::new(VecDeque::new()),
            child_notify: Notify::new(),
            cancel: StdMutex::new(None),
            observers: AtomicUsize::new(0),
            approval_decision: StdMutex::new(None),
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Validated state change; emits `StateChanged` on an actual change.
    pub(crate) fn set_state(&self, to: SessionState) -> SessionResult<()> {
        let mut state = lock(&self.state);
        let from = *state;
        ensure_transition(from, to)?;
        if from != to {
            *state = to;
            drop(state);
            tracing::debug!(branch = %self.branch, from = from.as_str(), to = to.as_str(), "state");
            self.emit(SessionEvent::StateChanged { state: to });
        }
        Ok(())
    }

    /// Host boundary: the agent's last reply was a question for the user.
    pub fn mark_waiting_input(&self) -> SessionResult<()> {
        self.set_state(SessionState::WaitingInput)
    }

    /// Host boundary: this session's task is finished.
    pub fn mark_completed(&self) -> SessionResult<()> {
        self.set_state(SessionState::Completed)
    }

    // ---- observers ---------------------------------------------------------

    /// Subscribe to events and count as an attached observer until the guard
    /// drops. A session with observers cannot be unloaded.
    pub fn attach_observer(self: &Arc<Self>) -> (ObserverGuard, broadcast::Receiver<SessionEvent>) {
        self.observers.fetch_add(1, Ordering::SeqCst);
        (
            ObserverGuard {
                session: Arc::clone(self),
            },
            self.events.subscribe(),
        )
    }

    /// Event receiver without observer accounting (internal consumers).
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.load(Ordering::SeqCst)
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No receivers is fine; events are fire-and-forget.
        let _ = self.events.send(event);
    }

    // ---- inputs and cancellation ------------------------------------------

    /// Queue a user message; it is consumed at the next turn boundary.
    pub fn queue_input(&self, text: impl Into<String>) {
        lock(&self.pending_inputs).push_back(text.into());
    }

    pub(crate) fn drain_inputs(&self) -> Vec<String> {
        lock(&self.pending_inputs).drain(..).collect()
    }

    pub fn has_pending_inputs(&self) -> bool {
        !lock(&self.pending_inputs).is_empty()
    }

    pub(crate) fn install_cancel(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *lock(&self.cancel) = Some(token.clone());
        token
    }

    pub(crate) fn clear_cancel(&self) {
        *lock(&self.cancel) = None;
    }

    /// Request cancellation of the in-flight turn, if any.
    pub fn request_cancel(&self) -> bool {
        match lock(&self.cancel).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn has_live_turn(&self) -> bool {
        lock(&self.cancel).is_some()
    }

    // ---- approvals ---------------------------------------------------------

    /// Resolve a pending `ApprovalRequired` suspension. Returns false when
    /// nothing was waiting.
    pub fn resolve_approval(&self, approve: bool) -> bool {
        match lock(&self.approval_decision).take() {
            Some(sender) => sender.send(approve).is_ok(),
            None => false,
        }
    }

    pub(crate) fn park_approval(&self) -> oneshot::Receiver<bool> {
        let (sender, receiver) = oneshot::channel();
        *lock(&self.approval_decision) = Some(sender);
        receiver
    }

    // ---- record access -----------------------------------------------------

    /// Run a closure over the record and prompt. Never held across awaits.
    pub(crate) fn with_inner<R>(&self, f: impl FnOnce(&mut SessionInner) -> R) -> R {
        f(&mut lock(&self.inner))
    }

    pub fn record_snapshot(&self) -> SessionRecord {
        self.with_inner(|inner| inner.record.clone())
    }

    pub fn yield_message(&self) -> Option<String> {
        self.with_inner(|inner| inner.yield_message.clone())
    }

    pub(crate) fn push_user(&self, text: &str) {
        let message = ChatMessage::user(text);
        self.with_inner(|inner| {
            let index = inner.record.messages.len();
            inner.prompt.append_user_message(index, text);
            inner.record.messages.push(message.clone());
        });
        self.emit(SessionEvent::MessageAppended { message });
    }

    pub(crate) fn push_assistant(&self, text: &str, calls: &[ToolCallData]) {
        let message = ChatMessage::assistant_with_calls(text, calls.to_vec());
        self.with_inner(|inner| {
            let index = inner.record.messages.len();
            inner.prompt.append_assistant_message(index, text, calls);
            inner.record.messages.push(message.clone());
        });
        self.emit(SessionEvent::MessageAppended { message });
    }

    /// Append a tool-result message; returns the display id assigned in the
    /// prompt stream.
    pub(crate) fn push_tool_result(&self, tool_call_id: &str, text: &str, ephemeral: bool) -> u32 {
        let message = ChatMessage::tool_result(tool_call_id, text);
        let display = self.with_inner(|inner| {
            let index = inner.record.messages.len();
            let display = inner
                .prompt
                .append_tool_result(index, tool_call_id, text, ephemeral);
            inner.record.messages.push(message.clone());
            display
        });
        self.emit(SessionEvent::MessageAppended { message });
        display
    }
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("branch", &self.branch)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Keeps the session counted as observed; dropping detaches.
pub struct ObserverGuard {
    session: Arc<LiveSession>,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.session.observers.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Access the VFS mutex, surfacing poisoning as the structured error instead
/// of recovering: a panic while the overlay was claimed means its contents
/// can no longer be trusted.
pub(crate) fn lock_vfs(
    vfs: &StdMutex<WorkInProgress>,
) -> SessionResult<MutexGuard<'_, WorkInProgress>> {
    vfs.lock().map_err(|_| {
        SessionError::Vfs(forge_vfs::VfsError::OverlayPoisoned {
            detail: "a worker panicked while holding the overlay".to_string(),
        })
    })
}
