//! The index of live sessions.
//!
//! Keyed by branch name, with safety gates: a RUNNING or WAITING_CHILDREN
//! session is always present here (so a completing child can find its
//! parent), and a session only unloads at rest with no observers attached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use forge_git::{GitBackend, Oid, TreeChange};
use forge_llm::ModelClient;
use forge_prompt::PromptManager;
use forge_tools::{ApprovalStore, SessionLookup, SessionView, ToolRegistry};
use forge_vfs::{Vfs, WorkInProgress};

use crate::live::{lock, lock_vfs, LiveSession};
use crate::settings::Settings;
use crate::state::SessionState;
use crate::store::{archive_path, SessionRecord, SESSION_FILE};
use crate::summary::{summarize_file, SummaryCache};
use crate::user_cache::UserStateCache;
use crate::{SessionError, SessionResult};

pub struct SessionRegistry {
    pub(crate) backend: Arc<GitBackend>,
    pub(crate) model: Arc<dyn ModelClient>,
    pub(crate) aux_model: Option<Arc<dyn ModelClient>>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) approvals: Arc<ApprovalStore>,
    pub(crate) settings: Settings,
    user_cache: Option<UserStateCache>,
    summaries: Option<SummaryCache>,
    sessions: StdMutex<HashMap<String, Arc<LiveSession>>>,
}

impl SessionRegistry {
    pub fn new(
        backend: Arc<GitBackend>,
        model: Arc<dyn ModelClient>,
        settings: Settings,
    ) -> SessionResult<Arc<Self>> {
        Self::with_aux_model(backend, model, None, settings)
    }

    pub fn with_aux_model(
        backend: Arc<GitBackend>,
        model: Arc<dyn ModelClient>,
        aux_model: Option<Arc<dyn ModelClient>>,
        settings: Settings,
    ) -> SessionResult<Arc<Self>> {
        let workdir = backend.workdir()?;
        let approvals = Arc::new(ApprovalStore::load(&workdir)?);
        let user_cache = UserStateCache::open_default(&workdir);
        let summaries = SummaryCache::open_default();
        Ok(Arc::new(Self {
            backend,
            model,
            aux_model,
            tools: Arc::new(ToolRegistry::with_builtins()),
            approvals,
            settings,
            user_cache,
            summaries,
            sessions: StdMutex::new(HashMap::new()),
        }))
    }

    pub fn backend(&self) -> &Arc<GitBackend> {
        &self.backend
    }

    pub fn approvals(&self) -> &Arc<ApprovalStore> {
        &self.approvals
    }

    pub fn get(&self, branch: &str) -> Option<Arc<LiveSession>> {
        lock(&self.sessions).get(branch).cloned()
    }

    pub fn loaded_branches(&self) -> Vec<String> {
        let mut branches: Vec<String> = lock(&self.sessions).keys().cloned().collect();
        branches.sort();
        branches
    }

    /// Create an empty committed session record on `branch` if none exists.
    pub fn ensure_session(&self, branch: &str) -> SessionResult<()> {
        let tip = self.backend.branch_tip(branch)?;
        if SessionRecord::load_at(&self.backend, tip)?.is_some() {
            return Ok(());
        }
        let mut vfs = WorkInProgress::open(Arc::clone(&self.backend), branch)?;
        vfs.claim()?;
        SessionRecord::default().write_into(&mut vfs)?;
        vfs.commit(&forge_vfs::CommitOptions {
            message: "initialize session".to_string(),
            kind: forge_git::CommitKind::Prepare,
            author: self.settings.author.clone(),
        })?;
        vfs.release()?;
        Ok(())
    }

    /// Load a session into memory. RUNNING on disk resets to IDLE (crash
    /// recovery, no auto-resume); a WAITING_CHILDREN session also loads its
    /// children so their completions can reach it.
    pub fn load(self: &Arc<Self>, branch: &str) -> SessionResult<Arc<LiveSession>> {
        if let Some(session) = self.get(branch) {
            return Ok(session);
        }
        let tip = self.backend.branch_tip(branch)?;
        let record =
            SessionRecord::load_at(&self.backend, tip)?.ok_or_else(|| SessionError::NoSession {
                branch: branch.to_string(),
            })?;
        let state = match record.state {
            SessionState::Running | SessionState::Suspended => SessionState::Idle,
            other => other,
        };

        let mut prompt = PromptManager::new(self.settings.system_prompt.clone());
        for (index, message) in record.messages.iter().enumerate() {
            match message.role {
                forge_llm::Role::User => prompt.append_user_message(index, &message.content),
                forge_llm::Role::Assistant => prompt.append_assistant_message(
                    index,
                    &message.content,
                    message.tool_calls.as_deref().unwrap_or(&[]),
                ),
                forge_llm::Role::Tool => {
                    let id = message.tool_call_id.as_deref().unwrap_or_default();
                    prompt.append_tool_result(index, id, &message.content, false);
                }
                forge_llm::Role::System => {}
            }
        }

        let mut vfs = WorkInProgress::open(Arc::clone(&self.backend), branch)?;
        vfs.claim()?;
        for path in &record.active_files {
            match vfs.read(path) {
                Ok(content) => prompt.append_file_content(path, &content),
                Err(err) => {
                    tracing::debug!(branch, path, %err, "active file unavailable at load")
                }
            }
        }
        vfs.release()?;

        let children = record.child_branches.clone();
        let session = Arc::new(LiveSession::new(
            branch.to_string(),
            state,
            record,
            prompt,
            vfs,
        ));
        lock(&self.sessions).insert(branch.to_string(), Arc::clone(&session));
        if let Some(cache) = &self.user_cache {
            cache.set_last_branch(branch);
        }
        tracing::info!(branch, state = state.as_str(), "session loaded");

        if state == SessionState::WaitingChildren {
            for child in children {
                if let Err(err) = self.load(&child) {
                    tracing::warn!(branch, child, %err, "failed to load awaited child");
                }
            }
        }
        Ok(session)
    }

    /// Unload a resting session. Refuses while running/waiting or observed.
    pub fn unload(&self, branch: &str) -> SessionResult<()> {
        let session = self.get(branch).ok_or_else(|| SessionError::NoSession {
            branch: branch.to_string(),
        })?;
        let state = session.state();
        if !state.can_unload() {
            return Err(SessionError::Busy {
                branch: branch.to_string(),
                state,
            });
        }
        if session.observer_count() > 0 {
            return Err(SessionError::ObserversAttached {
                branch: branch.to_string(),
            });
        }
        if let Some(cache) = &self.user_cache {
            cache.set_branch_hints(
                branch,
                crate::user_cache::BranchHints {
                    open_files: session.record_snapshot().active_files,
                },
            );
        }
        lock(&self.sessions).remove(branch);
        tracing::info!(branch, "session unloaded");
        Ok(())
    }

    /// Queue a user message and start a turn if the session is at rest.
    pub fn send_message(self: &Arc<Self>, branch: &str, text: &str) -> SessionResult<Arc<LiveSession>> {
        let session = self.load(branch)?;
        session.queue_input(text);
        self.maybe_start_turn(&session);
        Ok(session)
    }

    pub fn cancel_turn(&self, branch: &str) -> bool {
        self.get(branch).map(|s| s.request_cancel()).unwrap_or(false)
    }

    pub(crate) fn maybe_start_turn(self: &Arc<Self>, session: &Arc<LiveSession>) {
        let state = session.state();
        let startable = matches!(state, SessionState::Idle | SessionState::WaitingInput);
        if startable && !session.has_live_turn() {
            self.spawn_turn(session);
        }
    }

    pub(crate) fn spawn_turn(self: &Arc<Self>, session: &Arc<LiveSession>) {
        let cancel = session.install_cancel();
        // Mark the session busy before the task is scheduled, so a sibling
        // observing it (e.g. a parent's wait check right after spawn) never
        // sees a freshly started session as resting.
        if let Err(err) = session.set_state(SessionState::Running) {
            tracing::warn!(branch = session.branch(), %err, "turn not started");
            session.clear_cancel();
            return;
        }
        let registry = Arc::clone(self);
        let session = Arc::clone(session);
        tokio::spawn(async move {
            crate::turn::run_turn(registry, session, cancel).await;
        });
    }

    /// Process startup: load every session persisted as WAITING_CHILDREN
    /// (with its children) and reset crashed RUNNING sessions to IDLE. No
    /// session auto-resumes; WAITING_CHILDREN parents resume when a child
    /// completes, everything else waits for the user.
    pub fn startup_scan(self: &Arc<Self>) -> SessionResult<Vec<String>> {
        let mut loaded = Vec::new();
        for branch in self.backend.local_branches()? {
            let tip = self.backend.branch_tip(&branch)?;
            let record = match SessionRecord::load_at(&self.backend, tip) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(branch, %err, "skipping unreadable session record");
                    continue;
                }
            };
            if matches!(
                record.state,
                SessionState::WaitingChildren | SessionState::Running
            ) && self.load(&branch).is_ok()
            {
                loaded.push(branch);
            }
        }
        Ok(loaded)
    }

    /// A child reached a stopping point: wake its waiting parent. If the
    /// parent's wait survived a restart (no in-flight turn), start a turn to
    /// re-run the pending wait.
    pub(crate) fn notify_child_done(self: &Arc<Self>, child_branch: &str) {
        let parent_branch = match self.get(child_branch) {
            Some(child) => child.record_snapshot().parent_branch,
            None => None,
        };
        let Some(parent_branch) = parent_branch else {
            return;
        };
        let Some(parent) = self.get(&parent_branch) else {
            tracing::warn!(
                child = child_branch,
                parent = %parent_branch,
                "waiting parent is not loaded"
            );
            return;
        };
        if parent.has_live_turn() {
            // Notify unconditionally; the permit survives until the waiter
            // polls, which closes the race where the child finished while
            // the parent was still persisting its pending wait.
            parent.child_notify.notify_one();
        } else if parent.state() == SessionState::WaitingChildren {
            tracing::info!(parent = %parent_branch, "resuming recovered wait");
            self.spawn_turn(&parent);
        }
    }

    /// Merge a finished child branch into its parent. Session-file conflicts
    /// resolve by archiving the child's record under `.forge/merged/` and
    /// keeping the parent's; any other conflict fails the merge.
    pub fn merge_child(&self, parent_branch: &str, child_branch: &str) -> SessionResult<Oid> {
        if let Some(parent) = self.get(parent_branch) {
            let busy = !matches!(
                parent.state(),
                SessionState::Idle | SessionState::Completed | SessionState::WaitingInput
            );
            if busy {
                return Err(SessionError::Busy {
                    branch: parent_branch.to_string(),
                    state: parent.state(),
                });
            }
            let vfs = lock_vfs(&parent.vfs)?;
            if vfs.has_changes() {
                return Err(SessionError::Busy {
                    branch: parent_branch.to_string(),
                    state: parent.state(),
                });
            }
        }

        let ours = self.backend.branch_tip(parent_branch)?;
        let theirs = self.backend.branch_tip(child_branch)?;
        let base = self
            .backend
            .merge_base(ours, theirs)?
            .ok_or_else(|| SessionError::Git(forge_git::GitError::MergeConflict {
                paths: vec!["<unrelated histories>".to_string()],
            }))?;

        // Neutralise the session file before merging: the child's tree gets
        // the parent's record (so the path cannot conflict) and the child's
        // own record is archived alongside.
        let mut rewrites: Vec<(String, TreeChange)> = Vec::new();
        match self.backend.read_file(ours, SESSION_FILE)? {
            Some(parent_record) => {
                rewrites.push((SESSION_FILE.to_string(), TreeChange::Blob(parent_record)))
            }
            None => rewrites.push((SESSION_FILE.to_string(), TreeChange::Delete)),
        }
        if let Some(child_record) = self.backend.read_file(theirs, SESSION_FILE)? {
            rewrites.push((archive_path(child_branch), TreeChange::Blob(child_record)));
        }
        let their_tree = self
            .backend
            .build_tree(Some(self.backend.tree_of(theirs)?), &rewrites)?;

        let merged = match self.backend.three_way_merge(
            self.backend.tree_of(base)?,
            self.backend.tree_of(ours)?,
            their_tree,
        )? {
            forge_git::MergeOutcome::Clean(tree) => tree,
            forge_git::MergeOutcome::Conflicts(paths) => {
                return Err(SessionError::Git(forge_git::GitError::MergeConflict {
                    paths,
                }))
            }
        };

        let commit = self.backend.commit_merge(
            parent_branch,
            merged,
            &[ours, theirs],
            &format!("merge session '{child_branch}'"),
            &self.settings.author,
        )?;

        // A loaded parent's view must follow the branch forward.
        if let Some(parent) = self.get(parent_branch) {
            let mut vfs = lock_vfs(&parent.vfs)?;
            *vfs = WorkInProgress::open(Arc::clone(&self.backend), parent_branch)?;
        }
        tracing::info!(parent = parent_branch, child = child_branch, %commit, "merged child");
        Ok(commit)
    }

    /// Generate (or reuse cached) file summaries for a session's repository
    /// view and install them in its prompt stream. Requires an auxiliary
    /// model; without one this is a no-op.
    pub async fn generate_summaries(self: &Arc<Self>, branch: &str) -> SessionResult<usize> {
        let session = self.load(branch)?;
        let Some(aux) = self.aux_model.clone() else {
            tracing::warn!(branch, "no auxiliary model configured; skipping summaries");
            return Ok(0);
        };

        // Snapshot content without holding any lock across an await.
        let files: Vec<(String, String, String)> = {
            let mut vfs = lock_vfs(&session.vfs)?;
            vfs.claim()?;
            let base = vfs.base_commit();
            let mut out = Vec::new();
            for path in vfs.list()? {
                if path.starts_with(".forge/") || vfs.is_binary(&path) {
                    continue;
                }
                let Ok(content) = vfs.read(&path) else {
                    continue;
                };
                let oid = match self.backend.blob_oid_at(base, &path)? {
                    Some(oid) => oid.to_string(),
                    None => {
                        use sha2::Digest as _;
                        hex::encode(sha2::Sha256::digest(content.as_bytes()))
                    }
                };
                out.push((path, content, oid));
            }
            vfs.release()?;
            out
        };

        let mut count = 0usize;
        for (path, content, oid) in files {
            let cached = self
                .summaries
                .as_ref()
                .and_then(|cache| cache.get(&path, &oid));
            let summary = match cached {
                Some(summary) => summary,
                None => {
                    match summarize_file(aux.as_ref(), &self.settings.aux_model, &path, &content)
                        .await
                    {
                        Ok(summary) => {
                            if let Some(cache) = &self.summaries {
                                cache.put(&path, &oid, &summary);
                            }
                            summary
                        }
                        Err(err) => {
                            tracing::warn!(path, %err, "summary generation failed");
                            continue;
                        }
                    }
                }
            };
            session.with_inner(|inner| inner.prompt.add_summary(&path, &summary));
            count += 1;
        }
        Ok(count)
    }
}

impl SessionLookup for SessionRegistry {
    fn session_view(&self, branch: &str) -> Option<SessionView> {
        let session = self.get(branch)?;
        let record = session.record_snapshot();
        Some(SessionView {
            state: session.state().as_str().to_string(),
            parent_branch: record.parent_branch.clone(),
            yield_message: session.yield_message(),
            last_assistant: record.last_assistant_text(),
        })
    }
}
