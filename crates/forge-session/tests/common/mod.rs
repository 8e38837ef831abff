//! Shared harness: a real temp repository, a scripted model, a registry.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;
use tokio::sync::broadcast;

use forge_git::{Author, CommitKind, GitBackend, Oid};
use forge_llm::{ScriptedClient, StopReason, StreamEvent};
use forge_session::{SessionEvent, SessionRecord, SessionRegistry, Settings};
use forge_vfs::{CommitOptions, Vfs, WorkInProgress};

pub struct Harness {
    pub dir: TempDir,
    pub backend: Arc<GitBackend>,
    pub client: Arc<ScriptedClient>,
    pub registry: Arc<SessionRegistry>,
}

impl Harness {
    /// Repo on `main` seeded with `files` plus an empty session record, all
    /// in one commit. No auxiliary model: commit messages use the local
    /// fallback, keeping the scripted queue predictable.
    pub fn new(files: &[(&str, &str)]) -> Result<Self> {
        Self::build(files, false)
    }

    /// Same, but the scripted client doubles as the auxiliary model.
    pub fn new_with_aux(files: &[(&str, &str)]) -> Result<Self> {
        Self::build(files, true)
    }

    fn build(files: &[(&str, &str)], with_aux: bool) -> Result<Self> {
        let dir = TempDir::new()?;
        let backend = Arc::new(GitBackend::init(dir.path(), "main", &Author::default())?);

        let mut vfs = WorkInProgress::open(Arc::clone(&backend), "main")?;
        vfs.claim()?;
        for (path, contents) in files {
            vfs.write(path, contents)?;
        }
        SessionRecord::default().write_into(&mut vfs)?;
        vfs.commit(&CommitOptions {
            message: "seed".to_string(),
            kind: CommitKind::Major,
            author: Author::default(),
        })?;
        vfs.release()?;

        let client = Arc::new(ScriptedClient::default());
        let aux = with_aux.then(|| client.clone() as Arc<dyn forge_llm::ModelClient>);
        let registry = SessionRegistry::with_aux_model(
            Arc::clone(&backend),
            client.clone(),
            aux,
            Settings::default(),
        )?;
        Ok(Self {
            dir,
            backend,
            client,
            registry,
        })
    }

    pub fn tip(&self, branch: &str) -> Oid {
        self.backend.branch_tip(branch).expect("branch tip")
    }

    pub fn file_at_tip(&self, branch: &str, path: &str) -> Option<String> {
        let tip = self.tip(branch);
        self.backend
            .read_file(tip, path)
            .expect("read")
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn record_at_tip(&self, branch: &str) -> SessionRecord {
        let tip = self.tip(branch);
        SessionRecord::load_at(&self.backend, tip)
            .expect("record parse")
            .expect("record present")
    }
}

pub fn text(content: &str) -> StreamEvent {
    StreamEvent::TextDelta {
        text: content.to_string(),
    }
}

pub fn stop(reason: StopReason) -> StreamEvent {
    StreamEvent::Stop {
        reason,
        usage: None,
    }
}

/// A structured tool call as three stream events.
pub fn tool_call(index: usize, id: &str, name: &str, args: serde_json::Value) -> Vec<StreamEvent> {
    vec![
        StreamEvent::ToolCallStart {
            index,
            id: id.to_string(),
            name: name.to_string(),
        },
        StreamEvent::ToolCallDelta {
            index,
            fragment: args.to_string(),
        },
    ]
}

pub fn script(events: Vec<StreamEvent>) -> Vec<Result<StreamEvent, forge_llm::LlmError>> {
    events.into_iter().map(Ok).collect()
}

/// Wait for the turn to end; returns the commit id on success, `None` on a
/// cancelled turn, and panics on an error event.
pub async fn wait_turn(rx: &mut broadcast::Receiver<SessionEvent>) -> Option<String> {
    wait_turn_allowing_errors(rx, false).await
}

pub async fn wait_turn_allowing_errors(
    rx: &mut broadcast::Receiver<SessionEvent>,
    allow_errors: bool,
) -> Option<String> {
    let deadline = Duration::from_secs(20);
    tokio::time::timeout(deadline, async {
        loop {
            match rx.recv().await.expect("event stream open") {
                SessionEvent::TurnFinished { commit } => return commit,
                SessionEvent::Error { kind, detail } if !allow_errors => {
                    panic!("turn errored: {kind}: {detail}")
                }
                _ => {}
            }
        }
    })
    .await
    .expect("turn finished within deadline")
}

/// Wait until the session reaches ERROR, returning the error kind.
pub async fn wait_error(rx: &mut broadcast::Receiver<SessionEvent>) -> String {
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            if let SessionEvent::Error { kind, .. } = rx.recv().await.expect("event stream open") {
                return kind;
            }
        }
    })
    .await
    .expect("error within deadline")
}
