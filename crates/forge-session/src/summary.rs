//! File summaries: a short description per (content, path), cached on disk
//! so identical content never re-summarises.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

use forge_llm::{complete, ChatMessage, LlmError, ModelClient, Request, RequestOptions};

const SUMMARY_SOURCE_BUDGET: usize = 10_000;

/// XDG-style cache of generated summaries, keyed by content hash and path.
#[derive(Clone, Debug)]
pub struct SummaryCache {
    dir: PathBuf,
}

impl SummaryCache {
    /// Cache under the user's cache directory.
    pub fn open_default() -> Option<Self> {
        dirs::cache_dir().map(|base| Self {
            dir: base.join("forge").join("summaries"),
        })
    }

    /// Cache rooted at an explicit directory (tests, custom hosts).
    pub fn open_at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn key(&self, path: &str, blob_oid: &str) -> PathBuf {
        let digest = Sha256::digest(format!("{blob_oid}:{path}").as_bytes());
        self.dir.join(hex::encode(digest))
    }

    pub fn get(&self, path: &str, blob_oid: &str) -> Option<String> {
        std::fs::read_to_string(self.key(path, blob_oid)).ok()
    }

    pub fn put(&self, path: &str, blob_oid: &str, summary: &str) {
        let target = self.key(path, blob_oid);
        if std::fs::create_dir_all(&self.dir).is_err() {
            return;
        }
        if let Err(err) = std::fs::write(&target, summary) {
            tracing::warn!(?target, %err, "summary cache write failed");
        }
    }
}

/// Ask the auxiliary model for a micro-README of one file.
pub async fn summarize_file(
    client: &dyn ModelClient,
    model: &str,
    path: &str,
    content: &str,
) -> Result<String, LlmError> {
    let mut body = content;
    if body.len() > SUMMARY_SOURCE_BUDGET {
        let mut cut = SUMMARY_SOURCE_BUDGET;
        while cut > 0 && !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body = &body[..cut];
    }
    let prompt = format!(
        "Generate a micro-README for this file listing its public interfaces.\n\n\
         File: {path}\n\n```\n{body}\n```\n\n\
         Format as a bulleted list of names with one-line descriptions. Only \
         public items; keep each line under 80 chars; respond with ONLY the list."
    );
    let request = Request {
        messages: vec![ChatMessage::user(prompt)],
        tools: Vec::new(),
        options: RequestOptions {
            model: model.to_string(),
            ..RequestOptions::default()
        },
    };
    let reply = complete(client, request).await?;
    Ok(reply.content.trim().trim_matches('"').to_string())
}
