//! Scripted client for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use crate::client::{EventStream, ModelClient};
use crate::errors::LlmError;
use crate::stream::StreamEvent;
use crate::types::Request;

type Script = Vec<Result<StreamEvent, LlmError>>;

/// Replays pre-recorded event scripts, one per `stream()` call, and keeps
/// every request it was asked for inspection.
#[derive(Default)]
pub struct ScriptedClient {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedClient {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue another script after construction.
    pub fn push_script(&self, script: Script) {
        self.scripts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(script);
    }

    /// Every request observed so far, in call order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn stream(&self, request: Request) -> Result<EventStream, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .ok_or_else(|| LlmError::unavailable("scripted client ran out of scripts"))?;
        // A script whose first entry is an error models a failed open.
        if let Some(Err(err)) = script.first() {
            return Err(err.clone());
        }
        Ok(Box::pin(stream::iter(script)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::complete;
    use crate::stream::StopReason;
    use crate::types::ChatMessage;

    #[tokio::test]
    async fn replays_scripts_in_order() {
        let client = ScriptedClient::new(vec![vec![
            Ok(StreamEvent::TextDelta { text: "hi".into() }),
            Ok(StreamEvent::Stop {
                reason: StopReason::EndTurn,
                usage: None,
            }),
        ]]);

        let request = Request::new(vec![ChatMessage::user("hello")]);
        let message = complete(&client, request).await.expect("message");
        assert_eq!(message.content, "hi");
        assert_eq!(client.requests().len(), 1);

        let err = complete(&client, Request::new(vec![]))
            .await
            .expect_err("script exhausted");
        assert!(err.retryable());
    }
}
