//! The client trait the core consumes.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::accumulator::StreamAccumulator;
use crate::errors::LlmError;
use crate::types::{ChatMessage, Request};

/// Stream of unified events. Dropping the stream cancels the request.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<crate::StreamEvent, LlmError>> + Send>>;

/// Provider-agnostic streaming client. Hosts implement this once per
/// provider; the core never sees HTTP.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn stream(&self, request: Request) -> Result<EventStream, LlmError>;
}

/// Drive a stream to completion and fold it into one assistant message.
/// Used for auxiliary one-shot calls (commit messages, summaries, scout).
pub async fn complete(client: &dyn ModelClient, request: Request) -> Result<ChatMessage, LlmError> {
    let mut stream = client.stream(request).await?;
    let mut acc = StreamAccumulator::default();
    while let Some(event) = stream.next().await {
        acc.process(&event?);
    }
    Ok(acc.into_message())
}
