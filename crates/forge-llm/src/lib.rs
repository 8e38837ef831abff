//! Thin model-streaming interface.
//!
//! The core consumes models through [`ModelClient`]: send a request, receive
//! a stream of [`StreamEvent`]s, cancel by dropping the stream. Provider HTTP
//! specifics live outside the workspace; hosts supply an implementation and
//! tests use [`ScriptedClient`].

mod accumulator;
mod client;
mod errors;
mod scripted;
mod stream;
mod types;

pub use accumulator::StreamAccumulator;
pub use client::{complete, EventStream, ModelClient};
pub use errors::LlmError;
pub use scripted::ScriptedClient;
pub use stream::{StopReason, StreamEvent, Usage};
pub use types::{ChatMessage, Request, RequestOptions, Role, ToolCallData, ToolDefinition};
