//! Data models for the upstream Chat Completions API and the widget wire format.
//!
//! This module groups two submodules:
//! - `chat`: the subset of Chat Completions request/response/chunk types the relay reads and writes.
//! - `relay`: the JSON envelope, SSE event and bootstrap shapes exchanged with the browser widget.

pub mod chat;
pub mod relay;

pub use chat::{
    ChatCompletionChunk, ChatCompletionResponse, ChatMessage, OutboundRequest, Role,
    StreamPayload, Transcript,
};
pub use relay::{ChatForm, Envelope, RelayResult, StreamEvent, WidgetBootstrap};
