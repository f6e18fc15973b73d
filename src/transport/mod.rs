//! Outbound HTTP calls to the chat-completions API.
//!
//! `send` performs one buffered round trip. `stream` returns a lazy, finite,
//! non-restartable [`ChunkStream`]: each poll issues at most one body read,
//! and dropping the stream drops the upstream body, which releases the
//! connection.

pub mod sse;

use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use http::header;

use crate::error::TransportError;
use crate::models::chat::{
    vendor_error_message, ChatCompletionChunk, ChatCompletionResponse, OutboundRequest,
    StreamPayload,
};
use sse::{Frame, SseLineDecoder};

/// Decoded upstream chunks; ends after `[DONE]`, end of body, or the first error.
pub type ChunkStream =
    Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk, TransportError>> + Send>>;

/// Raw bodies are logged up to this many bytes.
const LOG_BODY_LIMIT: usize = 2048;

#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Buffered call: one POST, whole JSON body parsed strictly.
    pub async fn send(
        &self,
        endpoint: &str,
        api_key: &str,
        req: &OutboundRequest,
        timeout: Duration,
    ) -> Result<ChatCompletionResponse, TransportError> {
        tracing::debug!(
            endpoint,
            model = %req.model,
            messages = req.messages.len(),
            "sending buffered upstream request"
        );
        let resp = self
            .http
            .post(endpoint)
            .bearer_auth(api_key)
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .json(req)
            .send()
            .await?;

        let resp = check_status(resp).await?;
        let bytes = resp.bytes().await?;

        serde_json::from_slice::<ChatCompletionResponse>(&bytes).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %truncate_for_log(&bytes),
                "upstream response did not match the chat completion shape"
            );
            TransportError::Format(e.to_string())
        })
    }

    /// Streaming call. Returns once response headers arrive; the body is then
    /// pulled chunk by chunk through the returned stream.
    pub async fn stream(
        &self,
        endpoint: &str,
        api_key: &str,
        req: &OutboundRequest,
        timeout: Duration,
    ) -> Result<ChunkStream, TransportError> {
        tracing::debug!(
            endpoint,
            model = %req.model,
            messages = req.messages.len(),
            "opening upstream event stream"
        );
        let resp = self
            .http
            .post(endpoint)
            .bearer_auth(api_key)
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .json(req)
            .send()
            .await?;

        let resp = check_status(resp).await?;
        Ok(decode_event_stream(resp.bytes_stream()))
    }
}

/// Turn an upstream SSE byte stream into decoded chunks.
///
/// Malformed `data:` payloads are logged and skipped. On a read error, any
/// data left in the decoder is flushed before the error is yielded.
pub fn decode_event_stream<S, B, E>(body: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<TransportError> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseLineDecoder::new();
        let mut skipped = 0usize;

        loop {
            match body.next().await {
                Some(Ok(bytes)) => {
                    for frame in decoder.push(bytes.as_ref()) {
                        match frame {
                            Frame::Done => return,
                            Frame::Data(payload) => {
                                if let Some(item) = parse_payload(&payload, &mut skipped) {
                                    yield item;
                                }
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    if let Some(Frame::Data(payload)) = decoder.finish() {
                        if let Some(item) = parse_payload(&payload, &mut skipped) {
                            yield item;
                        }
                    }
                    yield Err(e.into());
                    return;
                }
                None => {
                    if let Some(Frame::Data(payload)) = decoder.finish() {
                        if let Some(item) = parse_payload(&payload, &mut skipped) {
                            yield item;
                        }
                    }
                    if skipped > 0 {
                        tracing::warn!(skipped, "upstream stream ended with malformed chunks skipped");
                    }
                    return;
                }
            }
        }
    })
}

fn parse_payload(
    payload: &str,
    skipped: &mut usize,
) -> Option<Result<ChatCompletionChunk, TransportError>> {
    match serde_json::from_str::<StreamPayload>(payload) {
        Ok(StreamPayload::Chunk(chunk)) => Some(Ok(chunk)),
        Ok(StreamPayload::Error(env)) => {
            let msg = env
                .error
                .message
                .unwrap_or_else(|| "unknown upstream error".to_string());
            tracing::warn!(vendor_message = %msg, "upstream sent an error event mid-stream");
            Some(Err(TransportError::Vendor(msg)))
        }
        Err(e) => {
            *skipped += 1;
            tracing::warn!(
                error = %e,
                payload = %truncate_for_log(payload.as_bytes()),
                "skipping malformed upstream chunk"
            );
            None
        }
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.bytes().await.unwrap_or_default();
    let vendor_message = vendor_error_message(&body);
    tracing::warn!(
        status = status.as_u16(),
        body = %truncate_for_log(&body),
        "upstream returned non-success status"
    );
    Err(TransportError::Status {
        status,
        vendor_message,
    })
}

fn truncate_for_log(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= LOG_BODY_LIMIT {
        return text.into_owned();
    }
    let mut end = LOG_BODY_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… ({} bytes)", &text[..end], bytes.len())
}
