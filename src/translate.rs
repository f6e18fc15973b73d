//! Response translation: upstream shapes in, widget wire format out.
//!
//! Both modes read the session transcript, build the outbound request, call
//! upstream and, on success only, write the transcript back with the
//! assistant reply appended.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};

use crate::builder::build_request;
use crate::config::RelayConfig;
use crate::error::{RelayError, TransportError};
use crate::models::chat::{ChatCompletionResponse, ChatMessage, Transcript};
use crate::models::relay::{RelayResult, StreamEvent};
use crate::session::{SessionId, SessionStore};
use crate::transport::UpstreamClient;
use crate::validate::ValidatedRequest;

/// Everything one relay turn needs. `config` is a per-request snapshot.
#[derive(Clone)]
pub struct RelayContext {
    pub config: RelayConfig,
    pub store: Arc<dyn SessionStore>,
    pub upstream: UpstreamClient,
}

/// One item of the SSE body sent to the widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Event(StreamEvent),
    Done,
}

/// Content and optional reasoning of the first choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantReply {
    pub content: String,
    pub reasoning: Option<String>,
}

/// Pick the first choice out of a buffered response.
pub fn extract_reply(resp: ChatCompletionResponse) -> Result<AssistantReply, TransportError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::Format("response has no choices".into()))?;
    let content = choice
        .message
        .content
        .ok_or_else(|| TransportError::Format("first choice has no content".into()))?;
    let reasoning = choice
        .message
        .reasoning_content
        .filter(|r| !r.trim().is_empty());
    Ok(AssistantReply { content, reasoning })
}

impl RelayContext {
    /// Session the reply is attributed to: the caller's, or a fresh one.
    /// `None` when conversation memory is disabled.
    fn resolve_session(&self, requested: Option<SessionId>) -> Option<SessionId> {
        if !self.config.enable_conversation {
            return None;
        }
        Some(requested.unwrap_or_else(SessionId::generate))
    }

    async fn load_transcript(&self, session: Option<&SessionId>) -> Transcript {
        let Some(id) = session.filter(|_| self.config.enable_conversation) else {
            return Vec::new();
        };
        match self.store.get(id.as_str()).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "failed to load transcript; starting fresh");
                Vec::new()
            }
        }
    }

    async fn save_transcript(&self, session: Option<&SessionId>, transcript: &Transcript) {
        let Some(id) = session else {
            return;
        };
        if let Err(e) = self
            .store
            .put(id.as_str(), transcript, self.config.session_ttl())
            .await
        {
            tracing::warn!(session_id = %id, error = %e, "failed to save transcript");
        }
    }

    /// Buffered turn: one upstream round trip, one result.
    pub async fn relay_buffered(&self, req: ValidatedRequest) -> Result<RelayResult, RelayError> {
        let prior = self.load_transcript(req.session_id.as_ref()).await;
        let outbound = build_request(&req.message, prior, &self.config, false);

        let resp = self
            .upstream
            .send(
                &self.config.endpoint,
                &self.config.api_key,
                &outbound,
                self.config.request_timeout(),
            )
            .await?;
        let reply = extract_reply(resp)?;

        let session = self.resolve_session(req.session_id);
        let mut transcript = outbound.messages;
        transcript.push(ChatMessage::assistant(reply.content.clone()));
        self.save_transcript(session.as_ref(), &transcript).await;

        let thoughts = reply
            .reasoning
            .filter(|_| self.config.show_reasoning)
            .unwrap_or_default();
        tracing::info!(
            session_id = session.as_ref().map(|s| s.as_str()).unwrap_or(""),
            reply_chars = reply.content.chars().count(),
            history = transcript.len(),
            "buffered relay turn complete"
        );
        Ok(RelayResult {
            message: reply.content,
            has_thoughts: !thoughts.is_empty(),
            thoughts,
            session_id: session.map(|s| s.to_string()).unwrap_or_default(),
        })
    }

    /// Streaming turn. Emits cumulative `text`/`thoughts` after every chunk
    /// that carries a delta, then `[DONE]`. Errors become one error event
    /// followed by `[DONE]`; the transcript is only written on clean
    /// completion.
    pub fn relay_stream(self, req: ValidatedRequest) -> impl Stream<Item = RelayFrame> + Send {
        async_stream::stream! {
            let session = self.resolve_session(req.session_id.clone());
            let sid = session.as_ref().map(|s| s.to_string()).unwrap_or_default();

            let prior = self.load_transcript(req.session_id.as_ref()).await;
            let outbound = build_request(&req.message, prior, &self.config, true);

            let mut chunks = match self
                .upstream
                .stream(
                    &self.config.endpoint,
                    &self.config.api_key,
                    &outbound,
                    self.config.stream_timeout(),
                )
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    let err = RelayError::from(e);
                    err.log();
                    yield RelayFrame::Event(err.stream_event(&sid));
                    yield RelayFrame::Done;
                    return;
                }
            };

            let show_reasoning = self.config.show_reasoning;
            let mut text = String::new();
            let mut thoughts = String::new();
            let mut failure: Option<TransportError> = None;

            while let Some(item) = chunks.next().await {
                let chunk = match item {
                    Ok(c) => c,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                };
                let mut changed = false;
                if let Some(delta) = chunk.content().filter(|d| !d.is_empty()) {
                    text.push_str(delta);
                    changed = true;
                }
                if show_reasoning {
                    if let Some(delta) = chunk.reasoning().filter(|d| !d.is_empty()) {
                        thoughts.push_str(delta);
                        changed = true;
                    }
                }
                if changed {
                    yield RelayFrame::Event(StreamEvent {
                        text: Some(text.clone()),
                        thoughts: (!thoughts.is_empty()).then(|| thoughts.clone()),
                        session_id: sid.clone(),
                        error: None,
                    });
                }
            }
            drop(chunks);

            if failure.is_none() && text.is_empty() {
                failure = Some(TransportError::Format("stream ended without content".into()));
            }
            if let Some(e) = failure {
                let err = RelayError::from(e);
                err.log();
                if !text.is_empty() {
                    tracing::info!(session_id = %sid, partial_chars = text.chars().count(), "stream failed after partial output");
                }
                yield RelayFrame::Event(err.stream_event(&sid));
                yield RelayFrame::Done;
                return;
            }

            let mut transcript = outbound.messages;
            transcript.push(ChatMessage::assistant(text.clone()));
            self.save_transcript(session.as_ref(), &transcript).await;
            tracing::info!(
                session_id = %sid,
                reply_chars = text.chars().count(),
                history = transcript.len(),
                "streaming relay turn complete"
            );
            yield RelayFrame::Done;
        }
    }
}
