//! Relay error taxonomy and the classifier that turns it into widget text.
//!
//! Every failure is rendered in the wire shape the caller asked for: a
//! `{success:false,data}` envelope for buffered calls, or an SSE error event
//! followed by `[DONE]` for streaming calls. Internal detail (vendor bodies,
//! socket errors) is logged, never forwarded.

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use thiserror::Error;

use crate::models::relay::{Envelope, StreamEvent};

/// Client-caused failures detected before any upstream call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid security token")]
    InvalidToken,
    #[error("message is empty")]
    EmptyMessage,
    #[error("message has {actual} characters, limit is {max}")]
    MessageTooLong { max: usize, actual: usize },
    #[error("api key is not configured")]
    MissingApiKey,
    #[error("endpoint {0} is not allowed")]
    DisallowedEndpoint(String),
}

/// Failures talking to the upstream API.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("upstream timed out: {0}")]
    Timeout(String),
    #[error("upstream host could not be resolved: {0}")]
    Dns(String),
    #[error("upstream connection failed: {0}")]
    Connect(String),
    #[error("upstream request failed: {0}")]
    Request(String),
    #[error("upstream returned HTTP {status}")]
    Status {
        status: StatusCode,
        vendor_message: Option<String>,
    },
    #[error("upstream reported an error mid-stream: {0}")]
    Vendor(String),
    #[error("unexpected upstream response format: {0}")]
    Format(String),
}

impl TransportError {
    /// Map a reqwest failure onto the transport taxonomy.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let detail = error_chain(&err);
        if err.is_timeout() {
            TransportError::Timeout(detail)
        } else if looks_like_dns_failure(&detail) {
            TransportError::Dns(detail)
        } else if err.is_connect() {
            TransportError::Connect(detail)
        } else {
            TransportError::Request(detail)
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::from_reqwest(err)
    }
}

/// Any failure of one relay turn.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// User-facing error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidToken,
    EmptyMessage,
    MessageTooLong,
    MissingApiKey,
    DisallowedEndpoint,
    ConnectTimeout,
    DnsFailure,
    Unauthorized,
    NotFound,
    RateLimited,
    UnexpectedFormat,
    UpstreamStatus,
    Transport,
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Validation(v) => match v {
                ValidationError::InvalidToken => ErrorKind::InvalidToken,
                ValidationError::EmptyMessage => ErrorKind::EmptyMessage,
                ValidationError::MessageTooLong { .. } => ErrorKind::MessageTooLong,
                ValidationError::MissingApiKey => ErrorKind::MissingApiKey,
                ValidationError::DisallowedEndpoint(_) => ErrorKind::DisallowedEndpoint,
            },
            RelayError::Transport(t) => match t {
                TransportError::Timeout(_) => ErrorKind::ConnectTimeout,
                TransportError::Dns(_) => ErrorKind::DnsFailure,
                TransportError::Status { status, .. } => match *status {
                    StatusCode::UNAUTHORIZED => ErrorKind::Unauthorized,
                    StatusCode::NOT_FOUND => ErrorKind::NotFound,
                    StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
                    _ => ErrorKind::UpstreamStatus,
                },
                TransportError::Format(_) => ErrorKind::UnexpectedFormat,
                TransportError::Connect(_)
                | TransportError::Request(_)
                | TransportError::Vendor(_) => ErrorKind::Transport,
            },
        }
    }

    /// Text shown to the widget user.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::InvalidToken => {
                "Invalid security token. Please reload the page and try again.".into()
            }
            ErrorKind::EmptyMessage => "Message is required.".into(),
            ErrorKind::MessageTooLong => match self {
                RelayError::Validation(ValidationError::MessageTooLong { max, .. }) => {
                    format!("Message is too long (maximum {max} characters).")
                }
                _ => "Message is too long.".into(),
            },
            ErrorKind::MissingApiKey => {
                "API configuration is incomplete. Please set an API key.".into()
            }
            ErrorKind::DisallowedEndpoint => {
                "API endpoint is not allowed. Please check your endpoint setting.".into()
            }
            ErrorKind::ConnectTimeout => {
                "API connection timed out. Please check your network connection or try again later."
                    .into()
            }
            ErrorKind::DnsFailure => {
                "Request failed: cannot resolve API host. Please check your API endpoint setting."
                    .into()
            }
            ErrorKind::Unauthorized => {
                "Request rejected: invalid API key. Please check your settings.".into()
            }
            ErrorKind::NotFound => {
                "Request failed: endpoint/app not found. Please check your endpoint setting."
                    .into()
            }
            ErrorKind::RateLimited => "API rate limit exceeded. Please try again later.".into(),
            ErrorKind::UnexpectedFormat => {
                "The AI service returned an unexpected response format. Please try again later."
                    .into()
            }
            ErrorKind::UpstreamStatus => match self {
                RelayError::Transport(TransportError::Status { status, .. }) => format!(
                    "API request failed (HTTP {}). Please try again later.",
                    status.as_u16()
                ),
                _ => "API request failed. Please try again later.".into(),
            },
            ErrorKind::Transport => "API request failed. Please try again later.".into(),
        }
    }

    /// Log the full detail server-side.
    pub fn log(&self) {
        match self {
            RelayError::Validation(e) => {
                tracing::info!(error = %e, kind = ?self.kind(), "relay request rejected")
            }
            RelayError::Transport(TransportError::Status {
                status,
                vendor_message,
            }) => tracing::warn!(
                status = status.as_u16(),
                vendor_message = vendor_message.as_deref().unwrap_or(""),
                kind = ?self.kind(),
                "upstream returned an error status"
            ),
            RelayError::Transport(e) => {
                tracing::error!(error = %e, kind = ?self.kind(), "upstream call failed")
            }
        }
    }

    /// Buffered rendering: `{success:false, data:"..."}` with HTTP 200 so the
    /// widget reads the envelope instead of taking its transport-error path.
    pub fn into_json_response(self) -> Response {
        self.log();
        (StatusCode::OK, Json(Envelope::err(self.user_message()))).into_response()
    }

    /// Streaming rendering: the error event carried before `[DONE]`.
    pub fn stream_event(&self, session_id: &str) -> StreamEvent {
        StreamEvent {
            error: Some(self.user_message()),
            session_id: session_id.to_string(),
            ..StreamEvent::default()
        }
    }
}

/// Build a JSON error response with the given HTTP status and message.
pub fn error_response(status: StatusCode, msg: &str) -> Response {
    let body = serde_json::json!({ "error": { "message": msg } });
    (status, Json(body)).into_response()
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}

fn looks_like_dns_failure(detail: &str) -> bool {
    let d = detail.to_ascii_lowercase();
    d.contains("dns error")
        || d.contains("failed to lookup address")
        || d.contains("name or service not known")
        || d.contains("no such host")
        || d.contains("nodename nor servname")
}
