//! Shapes exchanged with the browser widget.
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Form fields posted by the widget to `/chat`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatForm {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// Normalized success payload of one relay turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayResult {
    pub message: String,
    pub has_thoughts: bool,
    pub thoughts: String,
    pub session_id: String,
}

/// Buffered response envelope: `{success, data}`.
///
/// `data` is a [`RelayResult`] on success and a plain error string otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

impl Envelope<RelayResult> {
    pub fn ok(data: RelayResult) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl Envelope<String> {
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: message.into(),
        }
    }
}

/// One SSE event sent to the widget. `text` and `thoughts` are cumulative.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub text: Option<String>,
    pub thoughts: Option<String>,
    pub session_id: String,
    pub error: Option<String>,
}

/// Data the widget needs before it can post a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetBootstrap {
    pub ajax_url: String,
    pub nonce: String,
    pub enable_stream: bool,
    pub show_reasoning: bool,
    pub enable_conversation: bool,
    pub title: String,
    pub placeholder: String,
    pub loading_text: String,
    pub error_text: String,
}
