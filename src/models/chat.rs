use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Chat Completions role enumeration.
///
/// Uses lowercase serialization to match the Chat Completions API:
/// "system" | "user" | "assistant"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of a conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered conversation history, oldest first.
pub type Transcript = Vec<ChatMessage>;

/// Chat Completions request sent upstream.
///
/// `reasoning_enabled` is only serialized when reasoning output was requested,
/// so vendors that reject unknown fields still accept the default payload.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub model: String,
    pub messages: Transcript,
    pub stream: bool,
    pub temperature: f64,
    pub max_tokens: u32,
    #[serde(default)]
    pub reasoning_enabled: Option<bool>,
}

// ============================================================================
// Chat Completions Response Models
// ============================================================================

/// Message in a Chat Completions response
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// Reasoning trace emitted by thinking models (DeepSeek-R1, QwQ, ...).
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

/// Choice in a Chat Completions response
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub index: u32,
    pub message: ChatResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Complete Chat Completions API response (the subset the relay reads).
///
/// `choices` is required: a body without it fails to parse and is reported
/// as an unexpected response format.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub choices: Vec<ChatChoice>,
}

// ============================================================================
// Chat Completions Streaming Response Models
// ============================================================================

/// Delta in a streaming chunk
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

/// Choice in a streaming chunk
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChatDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Streaming chunk response
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: Option<String>,
    pub choices: Vec<ChatStreamChoice>,
}

impl ChatCompletionChunk {
    /// Content delta of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
    }

    /// Reasoning delta of the first choice, if any.
    pub fn reasoning(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.reasoning_content.as_deref())
    }
}

/// Vendor error object: `{"error": {"message": "...", "code": "..."}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorErrorEnvelope {
    pub error: VendorError,
}

/// One decoded `data:` payload of an upstream event stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StreamPayload {
    Error(VendorErrorEnvelope),
    Chunk(ChatCompletionChunk),
}

/// Pull a human-readable message out of a vendor error body.
///
/// Accepts the OpenAI-style `{"error":{"message":..}}` envelope and the
/// DashScope-native `{"code":..,"message":..}` form.
pub fn vendor_error_message(body: &[u8]) -> Option<String> {
    if let Ok(env) = serde_json::from_slice::<VendorErrorEnvelope>(body) {
        return env.error.message.filter(|m| !m.trim().is_empty());
    }
    #[derive(Deserialize)]
    struct Flat {
        message: String,
    }
    serde_json::from_slice::<Flat>(body)
        .ok()
        .map(|f| f.message)
        .filter(|m| !m.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_request_omits_disabled_reasoning_flag() {
        let req = OutboundRequest {
            model: "deepseek-r1".into(),
            messages: vec![ChatMessage::user("Hi")],
            stream: false,
            temperature: 0.7,
            max_tokens: 2000,
            reasoning_enabled: None,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert!(v.get("reasoning_enabled").is_none());
        assert_eq!(v["messages"], json!([{"role": "user", "content": "Hi"}]));
    }

    #[test]
    fn stream_payload_distinguishes_error_and_chunk() {
        let err: StreamPayload =
            serde_json::from_value(json!({"error": {"message": "quota"}})).unwrap();
        assert!(matches!(err, StreamPayload::Error(_)));

        let chunk: StreamPayload = serde_json::from_value(json!({
            "choices": [{"delta": {"content": "Hel", "reasoning_content": "hmm"}}]
        }))
        .unwrap();
        match chunk {
            StreamPayload::Chunk(c) => {
                assert_eq!(c.content(), Some("Hel"));
                assert_eq!(c.reasoning(), Some("hmm"));
            }
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn response_without_choices_fails_to_parse() {
        let res = serde_json::from_value::<ChatCompletionResponse>(json!({"output": {}}));
        assert!(res.is_err());
    }

    #[test]
    fn vendor_error_message_accepts_both_shapes() {
        assert_eq!(
            vendor_error_message(br#"{"error":{"message":"bad key"}}"#).as_deref(),
            Some("bad key")
        );
        assert_eq!(
            vendor_error_message(br#"{"code":"Throttling","message":"slow down"}"#).as_deref(),
            Some("slow down")
        );
        assert_eq!(vendor_error_message(b"<html>oops</html>"), None);
    }
}
