use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::util::is_truthy;

pub const DEFAULT_ENDPOINT: &str =
    "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions";
pub const DEFAULT_ALLOWED_HOST: &str = "dashscope.aliyuncs.com";

/// Upper bound of the history-turn setting, as offered by the settings screen.
pub const MAX_HISTORY_LENGTH: usize = 20;

/// Relay settings, read once per request as an immutable snapshot.
///
/// Built from defaults, then an optional JSON file, then `CHAT_RELAY_*`
/// environment overrides; see [`RelayConfig::load`].
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Bearer token for the upstream API. Never logged.
    pub api_key: String,
    /// Full chat-completions URL.
    pub endpoint: String,
    /// Hosts the endpoint may point at (compared case-insensitively).
    pub allowed_hosts: Vec<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Seeded as the first transcript entry of a new conversation when non-blank.
    pub system_message: String,
    /// Maximum user message length in characters.
    pub max_message_length: usize,
    /// Number of past turns (user + assistant pairs) sent upstream.
    pub history_length: usize,
    pub enable_stream: bool,
    pub show_reasoning: bool,
    /// When off, no history is read or written.
    pub enable_conversation: bool,
    pub request_timeout_secs: u64,
    pub stream_timeout_secs: u64,
    pub session_ttl_secs: u64,
    pub nonce_ttl_secs: u64,
    pub widget: WidgetText,
}

/// User-visible strings handed to the widget at bootstrap.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WidgetText {
    pub title: String,
    pub placeholder: String,
    pub loading_text: String,
    pub error_text: String,
}

impl Default for WidgetText {
    fn default() -> Self {
        Self {
            title: "AI Assistant".into(),
            placeholder: "Type your message...".into(),
            loading_text: "Thinking...".into(),
            error_text: "Sorry, something went wrong. Please try again later.".into(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: DEFAULT_ENDPOINT.into(),
            allowed_hosts: vec![DEFAULT_ALLOWED_HOST.into()],
            model: "deepseek-r1".into(),
            temperature: 0.7,
            max_tokens: 2000,
            system_message: String::new(),
            max_message_length: 4000,
            history_length: 5,
            enable_stream: true,
            show_reasoning: false,
            enable_conversation: true,
            request_timeout_secs: 60,
            stream_timeout_secs: 120,
            session_ttl_secs: 3600,
            nonce_ttl_secs: 12 * 3600,
            widget: WidgetText::default(),
        }
    }
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("endpoint", &self.endpoint)
            .field("allowed_hosts", &self.allowed_hosts)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_message_length", &self.max_message_length)
            .field("history_length", &self.history_length)
            .field("enable_stream", &self.enable_stream)
            .field("show_reasoning", &self.show_reasoning)
            .field("enable_conversation", &self.enable_conversation)
            .finish_non_exhaustive()
    }
}

impl RelayConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!(
                "Failed to read relay config file: {}",
                path.as_ref().display()
            )
        })?;

        let config: RelayConfig =
            serde_json::from_str(&content).with_context(|| "Failed to parse relay config JSON")?;

        Ok(config)
    }

    /// Defaults, then the optional file, then process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from_file(p)?,
            None => Self::default(),
        };
        config.apply_overrides(|k| std::env::var(k).ok());
        Ok(config.sanitized())
    }

    /// Apply `CHAT_RELAY_*` overrides using `lookup` to read variables.
    ///
    /// Unparseable numeric values are ignored with a warning rather than
    /// failing startup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());

        if let Some(k) = get("CHAT_RELAY_API_KEY")
            .filter(|v| !v.is_empty())
            .or_else(|| get("DASHSCOPE_API_KEY").filter(|v| !v.is_empty()))
        {
            self.api_key = k;
        }
        if let Some(v) = get("CHAT_RELAY_ENDPOINT").filter(|v| !v.is_empty()) {
            self.endpoint = v;
        }
        if let Some(v) = get("CHAT_RELAY_ALLOWED_HOSTS") {
            let hosts: Vec<String> = v
                .split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect();
            if !hosts.is_empty() {
                self.allowed_hosts = hosts;
            }
        }
        if let Some(v) = get("CHAT_RELAY_MODEL").filter(|v| !v.is_empty()) {
            self.model = v;
        }
        if let Some(v) = lookup("CHAT_RELAY_SYSTEM_MESSAGE") {
            self.system_message = v;
        }

        parse_into(&get, "CHAT_RELAY_TEMPERATURE", &mut self.temperature);
        parse_into(&get, "CHAT_RELAY_MAX_TOKENS", &mut self.max_tokens);
        parse_into(
            &get,
            "CHAT_RELAY_MAX_MESSAGE_LENGTH",
            &mut self.max_message_length,
        );
        parse_into(&get, "CHAT_RELAY_HISTORY_LENGTH", &mut self.history_length);
        parse_into(
            &get,
            "CHAT_RELAY_HTTP_TIMEOUT_SECONDS",
            &mut self.request_timeout_secs,
        );
        parse_into(
            &get,
            "CHAT_RELAY_STREAM_TIMEOUT_SECONDS",
            &mut self.stream_timeout_secs,
        );
        parse_into(
            &get,
            "CHAT_RELAY_SESSION_TTL_SECONDS",
            &mut self.session_ttl_secs,
        );
        parse_into(&get, "CHAT_RELAY_NONCE_TTL_SECONDS", &mut self.nonce_ttl_secs);

        if let Some(v) = get("CHAT_RELAY_ENABLE_STREAM") {
            self.enable_stream = is_truthy(&v);
        }
        if let Some(v) = get("CHAT_RELAY_SHOW_REASONING") {
            self.show_reasoning = is_truthy(&v);
        }
        if let Some(v) = get("CHAT_RELAY_ENABLE_CONVERSATION") {
            self.enable_conversation = is_truthy(&v);
        }
    }

    /// Clamp values into the ranges the settings screen allows.
    pub fn sanitized(mut self) -> Self {
        self.history_length = self.history_length.min(MAX_HISTORY_LENGTH);
        self.temperature = if self.temperature.is_finite() {
            self.temperature.clamp(0.0, 2.0)
        } else {
            0.7
        };
        self.max_tokens = self.max_tokens.clamp(100, 8000);
        if self.max_message_length == 0 {
            self.max_message_length = 4000;
        }
        self.endpoint = self.endpoint.trim().to_string();
        self.api_key = self.api_key.trim().to_string();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs.max(1))
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.nonce_ttl_secs.max(1))
    }
}

fn parse_into<T, G>(get: &G, key: &str, slot: &mut T)
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        match raw.parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable config override"),
        }
    }
}
