//! Inbound request validation.
//!
//! Checks run in a fixed order (token, message, length, api key, endpoint) so
//! the first failure reported is deterministic.

use reqwest::Url;

use crate::config::RelayConfig;
use crate::error::ValidationError;
use crate::nonce::NonceIssuer;
use crate::session::SessionId;

/// Raw fields as received from the widget.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawRequest<'a> {
    pub nonce: Option<&'a str>,
    pub message: Option<&'a str>,
    pub session_id: Option<&'a str>,
    pub accept: Option<&'a str>,
}

/// A request that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub message: String,
    /// `None` means a new conversation.
    pub session_id: Option<SessionId>,
    pub wants_stream: bool,
}

pub fn validate(
    raw: &RawRequest<'_>,
    config: &RelayConfig,
    nonces: &NonceIssuer,
) -> Result<ValidatedRequest, ValidationError> {
    if !nonces.verify(raw.nonce.unwrap_or_default().trim()) {
        return Err(ValidationError::InvalidToken);
    }

    let message = raw.message.unwrap_or_default().trim();
    if message.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }

    let actual = message.chars().count();
    if actual > config.max_message_length {
        return Err(ValidationError::MessageTooLong {
            max: config.max_message_length,
            actual,
        });
    }

    if config.api_key.trim().is_empty() {
        return Err(ValidationError::MissingApiKey);
    }

    check_endpoint(&config.endpoint, &config.allowed_hosts)?;

    Ok(ValidatedRequest {
        message: message.to_string(),
        session_id: raw.session_id.and_then(SessionId::parse),
        wants_stream: wants_event_stream(raw.accept),
    })
}

/// The endpoint must be `https` and its host must be on the allow-list.
pub fn check_endpoint(endpoint: &str, allowed_hosts: &[String]) -> Result<(), ValidationError> {
    let disallowed = || ValidationError::DisallowedEndpoint(endpoint.to_string());

    let url = Url::parse(endpoint.trim()).map_err(|_| disallowed())?;
    if url.scheme() != "https" {
        return Err(disallowed());
    }
    let host = url.host_str().ok_or_else(disallowed)?.to_ascii_lowercase();
    let host = host.trim_end_matches('.');
    let allowed = allowed_hosts
        .iter()
        .any(|h| h.trim().trim_end_matches('.').eq_ignore_ascii_case(host));
    if allowed {
        Ok(())
    } else {
        Err(disallowed())
    }
}

/// True when the `Accept` header lists `text/event-stream`.
pub fn wants_event_stream(accept: Option<&str>) -> bool {
    accept
        .map(|a| {
            a.split(',').any(|part| {
                part.split(';')
                    .next()
                    .map(|mime| mime.trim().eq_ignore_ascii_case("text/event-stream"))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}
