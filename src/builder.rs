//! Outbound Chat Completions payload assembly.

use crate::config::RelayConfig;
use crate::models::chat::{ChatMessage, OutboundRequest, Role, Transcript};

/// Assemble the outbound request from the new message and prior transcript.
///
/// Returns the request; its `messages` is also the transcript that gets
/// persisted once the assistant reply is appended.
pub fn build_request(
    message: &str,
    prior: Transcript,
    config: &RelayConfig,
    wants_stream: bool,
) -> OutboundRequest {
    let mut messages = if config.enable_conversation {
        prior
    } else {
        Vec::new()
    };

    if messages.is_empty() && !config.system_message.trim().is_empty() {
        messages.push(ChatMessage::system(config.system_message.trim()));
    }
    messages.push(ChatMessage::user(message));

    let messages = apply_history_window(messages, config.history_length);

    OutboundRequest {
        model: config.model.clone(),
        messages,
        stream: config.enable_stream && wants_stream,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        reasoning_enabled: config.show_reasoning.then_some(true),
    }
}

/// Keep at most `2 * turns + 1` entries.
///
/// A leading system message is kept whenever `turns > 0`; the oldest
/// non-system entries are dropped first. The last entry (the message just
/// sent) always survives, so `turns == 0` leaves exactly that message.
pub fn apply_history_window(mut messages: Transcript, turns: usize) -> Transcript {
    let limit = turns.saturating_mul(2).saturating_add(1);
    if messages.len() <= limit {
        return messages;
    }

    let system = match messages.first() {
        Some(m) if m.role == Role::System && turns > 0 => Some(messages.remove(0)),
        _ => None,
    };
    let room = limit - usize::from(system.is_some());
    let start = messages.len().saturating_sub(room.max(1));
    let tail = messages.split_off(start);

    let mut out = Vec::with_capacity(tail.len() + 1);
    out.extend(system);
    out.extend(tail);
    out
}
