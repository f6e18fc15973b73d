#![forbid(unsafe_code)]
#![doc = r#"
Chat Relay

Relay chat widget messages to an OpenAI-compatible chat-completions API (DashScope by default) and
return the reply either as a JSON envelope or as a live server-sent-event token stream.

Crate highlights
- Library: validation, request building, transport and translation are usable without the server.
- HTTP server (in `server`): `/chat`, `/chat/bootstrap`, `/status`, `/reload/config`.
- Sessions: short-lived transcripts behind the `SessionStore` trait (memory or sled).

Modules
- `models`: Upstream Chat Completions shapes and the widget wire format.
- `config`: Relay settings with defaults, JSON file and env overrides.
- `validate`: Security token, message and endpoint checks.
- `builder`: Outbound payload assembly and the history window.
- `transport`: Buffered and streaming upstream calls, SSE line decoding.
- `translate`: Upstream replies to widget responses, transcript write-back.
- `error`: Error taxonomy and user-facing classification.
- `session`, `nonce`: Session transcripts and security tokens.
- `server`: Axum router/handlers (the binary uses this).
- `util`: Shared helpers (tracing, env, HTTP client, CORS, app state).
"#]

pub mod builder;
pub mod config;
pub mod error;
pub mod models;
pub mod nonce;
pub mod server;
pub mod session;
pub mod translate;
pub mod transport;
pub mod util;
pub mod validate;

pub use crate::builder::build_request;
pub use crate::config::RelayConfig;
pub use crate::error::{ErrorKind, RelayError, TransportError, ValidationError};
pub use crate::session::{MemorySessionStore, SessionId, SessionStore};
pub use crate::translate::{RelayContext, RelayFrame};
pub use crate::validate::{validate, RawRequest, ValidatedRequest};

// Re-export model namespaces for convenience (downstream users can do `use chat_relay::chat`).
pub use crate::models::{chat, relay};
