use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::FormRejection, State},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Form, Json, Router,
};
use futures_util::{stream, Stream, StreamExt};
use http::{header, HeaderMap, HeaderName, StatusCode};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::RelayConfig;
use crate::error::{error_response, RelayError};
use crate::models::relay::{ChatForm, Envelope, WidgetBootstrap};
use crate::session::SessionId;
use crate::transport::sse::DONE_MARKER;
use crate::translate::RelayFrame;
use crate::util::{cors_layer_from_env, AppState};
use crate::validate::{validate, wants_event_stream, RawRequest};

/// Build the Axum router with default state (memory sessions, env-free config).
pub fn build_router() -> Router {
    build_router_with_state(AppState::default())
}

/// Build the Axum router around prepared state.
pub fn build_router_with_state(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/status", get(status))
        .route("/chat", post(chat))
        .route("/chat/bootstrap", get(bootstrap))
        .route("/reload/config", post(reload_config))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer_from_env()),
        )
}

/// Service status endpoint exposing the routes and active backends.
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.config.read().await;
    Json(serde_json::json!({
        "name": "chat-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "session_backend": state.store.backend_name(),
        "stream_enabled": config.enable_stream,
        "conversation_enabled": config.enable_conversation,
        "routes": ["/status", "/chat", "/chat/bootstrap", "/reload/config"]
    }))
}

/// Issue a nonce and hand the widget its settings.
async fn bootstrap(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.config.read().await;
    Json(WidgetBootstrap {
        ajax_url: "/chat".into(),
        nonce: state.nonces.issue(),
        enable_stream: config.enable_stream,
        show_reasoning: config.show_reasoning,
        enable_conversation: config.enable_conversation,
        title: config.widget.title.clone(),
        placeholder: config.widget.placeholder.clone(),
        loading_text: config.widget.loading_text.clone(),
        error_text: config.widget.error_text.clone(),
    })
}

/// Relay one chat message.
/// - Buffered: `{success, data}` JSON envelope
/// - Streaming (`Accept: text/event-stream` and streaming enabled): SSE with
///   cumulative text events terminated by `[DONE]`
async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    form: Result<Form<ChatForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(f)) => f,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "unreadable chat form; treating as empty");
            ChatForm::default()
        }
    };
    let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());

    let ctx = state.relay_context().await;

    let raw = RawRequest {
        nonce: form.nonce.as_deref(),
        message: form.message.as_deref(),
        session_id: form.session_id.as_deref(),
        accept,
    };

    let validated = match validate(&raw, &ctx.config, &state.nonces) {
        Ok(v) => v,
        Err(e) => {
            let err = RelayError::from(e);
            if ctx.config.enable_stream && wants_event_stream(accept) {
                let sid = form
                    .session_id
                    .as_deref()
                    .and_then(SessionId::parse)
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                err.log();
                let frames = stream::iter([
                    RelayFrame::Event(err.stream_event(&sid)),
                    RelayFrame::Done,
                ]);
                return sse_response(frames);
            }
            return err.into_json_response();
        }
    };

    if ctx.config.enable_stream && validated.wants_stream {
        sse_response(ctx.relay_stream(validated))
    } else {
        match ctx.relay_buffered(validated).await {
            Ok(result) => Json(Envelope::ok(result)).into_response(),
            Err(e) => e.into_json_response(),
        }
    }
}

/// Re-read the config file the relay was started with.
async fn reload_config(State(state): State<Arc<AppState>>) -> Response {
    let Some(path) = state.config_path.clone() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "No config path configured; start the relay with --config=<path> to enable reload",
        );
    };
    match RelayConfig::load(Some(&path)) {
        Ok(config) => {
            tracing::info!(path = %path.display(), config = ?config, "relay config reloaded");
            *state.config.write().await = config;
            Json(serde_json::json!({ "reloaded": true, "path": path.display().to_string() }))
                .into_response()
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "relay config reload failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &format!("{e:#}"))
        }
    }
}

fn sse_response<S>(frames: S) -> Response
where
    S: Stream<Item = RelayFrame> + Send + 'static,
{
    let events = frames.map(|frame| Ok::<Event, Infallible>(to_event(frame)));
    (
        [(HeaderName::from_static("x-accel-buffering"), "no")],
        Sse::new(events),
    )
        .into_response()
}

fn to_event(frame: RelayFrame) -> Event {
    match frame {
        RelayFrame::Done => Event::default().data(DONE_MARKER),
        RelayFrame::Event(ev) => Event::default().json_data(&ev).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize stream event");
            Event::default().data(r#"{"error":"internal error","session_id":""}"#)
        }),
    }
}
