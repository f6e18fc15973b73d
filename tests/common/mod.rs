#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use chat_relay::config::RelayConfig;
use chat_relay::session::{MemorySessionStore, SessionStore};
use chat_relay::translate::RelayContext;
use chat_relay::transport::UpstreamClient;
use futures_util::stream;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// How the mock chat-completions endpoint answers.
#[derive(Clone)]
pub enum MockReply {
    /// JSON body with the given status.
    Json {
        status: StatusCode,
        body: serde_json::Value,
    },
    /// Raw text body with the given status.
    Text { status: StatusCode, body: String },
    /// `text/event-stream` body sent as separate writes. When `fail_after`
    /// is set, the body errors after the parts are written, which aborts the
    /// connection mid-stream.
    Sse {
        parts: Vec<String>,
        fail_after: bool,
    },
    /// Sleep before answering with an empty choices list.
    Delay(Duration),
}

#[derive(Clone)]
struct MockState {
    reply: MockReply,
    requests: Arc<Mutex<Vec<serde_json::Value>>>,
    headers: Arc<Mutex<Vec<HeaderMap>>>,
}

/// In-process upstream bound to an ephemeral port.
pub struct MockUpstream {
    base_url: String,
    requests: Arc<Mutex<Vec<serde_json::Value>>>,
    headers: Arc<Mutex<Vec<HeaderMap>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockUpstream {
    pub async fn start(reply: MockReply) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let headers = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            reply,
            requests: requests.clone(),
            headers: headers.clone(),
        };

        let router = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock upstream");
        let addr = listener.local_addr().expect("mock upstream local addr");
        let (tx, rx) = oneshot::channel::<()>();

        let server = axum::serve(listener, router.into_make_service());
        tokio::spawn(async move {
            tokio::select! {
                res = server => {
                    if let Err(err) = res {
                        eprintln!("Mock upstream error: {err:?}");
                    }
                }
                _ = rx => {}
            }
        });

        MockUpstream {
            base_url: format!("http://{}", addr),
            requests,
            headers,
            shutdown: Some(tx),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    pub fn requests(&self) -> Vec<serde_json::Value> {
        self.requests.lock().expect("lock requests").clone()
    }

    pub fn headers(&self) -> Vec<HeaderMap> {
        self.headers.lock().expect("lock headers").clone()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn completions(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    state.requests.lock().expect("lock requests").push(body);
    state.headers.lock().expect("lock headers").push(headers);

    match state.reply {
        MockReply::Json { status, body } => (status, Json(body)).into_response(),
        MockReply::Text { status, body } => (status, body).into_response(),
        MockReply::Sse { parts, fail_after } => {
            let mut items: Vec<Result<Bytes, std::io::Error>> =
                parts.into_iter().map(|p| Ok(Bytes::from(p))).collect();
            if fail_after {
                items.push(Err(std::io::Error::other("upstream went away")));
            }
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .body(Body::from_stream(stream::iter(items)))
                .expect("build sse response")
        }
        MockReply::Delay(d) => {
            tokio::time::sleep(d).await;
            Json(serde_json::json!({"choices": []})).into_response()
        }
    }
}

/// One `data:` line carrying a content/reasoning delta.
pub fn delta_line(content: Option<&str>, reasoning: Option<&str>) -> String {
    let mut delta = serde_json::Map::new();
    if let Some(c) = content {
        delta.insert("content".into(), c.into());
    }
    if let Some(r) = reasoning {
        delta.insert("reasoning_content".into(), r.into());
    }
    let chunk = serde_json::json!({ "choices": [{ "index": 0, "delta": delta }] });
    format!("data: {chunk}\n\n")
}

pub fn completion_body(content: &str, reasoning: Option<&str>) -> serde_json::Value {
    let mut message = serde_json::json!({ "role": "assistant", "content": content });
    if let Some(r) = reasoning {
        message["reasoning_content"] = r.into();
    }
    serde_json::json!({
        "id": "chatcmpl-test",
        "model": "deepseek-r1",
        "choices": [{ "index": 0, "message": message, "finish_reason": "stop" }]
    })
}

pub fn test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("failed building reqwest client")
}

pub fn test_config(endpoint: &str) -> RelayConfig {
    RelayConfig {
        api_key: "sk-test-upstream".into(),
        endpoint: endpoint.to_string(),
        ..RelayConfig::default()
    }
}

/// Pipeline context wired to `endpoint`, plus a handle to its store.
pub fn relay_context(config: RelayConfig) -> (RelayContext, Arc<MemorySessionStore>) {
    let store = Arc::new(MemorySessionStore::new());
    let dyn_store: Arc<dyn SessionStore> = store.clone();
    let ctx = RelayContext {
        config,
        store: dyn_store,
        upstream: UpstreamClient::new(test_client()),
    };
    (ctx, store)
}

/// Split an SSE body into its `data:` payloads.
pub fn sse_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|event| {
            event
                .lines()
                .find_map(|l| l.strip_prefix("data:").map(|d| d.trim().to_string()))
        })
        .collect()
}
