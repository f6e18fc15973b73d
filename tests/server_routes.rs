mod common;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use chat_relay::config::RelayConfig;
use chat_relay::server::build_router_with_state;
use chat_relay::session::MemorySessionStore;
use chat_relay::util::AppState;
use common::{sse_payloads, test_client};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Relay bound to an ephemeral local port.
struct TestServer {
    base_url: String,
    _addr: SocketAddr,
    join: JoinHandle<()>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(config: RelayConfig, config_path: Option<PathBuf>) -> Self {
        let state = AppState::with_client(
            config,
            config_path,
            Arc::new(MemorySessionStore::new()),
            test_client(),
        );
        let app = build_router_with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind relay");
        let addr = listener.local_addr().expect("relay local addr");
        let join = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app.into_make_service()).await {
                eprintln!("relay server error: {err:?}");
            }
        });

        TestServer {
            base_url: format!("http://{}", addr),
            _addr: addr,
            join,
            client: test_client(),
        }
    }

    async fn nonce(&self) -> String {
        let body: serde_json::Value = self
            .client
            .get(format!("{}/chat/bootstrap", self.base_url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["nonce"].as_str().unwrap().to_string()
    }

    async fn chat(&self, form: &[(&str, &str)], stream: bool) -> reqwest::Response {
        let mut req = self
            .client
            .post(format!("{}/chat", self.base_url))
            .form(form);
        if stream {
            req = req.header("accept", "text/event-stream");
        }
        req.send().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.join.abort();
    }
}

fn configured() -> RelayConfig {
    RelayConfig {
        api_key: "sk-test".into(),
        ..RelayConfig::default()
    }
}

#[tokio::test]
async fn status_reports_routes_and_backend() {
    let server = TestServer::start(configured(), None).await;
    let resp = server
        .client
        .get(format!("{}/status", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["name"], "chat-relay");
    assert_eq!(body["session_backend"], "memory");
    assert!(body["routes"]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r == "/chat"));
}

#[tokio::test]
async fn bootstrap_issues_distinct_nonces() {
    let server = TestServer::start(configured(), None).await;
    let resp: serde_json::Value = server
        .client
        .get(format!("{}/chat/bootstrap", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["ajax_url"], "/chat");
    assert_eq!(resp["enable_stream"], true);
    assert_eq!(resp["title"], "AI Assistant");

    let a = server.nonce().await;
    let b = server.nonce().await;
    assert!(!a.is_empty());
    assert_ne!(a, b);
}

#[tokio::test]
async fn bad_token_gets_envelope_error() {
    let server = TestServer::start(configured(), None).await;
    let resp = server
        .chat(&[("message", "Hello"), ("nonce", "forged")], false)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["data"].as_str().unwrap().contains("security token"));
}

#[tokio::test]
async fn bad_token_on_stream_gets_error_then_done() {
    let server = TestServer::start(configured(), None).await;
    let resp = server
        .chat(
            &[("message", "Hello"), ("nonce", "forged"), ("session_id", "abc")],
            true,
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let payloads = sse_payloads(&resp.text().await.unwrap());
    assert_eq!(payloads.len(), 2);
    let ev: serde_json::Value = serde_json::from_str(&payloads[0]).unwrap();
    assert!(ev["error"].as_str().unwrap().contains("security token"));
    assert_eq!(ev["session_id"], "abc");
    assert!(ev.get("text").is_none());
    assert_eq!(payloads[1], "[DONE]");
}

#[tokio::test]
async fn empty_and_oversized_messages_are_rejected() {
    let mut config = configured();
    config.max_message_length = 10;
    let server = TestServer::start(config, None).await;
    let nonce = server.nonce().await;

    let body: serde_json::Value = server
        .chat(&[("message", "   "), ("nonce", nonce.as_str())], false)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], false);
    assert!(body["data"].as_str().unwrap().contains("required"));

    let body: serde_json::Value = server
        .chat(&[("message", "ééééééééééé"), ("nonce", nonce.as_str())], false)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], false);
    assert!(body["data"].as_str().unwrap().contains("too long"));
}

#[tokio::test]
async fn missing_api_key_is_reported() {
    let server = TestServer::start(RelayConfig::default(), None).await;
    let nonce = server.nonce().await;
    let body: serde_json::Value = server
        .chat(&[("message", "Hello"), ("nonce", nonce.as_str())], false)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], false);
    assert!(body["data"].as_str().unwrap().contains("API key"));
}

#[tokio::test]
async fn plain_http_endpoint_is_refused() {
    let mut config = configured();
    config.endpoint =
        "http://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions".into();
    let server = TestServer::start(config, None).await;
    let nonce = server.nonce().await;
    let body: serde_json::Value = server
        .chat(&[("message", "Hello"), ("nonce", nonce.as_str())], false)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], false);
    assert!(body["data"].as_str().unwrap().contains("not allowed"));
}

#[tokio::test]
async fn unreachable_upstream_streams_error_then_done() {
    let mut config = configured();
    config.endpoint = "https://127.0.0.1:9/v1/chat/completions".into();
    config.allowed_hosts = vec!["127.0.0.1".into()];
    let server = TestServer::start(config, None).await;
    let nonce = server.nonce().await;

    let resp = server
        .chat(&[("message", "Hello"), ("nonce", nonce.as_str())], true)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let payloads = sse_payloads(&resp.text().await.unwrap());
    assert_eq!(payloads.len(), 2);
    let ev: serde_json::Value = serde_json::from_str(&payloads[0]).unwrap();
    assert!(ev["error"].as_str().is_some());
    assert_eq!(payloads[1], "[DONE]");
}

#[tokio::test]
async fn stream_disabled_falls_back_to_envelope() {
    let mut config = configured();
    config.enable_stream = false;
    config.endpoint = "https://127.0.0.1:9/v1/chat/completions".into();
    config.allowed_hosts = vec!["127.0.0.1".into()];
    let server = TestServer::start(config, None).await;
    let nonce = server.nonce().await;

    let resp = server
        .chat(&[("message", "Hello"), ("nonce", nonce.as_str())], true)
        .await;
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["data"].as_str().unwrap().contains("API request failed"));
}

#[tokio::test]
async fn request_without_event_stream_accept_is_buffered() {
    let mut config = configured();
    config.endpoint = "https://127.0.0.1:9/v1/chat/completions".into();
    config.allowed_hosts = vec!["127.0.0.1".into()];
    let server = TestServer::start(config, None).await;
    let nonce = server.nonce().await;

    let resp = server
        .chat(&[("message", "Hello"), ("nonce", nonce.as_str())], false)
        .await;
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("application/json"));
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["data"].as_str().unwrap().contains("API request failed"));
}

#[tokio::test]
async fn reload_without_path_is_bad_request() {
    let server = TestServer::start(configured(), None).await;
    let resp = server
        .client
        .post(format!("{}/reload/config", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("No config path"));
}

#[tokio::test]
async fn reload_picks_up_file_changes() {
    let path = std::env::temp_dir().join(format!("chat-relay-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, r#"{"api_key":"sk-file","widget":{"title":"Before"}}"#).unwrap();

    let config = RelayConfig::load(Some(&path)).unwrap();
    let server = TestServer::start(config, Some(path.clone())).await;

    let before: serde_json::Value = server
        .client
        .get(format!("{}/chat/bootstrap", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(before["title"], "Before");

    std::fs::write(&path, r#"{"api_key":"sk-file","widget":{"title":"After"}}"#).unwrap();
    let resp = server
        .client
        .post(format!("{}/reload/config", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let after: serde_json::Value = server
        .client
        .get(format!("{}/chat/bootstrap", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(after["title"], "After");

    let _ = std::fs::remove_file(&path);
}
