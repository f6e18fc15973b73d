use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::RelayConfig;
use crate::nonce::NonceIssuer;
use crate::session::{MemorySessionStore, SessionStore};
use crate::translate::RelayContext;
use crate::transport::UpstreamClient;

/// Truthy env values: 1, true, yes, on (case-insensitive).
pub fn is_truthy(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Initialize dotenv and structured tracing based on RUST_LOG.
///
/// Env file lookup order:
/// - explicit paths via ENV_FILE or DOTENV_PATH
/// - `.envfile` in the working directory
/// - standard `.env` discovery
pub fn init_tracing() {
    let mut env_source: String = "none".into();
    for key in ["ENV_FILE", "DOTENV_PATH"] {
        if let Ok(p) = std::env::var(key) {
            let p = p.trim();
            if !p.is_empty()
                && std::path::Path::new(p).is_file()
                && dotenvy::from_filename(p).is_ok()
            {
                env_source = format!("{p} ({key})");
                break;
            }
        }
    }

    if env_source == "none"
        && std::path::Path::new(".envfile").is_file()
        && dotenvy::from_filename(".envfile").is_ok()
    {
        env_source = ".envfile".into();
    }

    if env_source == "none" {
        if let Ok(path) = dotenvy::dotenv() {
            env_source = path.display().to_string();
        }
    }

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=info".into());
    let subscriber = fmt().with_env_filter(EnvFilter::new(filter)).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    tracing::info!("Environment loaded from: {}", env_source);
}

/// Get the bind address for the HTTP server from env or default to 0.0.0.0:8088.
pub fn env_bind_addr() -> String {
    std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8088".into())
}

/// Build the outbound HTTP client honoring proxy environment variables.
///
/// Timeouts are set per request from [`RelayConfig`], not on the client.
///
/// Environment:
/// - CHAT_RELAY_NO_PROXY = 1|true|yes|on  -> disable all proxies
/// - CHAT_RELAY_PROXY_URL = <url>         -> proxy for all schemes
/// - HTTPS_PROXY / https_proxy            -> HTTPS proxy
pub fn build_http_client_from_env() -> reqwest::Client {
    let mut builder = reqwest::Client::builder();

    let no_proxy = std::env::var("CHAT_RELAY_NO_PROXY")
        .map(|v| is_truthy(&v))
        .unwrap_or(false);

    if no_proxy {
        builder = builder.no_proxy();
    } else {
        if let Ok(url) = std::env::var("CHAT_RELAY_PROXY_URL") {
            let u = url.trim();
            if !u.is_empty() {
                match reqwest::Proxy::all(u) {
                    Ok(p) => builder = builder.proxy(p),
                    Err(e) => tracing::warn!(error = %e, "ignoring invalid CHAT_RELAY_PROXY_URL"),
                }
            }
        }
        if let Ok(https_p) = std::env::var("HTTPS_PROXY").or_else(|_| std::env::var("https_proxy"))
        {
            let u = https_p.trim();
            if !u.is_empty() {
                if let Ok(p) = reqwest::Proxy::https(u) {
                    builder = builder.proxy(p);
                }
            }
        }
    }

    builder = builder.user_agent(format!("chat-relay/{}", env!("CARGO_PKG_VERSION")));

    builder.build().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "falling back to default HTTP client");
        reqwest::Client::new()
    })
}

/// Shared application state used by the HTTP server and handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: UpstreamClient,
    pub store: Arc<dyn SessionStore>,
    pub nonces: Arc<NonceIssuer>,
    pub config: Arc<RwLock<RelayConfig>>,
    /// File the config was loaded from, if any; used by `/reload/config`.
    pub config_path: Option<PathBuf>,
}

impl AppState {
    pub fn new(
        config: RelayConfig,
        config_path: Option<PathBuf>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self::with_client(config, config_path, store, build_http_client_from_env())
    }

    pub fn with_client(
        config: RelayConfig,
        config_path: Option<PathBuf>,
        store: Arc<dyn SessionStore>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            upstream: UpstreamClient::new(http),
            store,
            nonces: Arc::new(NonceIssuer::new(config.nonce_ttl())),
            config: Arc::new(RwLock::new(config)),
            config_path,
        }
    }

    /// Per-request snapshot of everything the pipeline needs.
    pub async fn relay_context(&self) -> RelayContext {
        RelayContext {
            config: self.config.read().await.clone(),
            store: self.store.clone(),
            upstream: self.upstream.clone(),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(
            RelayConfig::default(),
            None,
            Arc::new(MemorySessionStore::new()),
        )
    }
}

/// Build a CORS layer from environment variables.
///
/// Environment variables:
/// - CORS_ALLOWED_ORIGINS: "*" or comma-separated origins (e.g., "https://a.com, https://b.com")
/// - CORS_ALLOWED_METHODS: "*" or comma-separated methods (e.g., "GET,POST,OPTIONS")
/// - CORS_ALLOWED_HEADERS: "*" or comma-separated request header names
/// - CORS_MAX_AGE: max age in seconds (u64)
///
/// Defaults are permissive (Any) when not configured.
pub fn cors_layer_from_env() -> tower_http::cors::CorsLayer {
    use std::time::Duration;
    use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};

    let list = |key: &str| -> Option<Vec<String>> {
        let raw = std::env::var(key).ok()?;
        let s = raw.trim();
        if s == "*" {
            return None;
        }
        let vals: Vec<String> = s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        (!vals.is_empty()).then_some(vals)
    };

    let mut layer = CorsLayer::new();

    let origins: Vec<http::HeaderValue> = list("CORS_ALLOWED_ORIGINS")
        .unwrap_or_default()
        .iter()
        .filter_map(|o| http::HeaderValue::from_str(o).ok())
        .collect();
    layer = if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    };

    let methods: Vec<http::Method> = list("CORS_ALLOWED_METHODS")
        .unwrap_or_default()
        .iter()
        .filter_map(|m| http::Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
        .collect();
    layer = if methods.is_empty() {
        layer.allow_methods(Any)
    } else {
        layer.allow_methods(AllowMethods::list(methods))
    };

    let headers: Vec<http::header::HeaderName> = list("CORS_ALLOWED_HEADERS")
        .unwrap_or_default()
        .iter()
        .filter_map(|h| http::header::HeaderName::try_from(h.as_str()).ok())
        .collect();
    layer = if headers.is_empty() {
        layer.allow_headers(Any)
    } else {
        layer.allow_headers(AllowHeaders::list(headers))
    };

    if let Ok(secs) = std::env::var("CORS_MAX_AGE") {
        if let Ok(n) = secs.trim().parse::<u64>() {
            layer = layer.max_age(Duration::from_secs(n));
        }
    }

    layer
}
