//! Short-lived conversation context keyed by session id.
//!
//! Stores follow last-writer-wins semantics with no locking across turns: two
//! near-simultaneous turns in the same session can lose one side's update.
//! A widget only sends one message at a time per session, so this is an
//! accepted limitation rather than something the stores try to prevent.
//!
//! TTL runs from the last `put`; `get` never extends it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::models::chat::Transcript;

/// Longest session id accepted from a client.
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Sanitized session identifier: `[A-Za-z0-9_-]`, at most 64 chars, non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Strip disallowed characters and truncate. Returns `None` when nothing
    /// usable remains, which callers treat as "start a new conversation".
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .take(MAX_SESSION_ID_LEN)
            .collect();
        if cleaned.is_empty() {
            None
        } else {
            Some(SessionId(cleaned))
        }
    }

    pub fn generate() -> Self {
        SessionId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key-value store of conversation transcripts.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Transcript for `id`, or empty when absent or expired.
    async fn get(&self, id: &str) -> anyhow::Result<Transcript>;

    /// Replace the transcript for `id`. No-op for an empty id.
    async fn put(&self, id: &str, transcript: &Transcript, ttl: Duration) -> anyhow::Result<()>;

    fn backend_name(&self) -> &'static str;
}

struct MemoryEntry {
    transcript: Transcript,
    expires_at: Instant,
}

/// Writes between sweeps of expired entries.
const PURGE_EVERY_WRITES: usize = 256;

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, MemoryEntry>,
    writes_since_purge: usize,
}

impl MemoryInner {
    /// Sweep expired entries once every [`PURGE_EVERY_WRITES`] writes.
    fn maybe_purge(&mut self, now: Instant) {
        self.writes_since_purge += 1;
        if self.writes_since_purge < PURGE_EVERY_WRITES {
            return;
        }
        self.writes_since_purge = 0;
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "purged expired sessions");
        }
    }
}

/// Process-local store; contents are lost on restart.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<MemoryInner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of live (unexpired) sessions.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .entries
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> anyhow::Result<Transcript> {
        if id.is_empty() {
            return Ok(Vec::new());
        }
        let mut inner = self.lock();
        let expired = match inner.entries.get(id) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(entry.transcript.clone())
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.remove(id);
        }
        Ok(Vec::new())
    }

    async fn put(&self, id: &str, transcript: &Transcript, ttl: Duration) -> anyhow::Result<()> {
        if id.is_empty() {
            return Ok(());
        }
        let now = Instant::now();
        let mut inner = self.lock();
        inner.maybe_purge(now);
        inner.entries.insert(
            id.to_string(),
            MemoryEntry {
                transcript: transcript.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(feature = "sled")]
pub use sled_store::SledSessionStore;

#[cfg(feature = "sled")]
mod sled_store {
    use super::*;
    use anyhow::Context;
    use serde::{Deserialize, Serialize};
    use std::time::{SystemTime, UNIX_EPOCH};

    const KEY_PREFIX: &str = "session:";

    #[derive(Serialize, Deserialize)]
    struct Record {
        expires_at_ms: u64,
        messages: Transcript,
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Embedded on-disk store; survives restarts, expiry checked on read.
    pub struct SledSessionStore {
        db: sled::Db,
    }

    impl SledSessionStore {
        pub fn open(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
            let db = sled::open(path.as_ref()).with_context(|| {
                format!("Failed to open sled session db at {}", path.as_ref().display())
            })?;
            Ok(Self::from_db(db))
        }

        pub fn from_db(db: sled::Db) -> Self {
            let store = Self { db };
            match store.purge_expired() {
                Ok(0) => {}
                Ok(n) => tracing::info!(removed = n, "purged expired sessions"),
                Err(e) => tracing::warn!(error = %e, "failed to purge expired sessions"),
            }
            store
        }

        /// Remove every expired record; returns how many were removed.
        pub fn purge_expired(&self) -> anyhow::Result<usize> {
            let now = now_ms();
            let mut removed = 0;
            for item in self.db.scan_prefix(KEY_PREFIX) {
                let (key, value) = item?;
                let expired = serde_json::from_slice::<Record>(&value)
                    .map(|r| r.expires_at_ms <= now)
                    .unwrap_or(true);
                if expired {
                    self.db.remove(key)?;
                    removed += 1;
                }
            }
            Ok(removed)
        }
    }

    #[async_trait]
    impl SessionStore for SledSessionStore {
        async fn get(&self, id: &str) -> anyhow::Result<Transcript> {
            if id.is_empty() {
                return Ok(Vec::new());
            }
            let key = format!("{KEY_PREFIX}{id}");
            let Some(raw) = self.db.get(&key)? else {
                return Ok(Vec::new());
            };
            let record: Record =
                serde_json::from_slice(&raw).context("corrupt session record")?;
            if record.expires_at_ms <= now_ms() {
                self.db.remove(&key)?;
                return Ok(Vec::new());
            }
            Ok(record.messages)
        }

        async fn put(
            &self,
            id: &str,
            transcript: &Transcript,
            ttl: Duration,
        ) -> anyhow::Result<()> {
            if id.is_empty() {
                return Ok(());
            }
            let record = Record {
                expires_at_ms: now_ms().saturating_add(ttl.as_millis() as u64),
                messages: transcript.clone(),
            };
            self.db
                .insert(format!("{KEY_PREFIX}{id}"), serde_json::to_vec(&record)?)?;
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "sled"
        }
    }
}

/// Which store the binary should open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionBackend {
    Memory,
    Sled(PathBuf),
}

impl SessionBackend {
    /// Parse `memory` or `sled:<path>`.
    pub fn parse(spec: &str) -> Option<Self> {
        let s = spec.trim();
        if s.eq_ignore_ascii_case("memory") {
            Some(SessionBackend::Memory)
        } else {
            s.strip_prefix("sled:")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| SessionBackend::Sled(PathBuf::from(p)))
        }
    }

    /// `--session-backend=` from args, then `CHAT_RELAY_SESSION_BACKEND`,
    /// then memory.
    pub fn from_args_and_env(args: &[String]) -> Self {
        let from_args = args
            .iter()
            .find_map(|a| a.strip_prefix("--session-backend="))
            .map(str::to_string);
        let raw = from_args.or_else(|| std::env::var("CHAT_RELAY_SESSION_BACKEND").ok());
        match raw {
            Some(r) => SessionBackend::parse(&r).unwrap_or_else(|| {
                tracing::warn!(value = %r, "unrecognized session backend; using memory");
                SessionBackend::Memory
            }),
            None => SessionBackend::Memory,
        }
    }

    pub fn open(&self) -> anyhow::Result<Arc<dyn SessionStore>> {
        match self {
            SessionBackend::Memory => Ok(Arc::new(MemorySessionStore::new())),
            #[cfg(feature = "sled")]
            SessionBackend::Sled(path) => Ok(Arc::new(SledSessionStore::open(path)?)),
            #[cfg(not(feature = "sled"))]
            SessionBackend::Sled(path) => anyhow::bail!(
                "sled session backend requested ({}) but the `sled` feature is disabled",
                path.display()
            ),
        }
    }
}
