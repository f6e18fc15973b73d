//! Security tokens handed to the widget on page load.
//!
//! Tokens are stateless: `salt || tag`, where `tag` is a SHA-256 digest over a
//! per-process key, the issue time bucket and the salt. Verification
//! recomputes the tag for the current and previous bucket, so a token lives
//! between half and all of the configured TTL and nothing is stored per token.
//! A nonce may be reused by every message sent from the same page; there is
//! no per-request replay window. Tokens do not survive a restart.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

const SALT_LEN: usize = 16;
/// Hex chars of the digest kept in the token.
const TAG_LEN: usize = 32;

pub struct NonceIssuer {
    key: [u8; 32],
    tick_ms: u64,
}

impl NonceIssuer {
    pub fn new(ttl: Duration) -> Self {
        Self::with_key(rand::thread_rng().gen(), ttl)
    }

    /// Issuer with a fixed key; tokens from issuers sharing a key and TTL
    /// verify interchangeably.
    pub fn with_key(key: [u8; 32], ttl: Duration) -> Self {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        Self {
            key,
            tick_ms: (ttl_ms / 2).max(1),
        }
    }

    /// Mint a fresh token.
    pub fn issue(&self) -> String {
        self.issue_at(now_ms())
    }

    /// True when `token` was minted with this key within the last TTL.
    pub fn verify(&self, token: &str) -> bool {
        self.verify_at(token, now_ms())
    }

    fn issue_at(&self, now_ms: u64) -> String {
        let salt: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LEN)
            .map(char::from)
            .collect();
        let tag = self.tag(self.bucket(now_ms), &salt);
        format!("{salt}{tag}")
    }

    fn verify_at(&self, token: &str, now_ms: u64) -> bool {
        if token.len() != SALT_LEN + TAG_LEN || !token.is_ascii() {
            return false;
        }
        let (salt, tag) = token.split_at(SALT_LEN);
        let bucket = self.bucket(now_ms);
        [Some(bucket), bucket.checked_sub(1)]
            .into_iter()
            .flatten()
            .any(|b| constant_time_eq(self.tag(b, salt).as_bytes(), tag.as_bytes()))
    }

    fn bucket(&self, now_ms: u64) -> u64 {
        now_ms / self.tick_ms
    }

    fn tag(&self, bucket: u64, salt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(bucket.to_le_bytes());
        hasher.update(salt.as_bytes());
        let mut hex = format!("{:x}", hasher.finalize());
        hex.truncate(TAG_LEN);
        hex
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
