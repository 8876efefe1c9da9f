//! At-most-once handling for unsafe endpoints.
//!
//! Every (scope, key) pair owns a record that moves through
//! `in_progress` → `completed`. `begin` is a single conditional step, so N
//! concurrent requests with the same key see exactly one `New`; the rest
//! observe `InProgress` or, after completion, get the recorded response
//! replayed byte for byte.

mod memory;
mod redis;

pub use memory::MemoryIdempotencyStore;
pub use redis::RedisIdempotencyStore;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// The response captured for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Where a request landed in the per-key state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// No record existed; this caller owns the execution.
    New,
    /// Same fingerprint, still executing elsewhere.
    InProgress,
    /// Same fingerprint, already completed: replay this response.
    Replay(CachedResponse),
    /// The key was reused with a different payload.
    Conflict,
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Enter the state machine. On `New` the record is created atomically
    /// with `ttl`; the conditional create is what guarantees a single owner
    /// under concurrency.
    ///
    /// # Errors
    /// Returns an error when the backend is unreachable or a persisted
    /// record is malformed (fail closed, never guess a replay).
    async fn begin(
        &self,
        scope: &str,
        key: &str,
        fingerprint: &str,
        ttl: Duration,
    ) -> anyhow::Result<BeginOutcome>;

    /// Record the handler's response and refresh the TTL to the longer
    /// completion TTL.
    ///
    /// # Errors
    /// Returns an error when the backend write fails.
    async fn complete(
        &self,
        scope: &str,
        key: &str,
        fingerprint: &str,
        response: CachedResponse,
        completion_ttl: Duration,
    ) -> anyhow::Result<()>;
}

/// Store that never remembers anything. Requests always execute.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIdempotencyStore;

#[async_trait]
impl IdempotencyStore for NoopIdempotencyStore {
    async fn begin(
        &self,
        _scope: &str,
        _key: &str,
        _fingerprint: &str,
        _ttl: Duration,
    ) -> anyhow::Result<BeginOutcome> {
        Ok(BeginOutcome::New)
    }

    async fn complete(
        &self,
        _scope: &str,
        _key: &str,
        _fingerprint: &str,
        _response: CachedResponse,
        _completion_ttl: Duration,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hash a request into its idempotency fingerprint. A client reusing a key
/// with a different payload produces a different fingerprint and gets a
/// conflict instead of a stale replay.
#[must_use]
pub fn fingerprint(method: &str, path: &str, actor: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(path.as_bytes());
    hasher.update(actor.as_bytes());
    hasher.update(body);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_changes_with_any_input() {
        let base = fingerprint("POST", "/api/v1/auth/local/register", "1.2.3.4", b"{}");
        assert_ne!(
            base,
            fingerprint("PATCH", "/api/v1/auth/local/register", "1.2.3.4", b"{}")
        );
        assert_ne!(base, fingerprint("POST", "/other", "1.2.3.4", b"{}"));
        assert_ne!(
            base,
            fingerprint("POST", "/api/v1/auth/local/register", "sub:42", b"{}")
        );
        assert_ne!(
            base,
            fingerprint("POST", "/api/v1/auth/local/register", "1.2.3.4", b"{-}")
        );
        assert_eq!(
            base,
            fingerprint("POST", "/api/v1/auth/local/register", "1.2.3.4", b"{}")
        );
    }

    #[tokio::test]
    async fn noop_store_always_hands_out_new() {
        let store = NoopIdempotencyStore;
        let ttl = Duration::from_secs(60);
        assert_eq!(
            store.begin("scope", "key", "fp", ttl).await.unwrap(),
            BeginOutcome::New
        );
        store
            .complete(
                "scope",
                "key",
                "fp",
                CachedResponse {
                    status: 201,
                    content_type: "application/json".to_string(),
                    body: b"{}".to_vec(),
                },
                ttl,
            )
            .await
            .unwrap();
        assert_eq!(
            store.begin("scope", "key", "fp", ttl).await.unwrap(),
            BeginOutcome::New
        );
    }
}
