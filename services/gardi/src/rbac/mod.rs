//! Permission resolution with an epoch-invalidated cache.
//!
//! Cache keys embed two counters: a global epoch and a per-user epoch.
//! Invalidation bumps a counter, which makes every older key unreachable in
//! one O(1) write. Nothing is deleted; orphaned entries simply age out on
//! TTL. Concurrent writers racing an invalidation land their entries under
//! the old epoch, where nobody will ever look again.

mod negative;
mod redis;
mod resolver;
mod store;

pub use negative::{
    MemoryNegativeLookupCache, NegativeLookupCache, NoopNegativeLookupCache,
    RedisNegativeLookupCache,
};
pub use redis::RedisPermissionCacheStore;
pub use resolver::{PermissionResolver, has_permission};
pub use store::{MemoryPermissionCacheStore, NoopPermissionCacheStore};

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Build the composite cache key. Empty session token ids collapse to
/// `none` so tokens without a jti still partition away from each other's
/// users.
#[must_use]
pub fn cache_key(
    global_epoch: u64,
    user_epoch: u64,
    user_id: Uuid,
    session_token_id: &str,
) -> String {
    let session_token_id = if session_token_id.is_empty() {
        "none"
    } else {
        session_token_id
    };
    format!("rbacperm:g{global_epoch}:u{user_epoch}:user:{user_id}:s:{session_token_id}")
}

#[async_trait]
pub trait PermissionCacheStore: Send + Sync {
    /// # Errors
    /// Returns an error when the backend fails or persisted epoch state is
    /// malformed. Malformed state is never treated as epoch zero.
    async fn get(
        &self,
        user_id: Uuid,
        session_token_id: &str,
    ) -> anyhow::Result<Option<Vec<String>>>;

    /// # Errors
    /// Returns an error when the backend write fails.
    async fn set(
        &self,
        user_id: Uuid,
        session_token_id: &str,
        permissions: &[String],
        ttl: Duration,
    ) -> anyhow::Result<()>;

    /// Bump the user's epoch; all their cached entries orphan instantly.
    ///
    /// # Errors
    /// Returns an error when the backend write fails.
    async fn invalidate_user(&self, user_id: Uuid) -> anyhow::Result<()>;

    /// Bump the global epoch; every cached entry orphans instantly.
    ///
    /// # Errors
    /// Returns an error when the backend write fails.
    async fn invalidate_all(&self) -> anyhow::Result<()>;
}
