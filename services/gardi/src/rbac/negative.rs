//! Negative lookup cache: remembers identities that were recently looked up
//! and missed, so hot 404 paths skip the backing store.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::Instrument;

#[async_trait]
pub trait NegativeLookupCache: Send + Sync {
    /// True when the key is a known miss.
    ///
    /// # Errors
    /// Returns an error when the backend fails.
    async fn get(&self, namespace: &str, key: &str) -> anyhow::Result<bool>;

    /// # Errors
    /// Returns an error when the backend fails.
    async fn set(&self, namespace: &str, key: &str, ttl: Duration) -> anyhow::Result<()>;

    /// Drop every remembered miss in the namespace, e.g. after a write that
    /// could turn misses into hits.
    ///
    /// # Errors
    /// Returns an error when the backend fails.
    async fn invalidate_namespace(&self, namespace: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNegativeLookupCache;

#[async_trait]
impl NegativeLookupCache for NoopNegativeLookupCache {
    async fn get(&self, _namespace: &str, _key: &str) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn set(&self, _namespace: &str, _key: &str, _ttl: Duration) -> anyhow::Result<()> {
        Ok(())
    }

    async fn invalidate_namespace(&self, _namespace: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryNegativeLookupCache {
    store: Mutex<HashMap<String, HashMap<String, Instant>>>,
}

impl MemoryNegativeLookupCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NegativeLookupCache for MemoryNegativeLookupCache {
    async fn get(&self, namespace: &str, key: &str) -> anyhow::Result<bool> {
        let now = Instant::now();
        let mut store = self.store.lock().await;
        let Some(entries) = store.get_mut(namespace) else {
            return Ok(false);
        };
        match entries.get(key) {
            Some(expires_at) if *expires_at > now => Ok(true),
            Some(_) => {
                entries.remove(key);
                if entries.is_empty() {
                    store.remove(namespace);
                }
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn set(&self, namespace: &str, key: &str, ttl: Duration) -> anyhow::Result<()> {
        if ttl.is_zero() {
            return Ok(());
        }
        let mut store = self.store.lock().await;
        store
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn invalidate_namespace(&self, namespace: &str) -> anyhow::Result<()> {
        let mut store = self.store.lock().await;
        store.remove(namespace);
        Ok(())
    }
}

/// Redis variant: one value per miss plus a namespace index set, so
/// invalidation deletes exactly the namespace's keys without scanning.
pub struct RedisNegativeLookupCache {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisNegativeLookupCache {
    #[must_use]
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = if prefix.is_empty() {
            "negative_lookup".to_string()
        } else {
            prefix
        };
        Self { conn, prefix }
    }

    fn data_key(&self, namespace: &str, key: &str) -> String {
        // Keys may hold identities (emails); store only a hash.
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        let mut hashed = String::with_capacity(digest.len() * 2);
        for byte in digest {
            use std::fmt::Write as _;
            let _ = write!(hashed, "{byte:02x}");
        }
        format!("{}:data:{namespace}:{hashed}", self.prefix)
    }

    fn index_key(&self, namespace: &str) -> String {
        format!("{}:index:{namespace}", self.prefix)
    }
}

#[async_trait]
impl NegativeLookupCache for RedisNegativeLookupCache {
    async fn get(&self, namespace: &str, key: &str) -> anyhow::Result<bool> {
        let span = tracing::info_span!(
            "redis.command",
            db.system = "redis",
            db.operation = "GET"
        );
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(self.data_key(namespace, key))
            .instrument(span)
            .await
            .context("failed to read negative lookup entry")?;
        Ok(value.is_some())
    }

    async fn set(&self, namespace: &str, key: &str, ttl: Duration) -> anyhow::Result<()> {
        if ttl.is_zero() {
            return Ok(());
        }
        let data_key = self.data_key(namespace, key);
        let index_key = self.index_key(namespace);
        let span = tracing::info_span!(
            "redis.command",
            db.system = "redis",
            db.operation = "SET"
        );
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .set_ex(&data_key, "1", ttl.as_secs().max(1))
            .sadd(&index_key, &data_key)
            .expire(&index_key, (ttl.as_secs().max(1) + 60) as i64)
            .query_async::<()>(&mut conn)
            .instrument(span)
            .await
            .context("failed to write negative lookup entry")?;
        Ok(())
    }

    async fn invalidate_namespace(&self, namespace: &str) -> anyhow::Result<()> {
        let index_key = self.index_key(namespace);
        let span = tracing::info_span!(
            "redis.command",
            db.system = "redis",
            db.operation = "SMEMBERS"
        );
        let mut conn = self.conn.clone();
        let keys: HashSet<String> = conn
            .smembers(&index_key)
            .instrument(span)
            .await
            .context("failed to read negative lookup index")?;

        let span = tracing::info_span!(
            "redis.command",
            db.system = "redis",
            db.operation = "DEL"
        );
        let mut pipe = redis::pipe();
        pipe.atomic();
        if !keys.is_empty() {
            pipe.del(keys.into_iter().collect::<Vec<_>>());
        }
        pipe.del(&index_key);
        pipe.query_async::<()>(&mut conn)
            .instrument(span)
            .await
            .context("failed to invalidate negative lookup namespace")?;
        Ok(())
    }
}
