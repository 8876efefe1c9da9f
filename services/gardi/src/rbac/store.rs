//! In-memory and noop permission cache stores.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{PermissionCacheStore, cache_key};

/// Cache that never hits. Keeps the resolver on the source of truth.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPermissionCacheStore;

#[async_trait]
impl PermissionCacheStore for NoopPermissionCacheStore {
    async fn get(
        &self,
        _user_id: Uuid,
        _session_token_id: &str,
    ) -> anyhow::Result<Option<Vec<String>>> {
        Ok(None)
    }

    async fn set(
        &self,
        _user_id: Uuid,
        _session_token_id: &str,
        _permissions: &[String],
        _ttl: Duration,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn invalidate_user(&self, _user_id: Uuid) -> anyhow::Result<()> {
        Ok(())
    }

    async fn invalidate_all(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Inner {
    data: HashMap<String, (Vec<String>, Instant)>,
    global_epoch: u64,
    user_epochs: HashMap<Uuid, u64>,
}

#[derive(Debug, Default)]
pub struct MemoryPermissionCacheStore {
    inner: Mutex<Inner>,
}

impl MemoryPermissionCacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionCacheStore for MemoryPermissionCacheStore {
    async fn get(
        &self,
        user_id: Uuid,
        session_token_id: &str,
    ) -> anyhow::Result<Option<Vec<String>>> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let user_epoch = inner.user_epochs.get(&user_id).copied().unwrap_or(0);
        let key = cache_key(inner.global_epoch, user_epoch, user_id, session_token_id);
        match inner.data.get(&key) {
            Some((_, expires_at)) if *expires_at <= now => {
                inner.data.remove(&key);
                Ok(None)
            }
            Some((permissions, _)) => Ok(Some(permissions.clone())),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        user_id: Uuid,
        session_token_id: &str,
        permissions: &[String],
        ttl: Duration,
    ) -> anyhow::Result<()> {
        if ttl.is_zero() {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        let user_epoch = inner.user_epochs.get(&user_id).copied().unwrap_or(0);
        let key = cache_key(inner.global_epoch, user_epoch, user_id, session_token_id);
        inner
            .data
            .insert(key, (permissions.to_vec(), Instant::now() + ttl));
        Ok(())
    }

    async fn invalidate_user(&self, user_id: Uuid) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        *inner.user_epochs.entry(user_id).or_insert(0) += 1;
        Ok(())
    }

    async fn invalidate_all(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.global_epoch += 1;
        Ok(())
    }
}
