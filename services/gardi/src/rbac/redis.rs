//! Redis permission cache store. Epochs live in plain counters; INCR is the
//! whole invalidation story.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use super::{PermissionCacheStore, cache_key};

pub struct RedisPermissionCacheStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisPermissionCacheStore {
    #[must_use]
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = if prefix.is_empty() {
            "rbac_perm".to_string()
        } else {
            prefix
        };
        Self { conn, prefix }
    }

    fn global_epoch_key(&self) -> String {
        format!("{}:epoch:global", self.prefix)
    }

    fn user_epoch_key(&self, user_id: Uuid) -> String {
        format!("{}:epoch:user:{user_id}", self.prefix)
    }

    /// Read both epochs in one round trip and build the data key.
    async fn data_key(&self, user_id: Uuid, session_token_id: &str) -> anyhow::Result<String> {
        let span = tracing::info_span!(
            "redis.command",
            db.system = "redis",
            db.operation = "MGET"
        );
        let mut conn = self.conn.clone();
        let (global_raw, user_raw): (Option<String>, Option<String>) = redis::pipe()
            .get(self.global_epoch_key())
            .get(self.user_epoch_key(user_id))
            .query_async(&mut conn)
            .instrument(span)
            .await
            .context("failed to read permission cache epochs")?;

        let global_epoch = parse_epoch(global_raw.as_deref())?;
        let user_epoch = parse_epoch(user_raw.as_deref())?;
        Ok(cache_key(
            global_epoch,
            user_epoch,
            user_id,
            session_token_id,
        ))
    }
}

/// Absent counters mean epoch zero; anything present must parse. A value we
/// cannot read is an error, not a zero, otherwise a corrupted counter would
/// silently resurrect pre-invalidation entries.
fn parse_epoch(raw: Option<&str>) -> anyhow::Result<u64> {
    match raw {
        None | Some("") => Ok(0),
        Some(value) => value
            .parse()
            .map_err(|_| anyhow!("malformed epoch value: {value}")),
    }
}

#[async_trait]
impl PermissionCacheStore for RedisPermissionCacheStore {
    async fn get(
        &self,
        user_id: Uuid,
        session_token_id: &str,
    ) -> anyhow::Result<Option<Vec<String>>> {
        let key = self.data_key(user_id, session_token_id).await?;
        let span = tracing::info_span!(
            "redis.command",
            db.system = "redis",
            db.operation = "GET"
        );
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(&key)
            .instrument(span)
            .await
            .context("failed to read permission cache entry")?;
        match raw {
            None => Ok(None),
            Some(payload) => {
                let permissions: Vec<String> = serde_json::from_str(&payload)
                    .context("malformed permission cache payload")?;
                Ok(Some(permissions))
            }
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
        let key = self.data_key(user_id, session_token_id).await?;
        let payload =
            serde_json::to_string(permissions).context("failed to encode permissions")?;
        let span = tracing::info_span!(
            "redis.command",
            db.system = "redis",
            db.operation = "SET"
        );
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(&key, payload, ttl.as_secs().max(1))
            .instrument(span)
            .await
            .context("failed to write permission cache entry")?;
        Ok(())
    }

    async fn invalidate_user(&self, user_id: Uuid) -> anyhow::Result<()> {
        let span = tracing::info_span!(
            "redis.command",
            db.system = "redis",
            db.operation = "INCR"
        );
        let mut conn = self.conn.clone();
        conn.incr::<_, _, i64>(self.user_epoch_key(user_id), 1)
            .instrument(span)
            .await
            .context("failed to bump user epoch")?;
        Ok(())
    }

    async fn invalidate_all(&self) -> anyhow::Result<()> {
        let span = tracing::info_span!(
            "redis.command",
            db.system = "redis",
            db.operation = "INCR"
        );
        let mut conn = self.conn.clone();
        conn.incr::<_, _, i64>(self.global_epoch_key(), 1)
            .instrument(span)
            .await
            .context("failed to bump global epoch")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::parse_epoch;

    #[test]
    fn absent_or_empty_epoch_is_zero() {
        assert_eq!(parse_epoch(None).unwrap(), 0);
        assert_eq!(parse_epoch(Some("")).unwrap(), 0);
    }

    #[test]
    fn numeric_epoch_parses() {
        assert_eq!(parse_epoch(Some("42")).unwrap(), 42);
    }

    #[test]
    fn malformed_epoch_fails_closed() {
        assert!(parse_epoch(Some("not-a-number")).is_err());
        assert!(parse_epoch(Some("-1")).is_err());
    }
}
