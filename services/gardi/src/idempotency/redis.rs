//! Redis idempotency store. The record is one hash per (scope, key); `begin`
//! is a Lua compare-and-set so the NEW transition happens exactly once.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use redis::{Script, aio::ConnectionManager};
use std::time::Duration;
use tracing::Instrument;

use super::{BeginOutcome, CachedResponse, IdempotencyStore};

/// Returns {state, response_status, content_type, response_body}; the last
/// three are empty strings unless state == 'replay'.
const BEGIN_SCRIPT: &str = r"
local key = KEYS[1]
local fp = ARGV[1]
local ttl_ms = tonumber(ARGV[2])

if redis.call('EXISTS', key) == 0 then
    redis.call('HSET', key, 'fingerprint', fp, 'status', 'in_progress')
    redis.call('PEXPIRE', key, ttl_ms)
    return {'new', '', '', ''}
end

local stored_fp = redis.call('HGET', key, 'fingerprint')
if stored_fp ~= fp then
    return {'conflict', '', '', ''}
end

local status = redis.call('HGET', key, 'status')
if status == 'in_progress' then
    return {'in_progress', '', '', ''}
end
if status == 'completed' then
    return {'replay',
        redis.call('HGET', key, 'response_status'),
        redis.call('HGET', key, 'content_type'),
        redis.call('HGET', key, 'response_body')}
end
return {'corrupt', tostring(status), '', ''}
";

pub struct RedisIdempotencyStore {
    conn: ConnectionManager,
    prefix: String,
    begin_script: Script,
}

impl RedisIdempotencyStore {
    #[must_use]
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            begin_script: Script::new(BEGIN_SCRIPT),
        }
    }

    fn record_key(&self, scope: &str, key: &str) -> String {
        format!("{}:{scope}:{key}", self.prefix)
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn begin(
        &self,
        scope: &str,
        key: &str,
        fingerprint: &str,
        ttl: Duration,
    ) -> anyhow::Result<BeginOutcome> {
        let span = tracing::info_span!(
            "redis.command",
            db.system = "redis",
            db.operation = "EVALSHA"
        );
        let mut conn = self.conn.clone();
        let (state, status, content_type, body): (String, String, String, String) = self
            .begin_script
            .key(self.record_key(scope, key))
            .arg(fingerprint)
            .arg(ttl.as_millis() as i64)
            .invoke_async(&mut conn)
            .instrument(span)
            .await
            .context("idempotency begin failed")?;

        match state.as_str() {
            "new" => Ok(BeginOutcome::New),
            "in_progress" => Ok(BeginOutcome::InProgress),
            "conflict" => Ok(BeginOutcome::Conflict),
            "replay" => {
                // A completed record that does not parse must surface as an
                // error, never as a guessed replay.
                let status: u16 = status
                    .parse()
                    .map_err(|_| anyhow!("malformed replay status: {status}"))?;
                let body = BASE64
                    .decode(body.as_bytes())
                    .map_err(|_| anyhow!("malformed replay body"))?;
                Ok(BeginOutcome::Replay(CachedResponse {
                    status,
                    content_type,
                    body,
                }))
            }
            other => Err(anyhow!("corrupt idempotency record state: {other}")),
        }
    }

    async fn complete(
        &self,
        scope: &str,
        key: &str,
        fingerprint: &str,
        response: CachedResponse,
        completion_ttl: Duration,
    ) -> anyhow::Result<()> {
        let span = tracing::info_span!(
            "redis.command",
            db.system = "redis",
            db.operation = "HSET"
        );
        let record_key = self.record_key(scope, key);
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hset(&record_key, "fingerprint", fingerprint)
            .hset(&record_key, "status", "completed")
            .hset(&record_key, "response_status", i64::from(response.status))
            .hset(&record_key, "content_type", &response.content_type)
            .hset(&record_key, "response_body", BASE64.encode(&response.body))
            .pexpire(&record_key, completion_ttl.as_millis() as i64)
            .query_async::<()>(&mut conn)
            .instrument(span)
            .await
            .context("idempotency complete failed")?;
        Ok(())
    }
}
