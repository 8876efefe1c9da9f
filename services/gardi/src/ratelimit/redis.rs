//! Redis-backed limiter. One Lua script per decision keeps concurrent
//! callers on the same key serialized inside the server, so the admitted
//! total can never exceed the policy even under a synchronized burst.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{Script, aio::ConnectionManager};
use std::time::Duration;
use tracing::{Instrument, debug};

use super::{Decision, LimitReason, RateLimitPolicy, RateLimiter};

/// Refill the bucket, prune the window, decide, and commit in one atomic
/// step. Clock source is redis TIME so every instance sees the same now.
/// Returns {allowed, remaining, retry_ms, reset_ms, reason_code}.
const DECIDE_SCRIPT: &str = r"
local bucket_key = KEYS[1] .. ':bucket'
local hits_key = KEYS[1] .. ':hits'
local seq_key = KEYS[1] .. ':seq'
local limit = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local capacity = tonumber(ARGV[3])
local refill_per_sec = tonumber(ARGV[4])

local t = redis.call('TIME')
local now_ms = t[1] * 1000 + math.floor(t[2] / 1000)

local bucket = redis.call('HMGET', bucket_key, 'tokens', 'last_refill_ms')
local tokens = tonumber(bucket[1])
local last_refill = tonumber(bucket[2])
if tokens == nil then tokens = capacity end
if last_refill == nil then last_refill = now_ms end
if now_ms > last_refill then
    tokens = math.min(capacity, tokens + ((now_ms - last_refill) / 1000) * refill_per_sec)
end

redis.call('ZREMRANGEBYSCORE', hits_key, '-inf', now_ms - window_ms)
local hit_count = redis.call('ZCARD', hits_key)

local bucket_retry_ms = 0
local reason = 0
if tokens < 1 then
    bucket_retry_ms = math.ceil(((1 - tokens) / refill_per_sec) * 1000)
    reason = 1
end
local sustained_retry_ms = 0
if hit_count >= limit then
    local oldest = redis.call('ZRANGE', hits_key, 0, 0, 'WITHSCORES')
    if #oldest >= 2 then
        sustained_retry_ms = tonumber(oldest[2]) + window_ms - now_ms
        if sustained_retry_ms < 0 then sustained_retry_ms = 0 end
    end
    if sustained_retry_ms >= bucket_retry_ms then reason = 2 end
end

local allowed = 0
if bucket_retry_ms == 0 and sustained_retry_ms == 0 then
    allowed = 1
    reason = 0
    tokens = math.max(tokens - 1, 0)
    local member = now_ms .. '-' .. redis.call('INCR', seq_key)
    redis.call('ZADD', hits_key, now_ms, member)
    hit_count = hit_count + 1
end

redis.call('HSET', bucket_key, 'tokens', tokens, 'last_refill_ms', now_ms)
redis.call('PEXPIRE', bucket_key, window_ms * 2)
redis.call('PEXPIRE', hits_key, window_ms * 2)
redis.call('PEXPIRE', seq_key, window_ms * 2)

local remaining = math.min(math.floor(tokens), limit - hit_count)
if remaining < 0 then remaining = 0 end
local retry_ms = math.max(bucket_retry_ms, sustained_retry_ms)

local reset_ms = now_ms + window_ms
local oldest = redis.call('ZRANGE', hits_key, 0, 0, 'WITHSCORES')
if #oldest >= 2 then reset_ms = tonumber(oldest[2]) + window_ms end
if allowed == 0 then
    if retry_ms <= 0 then retry_ms = 1000 end
    reset_ms = now_ms + retry_ms
end

return {allowed, remaining, retry_ms, reset_ms, reason}
";

pub struct RedisRateLimiter {
    conn: ConnectionManager,
    prefix: String,
    script: Script,
}

impl RedisRateLimiter {
    #[must_use]
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            script: Script::new(DECIDE_SCRIPT),
        }
    }

    fn rate_limit_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn allow(&self, key: &str, policy: RateLimitPolicy) -> anyhow::Result<Decision> {
        let policy = policy.normalize();
        let span = tracing::info_span!(
            "redis.command",
            db.system = "redis",
            db.operation = "EVALSHA"
        );

        let mut conn = self.conn.clone();
        let (allowed, remaining, retry_ms, reset_ms, reason): (i64, i64, i64, i64, i64) = self
            .script
            .key(self.rate_limit_key(key))
            .arg(i64::from(policy.sustained_limit))
            .arg(policy.sustained_window.as_millis() as i64)
            .arg(i64::from(policy.burst_capacity))
            .arg(policy.burst_refill_per_sec)
            .invoke_async(&mut conn)
            .instrument(span)
            .await
            .context("rate limit decision failed")?;

        let decision = Decision {
            allowed: allowed == 1,
            retry_after: Duration::from_millis(retry_ms.max(0) as u64),
            remaining: remaining.max(0) as u32,
            reset_at: DateTime::<Utc>::from_timestamp_millis(reset_ms).unwrap_or_else(Utc::now),
            reason: match reason {
                1 => Some(LimitReason::Bucket),
                2 => Some(LimitReason::Window),
                _ => None,
            },
        };
        debug!(
            key = %key,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "rate limit decision"
        );
        Ok(decision)
    }
}
