//! Redis abuse guard. Failure registration is a Lua script so the counter
//! increment and the cooldown stamp cannot tear under concurrency.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Script, aio::ConnectionManager};
use std::time::Duration;
use tracing::Instrument;

use super::{AbuseGuard, AbusePolicy, AbuseScope, normalize_identity};

const REGISTER_FAILURE_SCRIPT: &str = r"
local key = KEYS[1]
local free = tonumber(ARGV[1])
local base_ms = tonumber(ARGV[2])
local mult = tonumber(ARGV[3])
local max_ms = tonumber(ARGV[4])
local reset_ms = tonumber(ARGV[5])

local t = redis.call('TIME')
local now_ms = t[1] * 1000 + math.floor(t[2] / 1000)

local failures = redis.call('HINCRBY', key, 'failures', 1)
local cooldown_ms = 0
if failures > free then
    cooldown_ms = math.floor(base_ms * math.pow(mult, failures - free))
    if cooldown_ms > max_ms then cooldown_ms = max_ms end
end
redis.call('HSET', key, 'last_failure_ms', now_ms, 'cooldown_until_ms', now_ms + cooldown_ms)
redis.call('PEXPIRE', key, reset_ms)
return cooldown_ms
";

pub struct RedisAbuseGuard {
    conn: ConnectionManager,
    prefix: String,
    policy: AbusePolicy,
    register_script: Script,
}

impl RedisAbuseGuard {
    #[must_use]
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>, policy: AbusePolicy) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            policy,
            register_script: Script::new(REGISTER_FAILURE_SCRIPT),
        }
    }

    fn state_key(&self, scope: AbuseScope, identity: &str, ip: &str) -> String {
        format!(
            "{}:{}:{}:{ip}",
            self.prefix,
            scope.as_str(),
            normalize_identity(identity)
        )
    }
}

fn parse_field(raw: Option<&str>, field: &str) -> anyhow::Result<Option<i64>> {
    match raw {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("malformed abuse guard field {field}: {value}")),
    }
}

#[async_trait]
impl AbuseGuard for RedisAbuseGuard {
    async fn check(
        &self,
        scope: AbuseScope,
        identity: &str,
        ip: &str,
    ) -> anyhow::Result<Duration> {
        let span = tracing::info_span!(
            "redis.command",
            db.system = "redis",
            db.operation = "HMGET"
        );
        let mut conn = self.conn.clone();
        let (last_failure, cooldown_until): (Option<String>, Option<String>) = conn
            .hget(
                self.state_key(scope, identity, ip),
                &["last_failure_ms", "cooldown_until_ms"],
            )
            .instrument(span)
            .await
            .context("failed to read abuse guard state")?;

        // Both fields must parse; garbage state fails closed.
        let _ = parse_field(last_failure.as_deref(), "last_failure_ms")?;
        let Some(cooldown_until) = parse_field(cooldown_until.as_deref(), "cooldown_until_ms")?
        else {
            return Ok(Duration::ZERO);
        };

        let span = tracing::info_span!(
            "redis.command",
            db.system = "redis",
            db.operation = "TIME"
        );
        let (secs, micros): (i64, i64) = redis::cmd("TIME")
            .query_async(&mut conn)
            .instrument(span)
            .await
            .context("failed to read redis time")?;
        let now_ms = secs * 1000 + micros / 1000;

        let remaining_ms = cooldown_until - now_ms;
        if remaining_ms <= 0 {
            return Ok(Duration::ZERO);
        }
        Ok(Duration::from_millis(remaining_ms as u64))
    }

    async fn register_failure(
        &self,
        scope: AbuseScope,
        identity: &str,
        ip: &str,
    ) -> anyhow::Result<Duration> {
        let span = tracing::info_span!(
            "redis.command",
            db.system = "redis",
            db.operation = "EVALSHA"
        );
        let mut conn = self.conn.clone();
        let cooldown_ms: i64 = self
            .register_script
            .key(self.state_key(scope, identity, ip))
            .arg(i64::from(self.policy.free_attempts))
            .arg(self.policy.base_delay.as_millis() as i64)
            .arg(self.policy.multiplier)
            .arg(self.policy.max_delay.as_millis() as i64)
            .arg(self.policy.reset_window.as_millis() as i64)
            .invoke_async(&mut conn)
            .instrument(span)
            .await
            .context("failed to register auth failure")?;
        Ok(Duration::from_millis(cooldown_ms.max(0) as u64))
    }

    async fn reset(&self, scope: AbuseScope, identity: &str, ip: &str) -> anyhow::Result<()> {
        let span = tracing::info_span!(
            "redis.command",
            db.system = "redis",
            db.operation = "DEL"
        );
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.state_key(scope, identity, ip))
            .instrument(span)
            .await
            .context("failed to reset abuse guard state")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::parse_field;

    #[test]
    fn absent_fields_are_none() {
        assert_eq!(parse_field(None, "f").unwrap(), None);
        assert_eq!(parse_field(Some(""), "f").unwrap(), None);
    }

    #[test]
    fn numeric_fields_parse() {
        assert_eq!(parse_field(Some("1700000000000"), "f").unwrap(), Some(1_700_000_000_000));
    }

    #[test]
    fn malformed_fields_fail_closed() {
        assert!(parse_field(Some("bad"), "f").is_err());
    }
}
