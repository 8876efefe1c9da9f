//! Hybrid rate limiting: a sustained window bounds throughput over time, a
//! token bucket absorbs bursts. Both must agree before a request passes.

mod local;
mod redis;

pub use local::LocalRateLimiter;
pub use redis::RedisRateLimiter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Limits for one key. `burst_refill_per_sec` defaults to
/// `sustained_limit / sustained_window` so the bucket refills exactly as fast
/// as the window frees up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitPolicy {
    pub sustained_limit: u32,
    pub sustained_window: Duration,
    pub burst_capacity: u32,
    pub burst_refill_per_sec: f64,
}

impl RateLimitPolicy {
    /// Policy with burst capacity equal to the sustained limit.
    #[must_use]
    pub fn per_window(limit: u32, window: Duration) -> Self {
        Self {
            sustained_limit: limit,
            sustained_window: window,
            burst_capacity: limit,
            burst_refill_per_sec: 0.0,
        }
        .normalize()
    }

    /// Clamp degenerate values into a usable policy.
    #[must_use]
    pub fn normalize(mut self) -> Self {
        if self.sustained_limit == 0 {
            self.sustained_limit = 1;
        }
        if self.sustained_window.is_zero() {
            self.sustained_window = Duration::from_secs(60);
        }
        if self.burst_capacity < self.sustained_limit {
            self.burst_capacity = self.sustained_limit;
        }
        if self.burst_refill_per_sec <= 0.0 {
            self.burst_refill_per_sec =
                f64::from(self.sustained_limit) / self.sustained_window.as_secs_f64();
        }
        self
    }
}

/// What denied a request (window wins ties).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReason {
    Bucket,
    Window,
}

impl LimitReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bucket => "bucket",
            Self::Window => "window",
        }
    }
}

/// Outcome of one `allow` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    pub retry_after: Duration,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub reason: Option<LimitReason>,
}

/// One atomic admission decision per (key, policy).
///
/// Implementations must be safe for concurrent callers on the same key: the
/// total number of allowed requests within any window of the sustained
/// length never exceeds the limit by more than one refilled token.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// # Errors
    /// Returns an error when the backing store is unreachable. Callers decide
    /// between fail-open and fail-closed; the limiter never silently denies.
    async fn allow(&self, key: &str, policy: RateLimitPolicy) -> anyhow::Result<Decision>;
}

/// Limiter that admits everything. Used when limiting is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn allow(&self, _key: &str, policy: RateLimitPolicy) -> anyhow::Result<Decision> {
        let policy = policy.normalize();
        Ok(Decision {
            allowed: true,
            retry_after: Duration::ZERO,
            remaining: policy.sustained_limit,
            reset_at: Utc::now()
                + chrono::Duration::from_std(policy.sustained_window)
                    .unwrap_or_else(|_| chrono::Duration::seconds(60)),
            reason: None,
        })
    }
}
