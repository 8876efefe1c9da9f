//! In-process hybrid limiter: one mutex over a keyed map of window hits and
//! bucket levels. Refill math runs on a monotonic clock; only `reset_at`
//! touches the wall clock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use super::{Decision, LimitReason, RateLimitPolicy, RateLimiter};

struct HybridState {
    tokens: f64,
    last_refill: Instant,
    hits: Vec<Instant>,
}

pub struct LocalRateLimiter {
    inner: Mutex<Inner>,
}

struct Inner {
    store: HashMap<String, HybridState>,
    cleanup_after: Instant,
}

impl Default for LocalRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                store: HashMap::new(),
                cleanup_after: Instant::now() + Duration::from_secs(60),
            }),
        }
    }

    fn decide(&self, key: &str, policy: RateLimitPolicy, now: Instant) -> Decision {
        let policy = policy.normalize();
        let mut inner = self.inner.lock().expect("rate limiter mutex poisoned");

        // Idle entries are garbage-collected lazily on access.
        if now >= inner.cleanup_after {
            let window = policy.sustained_window;
            inner
                .store
                .retain(|_, state| {
                    !(state.hits.is_empty()
                        && now.saturating_duration_since(state.last_refill) > 2 * window)
                });
            inner.cleanup_after = now + policy.sustained_window;
        }

        let state = inner
            .store
            .entry(key.to_string())
            .or_insert_with(|| HybridState {
                tokens: f64::from(policy.burst_capacity),
                last_refill: now,
                hits: Vec::new(),
            });

        if now > state.last_refill {
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();
            state.tokens = f64::from(policy.burst_capacity)
                .min(state.tokens + elapsed * policy.burst_refill_per_sec);
            state.last_refill = now;
        }

        let cutoff = now.checked_sub(policy.sustained_window);
        state
            .hits
            .retain(|hit| cutoff.is_none_or(|cutoff| *hit > cutoff));

        let mut sustained_remaining =
            i64::from(policy.sustained_limit) - state.hits.len() as i64;

        let mut reason = None;
        let bucket_retry = if state.tokens < 1.0 {
            reason = Some(LimitReason::Bucket);
            let need = 1.0 - state.tokens;
            Duration::from_nanos(((need / policy.burst_refill_per_sec) * 1e9).ceil() as u64)
        } else {
            Duration::ZERO
        };
        let sustained_retry = if sustained_remaining <= 0 {
            let retry = (state.hits[0] + policy.sustained_window)
                .saturating_duration_since(now);
            if retry >= bucket_retry {
                reason = Some(LimitReason::Window);
            }
            retry
        } else {
            Duration::ZERO
        };

        let allowed = bucket_retry.is_zero() && sustained_retry.is_zero();
        if allowed {
            state.tokens = (state.tokens - 1.0).max(0.0);
            state.hits.push(now);
            sustained_remaining = i64::from(policy.sustained_limit) - state.hits.len() as i64;
        }

        let bucket_remaining = state.tokens.floor().max(0.0) as i64;
        let remaining = bucket_remaining.min(sustained_remaining).max(0) as u32;
        let mut retry_after = bucket_retry.max(sustained_retry);
        if !allowed && retry_after.is_zero() {
            retry_after = Duration::from_secs(1);
        }

        let reset_offset = if !allowed {
            retry_after
        } else if let Some(first) = state.hits.first() {
            (*first + policy.sustained_window).saturating_duration_since(now)
        } else {
            policy.sustained_window
        };

        Decision {
            allowed,
            retry_after,
            remaining,
            reset_at: Utc::now()
                + chrono::Duration::from_std(reset_offset)
                    .unwrap_or_else(|_| chrono::Duration::seconds(1)),
            reason: if allowed { None } else { reason },
        }
    }
}

#[async_trait]
impl RateLimiter for LocalRateLimiter {
    async fn allow(&self, key: &str, policy: RateLimitPolicy) -> anyhow::Result<Decision> {
        Ok(self.decide(key, policy, Instant::now()))
    }
}
