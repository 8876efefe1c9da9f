//! Exponential cooldown against credential guessing.
//!
//! State is keyed by (scope, identity, ip). Failures inside the free budget
//! cost nothing; past it the cooldown grows geometrically up to a cap, and a
//! successful authentication clears the slate. Idle state evaporates after
//! the reset window.

mod memory;
mod redis;

pub use memory::MemoryAbuseGuard;
pub use redis::RedisAbuseGuard;

use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbuseScope {
    Login,
    Forgot,
}

impl AbuseScope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Forgot => "forgot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbusePolicy {
    pub free_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub reset_window: Duration,
}

impl Default for AbusePolicy {
    fn default() -> Self {
        Self {
            free_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(15 * 60),
            reset_window: Duration::from_secs(60 * 60),
        }
    }
}

impl AbusePolicy {
    /// Cooldown after the nth consecutive failure.
    #[must_use]
    pub fn cooldown_for(&self, failures: u32) -> Duration {
        if failures <= self.free_attempts {
            return Duration::ZERO;
        }
        let exponent = failures - self.free_attempts;
        let factor = self.multiplier.max(1.0).powi(exponent as i32);
        let delay = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

#[async_trait]
pub trait AbuseGuard: Send + Sync {
    /// Remaining cooldown, zero when none is active.
    ///
    /// # Errors
    /// Returns an error when the backend fails or persisted state is
    /// malformed (fail closed).
    async fn check(
        &self,
        scope: AbuseScope,
        identity: &str,
        ip: &str,
    ) -> anyhow::Result<Duration>;

    /// Record a failed attempt and return the new cooldown.
    ///
    /// # Errors
    /// Returns an error when the backend fails.
    async fn register_failure(
        &self,
        scope: AbuseScope,
        identity: &str,
        ip: &str,
    ) -> anyhow::Result<Duration>;

    /// Clear all state after a successful authentication.
    ///
    /// # Errors
    /// Returns an error when the backend fails.
    async fn reset(&self, scope: AbuseScope, identity: &str, ip: &str) -> anyhow::Result<()>;
}

/// Guard that never slows anyone down. Used when abuse guarding is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAbuseGuard;

#[async_trait]
impl AbuseGuard for NoopAbuseGuard {
    async fn check(
        &self,
        _scope: AbuseScope,
        _identity: &str,
        _ip: &str,
    ) -> anyhow::Result<Duration> {
        Ok(Duration::ZERO)
    }

    async fn register_failure(
        &self,
        _scope: AbuseScope,
        _identity: &str,
        _ip: &str,
    ) -> anyhow::Result<Duration> {
        Ok(Duration::ZERO)
    }

    async fn reset(&self, _scope: AbuseScope, _identity: &str, _ip: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

pub(crate) fn normalize_identity(identity: &str) -> String {
    identity.trim().to_lowercase()
}
