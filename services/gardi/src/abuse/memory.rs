//! In-memory abuse guard.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AbuseGuard, AbusePolicy, AbuseScope, normalize_identity};

#[derive(Debug, Clone, Copy)]
struct AbuseState {
    failures: u32,
    last_failure: Instant,
    cooldown_until: Instant,
}

#[derive(Debug)]
pub struct MemoryAbuseGuard {
    policy: AbusePolicy,
    state: Mutex<HashMap<String, AbuseState>>,
}

impl MemoryAbuseGuard {
    #[must_use]
    pub fn new(policy: AbusePolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn state_key(scope: AbuseScope, identity: &str, ip: &str) -> String {
        format!("{}:{}:{ip}", scope.as_str(), normalize_identity(identity))
    }
}

#[async_trait]
impl AbuseGuard for MemoryAbuseGuard {
    async fn check(
        &self,
        scope: AbuseScope,
        identity: &str,
        ip: &str,
    ) -> anyhow::Result<Duration> {
        let now = Instant::now();
        let key = Self::state_key(scope, identity, ip);
        let mut state = self.state.lock().await;
        match state.get(&key) {
            None => Ok(Duration::ZERO),
            Some(entry)
                if now.saturating_duration_since(entry.last_failure)
                    > self.policy.reset_window =>
            {
                state.remove(&key);
                Ok(Duration::ZERO)
            }
            Some(entry) => Ok(entry.cooldown_until.saturating_duration_since(now)),
        }
    }

    async fn register_failure(
        &self,
        scope: AbuseScope,
        identity: &str,
        ip: &str,
    ) -> anyhow::Result<Duration> {
        let now = Instant::now();
        let key = Self::state_key(scope, identity, ip);
        let mut state = self.state.lock().await;

        let failures = match state.get(&key) {
            Some(entry)
                if now.saturating_duration_since(entry.last_failure)
                    <= self.policy.reset_window =>
            {
                entry.failures + 1
            }
            _ => 1,
        };
        let cooldown = self.policy.cooldown_for(failures);
        state.insert(
            key,
            AbuseState {
                failures,
                last_failure: now,
                cooldown_until: now + cooldown,
            },
        );
        Ok(cooldown)
    }

    async fn reset(&self, scope: AbuseScope, identity: &str, ip: &str) -> anyhow::Result<()> {
        let key = Self::state_key(scope, identity, ip);
        self.state.lock().await.remove(&key);
        Ok(())
    }
}
