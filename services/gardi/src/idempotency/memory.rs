//! In-memory idempotency store.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{BeginOutcome, CachedResponse, IdempotencyStore};

#[derive(Debug, Clone, PartialEq, Eq)]
enum RecordStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone)]
struct Record {
    fingerprint: String,
    status: RecordStatus,
    response: Option<CachedResponse>,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct MemoryIdempotencyStore {
    records: Mutex<HashMap<String, Record>>,
}

impl MemoryIdempotencyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record_key(scope: &str, key: &str) -> String {
        format!("{scope}:{key}")
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn begin(
        &self,
        scope: &str,
        key: &str,
        fingerprint: &str,
        ttl: Duration,
    ) -> anyhow::Result<BeginOutcome> {
        let now = Instant::now();
        let record_key = Self::record_key(scope, key);
        let mut records = self.records.lock().await;

        // Lapsed records restart the flow as New.
        if records
            .get(&record_key)
            .is_some_and(|record| record.expires_at <= now)
        {
            records.remove(&record_key);
        }

        match records.get(&record_key) {
            None => {
                records.insert(
                    record_key,
                    Record {
                        fingerprint: fingerprint.to_string(),
                        status: RecordStatus::InProgress,
                        response: None,
                        expires_at: now + ttl,
                    },
                );
                Ok(BeginOutcome::New)
            }
            Some(record) if record.fingerprint != fingerprint => Ok(BeginOutcome::Conflict),
            Some(record) if record.status == RecordStatus::InProgress => {
                Ok(BeginOutcome::InProgress)
            }
            Some(record) => {
                let cached = record
                    .response
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("completed record missing response"))?;
                Ok(BeginOutcome::Replay(cached))
            }
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
        let record_key = Self::record_key(scope, key);
        let mut records = self.records.lock().await;
        records.insert(
            record_key,
            Record {
                fingerprint: fingerprint.to_string(),
                status: RecordStatus::Completed,
                response: Some(response),
                expires_at: Instant::now() + completion_ttl,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> CachedResponse {
        CachedResponse {
            status: 201,
            content_type: "application/json".to_string(),
            body: br#"{"ok":true}"#.to_vec(),
        }
    }

    #[tokio::test]
    async fn state_machine_walk() {
        let store = MemoryIdempotencyStore::new();
        let ttl = Duration::from_secs(60);

        let outcome = store.begin("register", "k1", "fp", ttl).await.unwrap();
        assert_eq!(outcome, BeginOutcome::New);

        let outcome = store.begin("register", "k1", "fp", ttl).await.unwrap();
        assert_eq!(outcome, BeginOutcome::InProgress);

        let outcome = store.begin("register", "k1", "other", ttl).await.unwrap();
        assert_eq!(outcome, BeginOutcome::Conflict);

        store
            .complete("register", "k1", "fp", response(), ttl)
            .await
            .unwrap();

        let outcome = store.begin("register", "k1", "fp", ttl).await.unwrap();
        assert_eq!(outcome, BeginOutcome::Replay(response()));
    }

    #[tokio::test]
    async fn scopes_partition_keys() {
        let store = MemoryIdempotencyStore::new();
        let ttl = Duration::from_secs(60);
        assert_eq!(
            store.begin("register", "k", "fp", ttl).await.unwrap(),
            BeginOutcome::New
        );
        assert_eq!(
            store.begin("forgot", "k", "fp", ttl).await.unwrap(),
            BeginOutcome::New
        );
    }

    #[tokio::test]
    async fn expired_record_restarts_as_new() {
        let store = MemoryIdempotencyStore::new();
        let ttl = Duration::from_millis(10);
        assert_eq!(
            store.begin("register", "k", "fp", ttl).await.unwrap(),
            BeginOutcome::New
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            store.begin("register", "k", "fp", ttl).await.unwrap(),
            BeginOutcome::New
        );
    }

    #[tokio::test]
    async fn concurrent_begins_elect_one_owner() {
        let store = std::sync::Arc::new(MemoryIdempotencyStore::new());
        let ttl = Duration::from_secs(60);

        let mut handles = Vec::new();
        for _ in 0..12 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.begin("register", "k", "fp", ttl).await.unwrap()
            }));
        }

        let mut new_count = 0;
        let mut in_progress = 0;
        for handle in handles {
            match handle.await.unwrap() {
                BeginOutcome::New => new_count += 1,
                BeginOutcome::InProgress => in_progress += 1,
                outcome => panic!("unexpected outcome: {outcome:?}"),
            }
        }
        assert_eq!(new_count, 1);
        assert_eq!(in_progress, 11);
    }
}
