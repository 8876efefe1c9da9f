//! In-memory session store for tests and single-node deployments.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    NewSession, RevokedReason, Session, SessionStore, SessionStoreError, SessionStoreResult,
};

/// Keeps every row in one mutex-guarded vector. The lock is held across each
/// whole operation, which gives the same linearization the Postgres store
/// gets from row locks.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    rows: Mutex<Vec<Session>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn materialize(new_session: NewSession) -> Session {
        Session {
            id: Uuid::new_v4(),
            user_id: new_session.user_id,
            refresh_token_hash: new_session.refresh_token_hash,
            token_id: new_session.token_id,
            family_id: new_session.family_id,
            parent_token_id: new_session.parent_token_id,
            user_agent: new_session.user_agent,
            ip: new_session.ip,
            expires_at: new_session.expires_at,
            revoked_at: None,
            revoked_reason: None,
            reuse_detected_at: None,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: NewSession) -> SessionStoreResult<Session> {
        let mut rows = self.rows.lock().await;
        if rows
            .iter()
            .any(|row| row.refresh_token_hash == session.refresh_token_hash)
        {
            return Err(SessionStoreError::Other(anyhow::anyhow!(
                "duplicate refresh token hash"
            )));
        }
        if let Some(token_id) = session.token_id.as_deref()
            && rows.iter().any(|row| row.token_id.as_deref() == Some(token_id))
        {
            return Err(SessionStoreError::Other(anyhow::anyhow!(
                "duplicate token id"
            )));
        }
        let row = Self::materialize(session);
        rows.push(row.clone());
        Ok(row)
    }

    async fn find_by_hash(&self, hash: &str) -> SessionStoreResult<Session> {
        let rows = self.rows.lock().await;
        rows.iter()
            .find(|row| row.refresh_token_hash == hash)
            .cloned()
            .ok_or(SessionStoreError::NotFound)
    }

    async fn find_active_by_token_id_for_user(
        &self,
        user_id: Uuid,
        token_id: &str,
    ) -> SessionStoreResult<Session> {
        let now = Utc::now();
        let rows = self.rows.lock().await;
        rows.iter()
            .find(|row| {
                row.user_id == user_id
                    && row.token_id.as_deref() == Some(token_id)
                    && row.is_active(now)
            })
            .cloned()
            .ok_or(SessionStoreError::NotFound)
    }

    async fn find_by_id_for_user(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> SessionStoreResult<Session> {
        let rows = self.rows.lock().await;
        rows.iter()
            .find(|row| row.user_id == user_id && row.id == session_id)
            .cloned()
            .ok_or(SessionStoreError::NotFound)
    }

    async fn list_active_by_user_id(&self, user_id: Uuid) -> SessionStoreResult<Vec<Session>> {
        let now = Utc::now();
        let rows = self.rows.lock().await;
        let mut sessions: Vec<Session> = rows
            .iter()
            .filter(|row| row.user_id == user_id && row.is_active(now))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn rotate_session(
        &self,
        old_hash: &str,
        new_session: NewSession,
    ) -> SessionStoreResult<Session> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        let old = rows
            .iter_mut()
            .find(|row| row.refresh_token_hash == old_hash && row.is_active(now))
            .ok_or(SessionStoreError::NotFound)?;
        old.revoked_at = Some(now);
        old.revoked_reason = Some(RevokedReason::Rotated);
        let snapshot = old.clone();
        rows.push(Self::materialize(new_session));
        Ok(snapshot)
    }

    async fn update_token_lineage_by_hash(
        &self,
        hash: &str,
        token_id: &str,
        family_id: &str,
    ) -> SessionStoreResult<()> {
        let mut rows = self.rows.lock().await;
        for row in rows.iter_mut().filter(|row| {
            row.refresh_token_hash == hash
                && (row.token_id.as_deref().unwrap_or_default().is_empty()
                    || row.family_id.as_deref().unwrap_or_default().is_empty())
        }) {
            row.token_id = Some(token_id.to_string());
            row.family_id = Some(family_id.to_string());
        }
        Ok(())
    }

    async fn mark_reuse_detected_by_hash(&self, hash: &str) -> SessionStoreResult<()> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        for row in rows
            .iter_mut()
            .filter(|row| row.refresh_token_hash == hash)
        {
            row.reuse_detected_at = Some(now);
            row.revoked_reason = Some(RevokedReason::ReuseDetected);
        }
        Ok(())
    }

    async fn revoke_by_hash(&self, hash: &str, reason: RevokedReason) -> SessionStoreResult<()> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        for row in rows
            .iter_mut()
            .filter(|row| row.refresh_token_hash == hash && row.revoked_at.is_none())
        {
            row.revoked_at = Some(now);
            row.revoked_reason = Some(reason);
        }
        Ok(())
    }

    async fn revoke_by_id_for_user(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        reason: RevokedReason,
    ) -> SessionStoreResult<bool> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        let row = rows
            .iter_mut()
            .find(|row| row.user_id == user_id && row.id == session_id)
            .ok_or(SessionStoreError::NotFound)?;
        if row.revoked_at.is_some() {
            return Ok(false);
        }
        row.revoked_at = Some(now);
        row.revoked_reason = Some(reason);
        Ok(true)
    }

    async fn revoke_others_by_user(
        &self,
        user_id: Uuid,
        keep_session_id: Uuid,
        reason: RevokedReason,
    ) -> SessionStoreResult<u64> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        let mut changed = 0;
        for row in rows.iter_mut().filter(|row| {
            row.user_id == user_id && row.id != keep_session_id && row.revoked_at.is_none()
        }) {
            row.revoked_at = Some(now);
            row.revoked_reason = Some(reason);
            changed += 1;
        }
        Ok(changed)
    }

    async fn revoke_by_family_id(
        &self,
        family_id: &str,
        reason: RevokedReason,
    ) -> SessionStoreResult<u64> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        let mut changed = 0;
        for row in rows.iter_mut().filter(|row| {
            row.family_id.as_deref() == Some(family_id) && row.revoked_at.is_none()
        }) {
            row.revoked_at = Some(now);
            row.revoked_reason = Some(reason);
            changed += 1;
        }
        Ok(changed)
    }

    async fn revoke_by_user_id(
        &self,
        user_id: Uuid,
        reason: RevokedReason,
    ) -> SessionStoreResult<()> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        for row in rows
            .iter_mut()
            .filter(|row| row.user_id == user_id && row.revoked_at.is_none())
        {
            row.revoked_at = Some(now);
            row.revoked_reason = Some(reason);
        }
        Ok(())
    }

    async fn cleanup_expired(&self) -> SessionStoreResult<u64> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|row| row.expires_at > now);
        Ok((before - rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_session(user_id: Uuid, hash: &str, token_id: &str) -> NewSession {
        NewSession {
            user_id,
            refresh_token_hash: hash.to_string(),
            token_id: Some(token_id.to_string()),
            family_id: Some(token_id.to_string()),
            parent_token_id: None,
            user_agent: "test-agent".to_string(),
            ip: "127.0.0.1".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_hash() {
        let store = MemorySessionStore::new();
        let user_id = Uuid::new_v4();
        store.create(new_session(user_id, "h1", "t1")).await.unwrap();
        let result = store.create(new_session(user_id, "h1", "t2")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rotate_revokes_old_and_inserts_new() {
        let store = MemorySessionStore::new();
        let user_id = Uuid::new_v4();
        store.create(new_session(user_id, "h1", "t1")).await.unwrap();

        let mut replacement = new_session(user_id, "h2", "t2");
        replacement.parent_token_id = Some("t1".to_string());
        let old = store.rotate_session("h1", replacement).await.unwrap();
        assert_eq!(old.revoked_reason, Some(RevokedReason::Rotated));

        let rotated = store.find_by_hash("h1").await.unwrap();
        assert!(rotated.revoked_at.is_some());
        let fresh = store.find_by_hash("h2").await.unwrap();
        assert!(fresh.is_active(Utc::now()));
    }

    #[tokio::test]
    async fn rotate_fails_when_old_already_revoked() {
        let store = MemorySessionStore::new();
        let user_id = Uuid::new_v4();
        store.create(new_session(user_id, "h1", "t1")).await.unwrap();
        store
            .rotate_session("h1", new_session(user_id, "h2", "t2"))
            .await
            .unwrap();

        let result = store
            .rotate_session("h1", new_session(user_id, "h3", "t3"))
            .await;
        assert!(matches!(result, Err(SessionStoreError::NotFound)));
    }

    #[tokio::test]
    async fn lineage_backfill_is_idempotent() {
        let store = MemorySessionStore::new();
        let user_id = Uuid::new_v4();
        let mut legacy = new_session(user_id, "h1", "unused");
        legacy.token_id = None;
        legacy.family_id = None;
        store.create(legacy).await.unwrap();

        store
            .update_token_lineage_by_hash("h1", "jti-a", "jti-a")
            .await
            .unwrap();
        let row = store.find_by_hash("h1").await.unwrap();
        assert_eq!(row.token_id.as_deref(), Some("jti-a"));
        assert_eq!(row.family_id.as_deref(), Some("jti-a"));

        // Second write must not move lineage that is already set.
        store
            .update_token_lineage_by_hash("h1", "jti-b", "jti-b")
            .await
            .unwrap();
        let row = store.find_by_hash("h1").await.unwrap();
        assert_eq!(row.token_id.as_deref(), Some("jti-a"));
        assert_eq!(row.family_id.as_deref(), Some("jti-a"));
    }

    #[tokio::test]
    async fn family_revocation_skips_already_revoked() {
        let store = MemorySessionStore::new();
        let user_id = Uuid::new_v4();
        store.create(new_session(user_id, "h1", "t1")).await.unwrap();
        let mut sibling = new_session(user_id, "h2", "t2");
        sibling.family_id = Some("t1".to_string());
        store.create(sibling).await.unwrap();

        store
            .revoke_by_hash("h1", RevokedReason::Logout)
            .await
            .unwrap();
        let changed = store
            .revoke_by_family_id("t1", RevokedReason::ReuseDetected)
            .await
            .unwrap();
        assert_eq!(changed, 1);

        // The logout reason on the first row must be preserved.
        let first = store.find_by_hash("h1").await.unwrap();
        assert_eq!(first.revoked_reason, Some(RevokedReason::Logout));
    }

    #[tokio::test]
    async fn revoke_by_id_reports_changed() {
        let store = MemorySessionStore::new();
        let user_id = Uuid::new_v4();
        let row = store.create(new_session(user_id, "h1", "t1")).await.unwrap();

        let changed = store
            .revoke_by_id_for_user(user_id, row.id, RevokedReason::UserSessionRevoked)
            .await
            .unwrap();
        assert!(changed);
        let changed = store
            .revoke_by_id_for_user(user_id, row.id, RevokedReason::UserSessionRevoked)
            .await
            .unwrap();
        assert!(!changed);

        let result = store
            .revoke_by_id_for_user(Uuid::new_v4(), row.id, RevokedReason::UserSessionRevoked)
            .await;
        assert!(matches!(result, Err(SessionStoreError::NotFound)));
    }

    #[tokio::test]
    async fn cleanup_removes_expired_rows() {
        let store = MemorySessionStore::new();
        let user_id = Uuid::new_v4();
        let mut stale = new_session(user_id, "h1", "t1");
        stale.expires_at = Utc::now() - Duration::minutes(1);
        store.create(stale).await.unwrap();
        store.create(new_session(user_id, "h2", "t2")).await.unwrap();

        let removed = store.cleanup_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert!(matches!(
            store.find_by_hash("h1").await,
            Err(SessionStoreError::NotFound)
        ));
    }
}
