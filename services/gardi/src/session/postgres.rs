//! Postgres-backed session store. This is the system of record.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

use super::{
    NewSession, RevokedReason, Session, SessionStore, SessionStoreError, SessionStoreResult,
};

#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn session_from_row(row: &PgRow) -> SessionStoreResult<Session> {
    let reason: Option<String> = row.get("revoked_reason");
    let revoked_reason = match reason.as_deref() {
        None => None,
        Some(value) => Some(
            RevokedReason::parse(value)
                .ok_or_else(|| anyhow!("unknown revoked reason in store: {value}"))?,
        ),
    };
    Ok(Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        refresh_token_hash: row.get("refresh_token_hash"),
        token_id: row.get("token_id"),
        family_id: row.get("family_id"),
        parent_token_id: row.get("parent_token_id"),
        user_agent: row.get("user_agent"),
        ip: row.get("ip"),
        expires_at: row.get("expires_at"),
        revoked_at: row.get("revoked_at"),
        revoked_reason,
        reuse_detected_at: row.get("reuse_detected_at"),
        created_at: row.get("created_at"),
    })
}

fn query_span(operation: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation
    )
}

const SESSION_COLUMNS: &str = "id, user_id, refresh_token_hash, token_id, family_id, \
     parent_token_id, user_agent, ip, expires_at, revoked_at, revoked_reason, \
     reuse_detected_at, created_at";

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: NewSession) -> SessionStoreResult<Session> {
        let query = format!(
            r"
            INSERT INTO sessions
                (id, user_id, refresh_token_hash, token_id, family_id, parent_token_id,
                 user_agent, ip, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {SESSION_COLUMNS}
            "
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(session.user_id)
            .bind(&session.refresh_token_hash)
            .bind(&session.token_id)
            .bind(&session.family_id)
            .bind(&session.parent_token_id)
            .bind(&session.user_agent)
            .bind(&session.ip)
            .bind(session.expires_at)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT"))
            .await
            .context("failed to insert session")?;
        session_from_row(&row)
    }

    async fn find_by_hash(&self, hash: &str) -> SessionStoreResult<Session> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE refresh_token_hash = $1");
        let row = sqlx::query(&query)
            .bind(hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT"))
            .await
            .context("failed to lookup session by hash")?
            .ok_or(SessionStoreError::NotFound)?;
        session_from_row(&row)
    }

    async fn find_active_by_token_id_for_user(
        &self,
        user_id: Uuid,
        token_id: &str,
    ) -> SessionStoreResult<Session> {
        let query = format!(
            r"
            SELECT {SESSION_COLUMNS} FROM sessions
            WHERE user_id = $1 AND token_id = $2
              AND revoked_at IS NULL AND expires_at > NOW()
            "
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(token_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT"))
            .await
            .context("failed to lookup session by token id")?
            .ok_or(SessionStoreError::NotFound)?;
        session_from_row(&row)
    }

    async fn find_by_id_for_user(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> SessionStoreResult<Session> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = $1 AND id = $2");
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT"))
            .await
            .context("failed to lookup session by id")?
            .ok_or(SessionStoreError::NotFound)?;
        session_from_row(&row)
    }

    async fn list_active_by_user_id(&self, user_id: Uuid) -> SessionStoreResult<Vec<Session>> {
        let query = format!(
            r"
            SELECT {SESSION_COLUMNS} FROM sessions
            WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > NOW()
            ORDER BY created_at DESC
            "
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT"))
            .await
            .context("failed to list active sessions")?;
        rows.iter().map(session_from_row).collect()
    }

    async fn rotate_session(
        &self,
        old_hash: &str,
        new_session: NewSession,
    ) -> SessionStoreResult<Session> {
        // Row lock serializes concurrent rotations of the same refresh token:
        // the loser observes a revoked row and gets NotFound.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin rotation transaction")?;

        let query = format!(
            r"
            SELECT {SESSION_COLUMNS} FROM sessions
            WHERE refresh_token_hash = $1 AND revoked_at IS NULL AND expires_at > NOW()
            FOR UPDATE
            "
        );
        let row = sqlx::query(&query)
            .bind(old_hash)
            .fetch_optional(&mut *tx)
            .instrument(query_span("SELECT"))
            .await
            .context("failed to lock session for rotation")?
            .ok_or(SessionStoreError::NotFound)?;
        let mut old = session_from_row(&row)?;

        let now = Utc::now();
        let query = "UPDATE sessions SET revoked_at = $1, revoked_reason = $2 WHERE id = $3";
        sqlx::query(query)
            .bind(now)
            .bind(RevokedReason::Rotated.as_str())
            .bind(old.id)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE"))
            .await
            .context("failed to revoke rotated session")?;

        let query = r"
            INSERT INTO sessions
                (id, user_id, refresh_token_hash, token_id, family_id, parent_token_id,
                 user_agent, ip, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ";
        sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(new_session.user_id)
            .bind(&new_session.refresh_token_hash)
            .bind(&new_session.token_id)
            .bind(&new_session.family_id)
            .bind(&new_session.parent_token_id)
            .bind(&new_session.user_agent)
            .bind(&new_session.ip)
            .bind(new_session.expires_at)
            .execute(&mut *tx)
            .instrument(query_span("INSERT"))
            .await
            .context("failed to insert rotated session")?;

        tx.commit()
            .await
            .context("failed to commit rotation transaction")?;

        old.revoked_at = Some(now);
        old.revoked_reason = Some(RevokedReason::Rotated);
        Ok(old)
    }

    async fn update_token_lineage_by_hash(
        &self,
        hash: &str,
        token_id: &str,
        family_id: &str,
    ) -> SessionStoreResult<()> {
        let query = r"
            UPDATE sessions
            SET token_id = $2, family_id = $3
            WHERE refresh_token_hash = $1
              AND (token_id IS NULL OR token_id = '' OR family_id IS NULL OR family_id = '')
        ";
        sqlx::query(query)
            .bind(hash)
            .bind(token_id)
            .bind(family_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE"))
            .await
            .context("failed to backfill session lineage")?;
        Ok(())
    }

    async fn mark_reuse_detected_by_hash(&self, hash: &str) -> SessionStoreResult<()> {
        let query = r"
            UPDATE sessions
            SET reuse_detected_at = NOW(), revoked_reason = $2
            WHERE refresh_token_hash = $1
        ";
        sqlx::query(query)
            .bind(hash)
            .bind(RevokedReason::ReuseDetected.as_str())
            .execute(&self.pool)
            .instrument(query_span("UPDATE"))
            .await
            .context("failed to mark session reuse")?;
        Ok(())
    }

    async fn revoke_by_hash(&self, hash: &str, reason: RevokedReason) -> SessionStoreResult<()> {
        let query = r"
            UPDATE sessions
            SET revoked_at = NOW(), revoked_reason = $2
            WHERE refresh_token_hash = $1 AND revoked_at IS NULL
        ";
        sqlx::query(query)
            .bind(hash)
            .bind(reason.as_str())
            .execute(&self.pool)
            .instrument(query_span("UPDATE"))
            .await
            .context("failed to revoke session by hash")?;
        Ok(())
    }

    async fn revoke_by_id_for_user(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        reason: RevokedReason,
    ) -> SessionStoreResult<bool> {
        // Existence check first so callers can distinguish "not yours" from
        // "already revoked".
        let existing = self.find_by_id_for_user(user_id, session_id).await?;
        if existing.revoked_at.is_some() {
            return Ok(false);
        }
        let query = r"
            UPDATE sessions
            SET revoked_at = NOW(), revoked_reason = $3
            WHERE user_id = $1 AND id = $2 AND revoked_at IS NULL
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(session_id)
            .bind(reason.as_str())
            .execute(&self.pool)
            .instrument(query_span("UPDATE"))
            .await
            .context("failed to revoke session by id")?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_others_by_user(
        &self,
        user_id: Uuid,
        keep_session_id: Uuid,
        reason: RevokedReason,
    ) -> SessionStoreResult<u64> {
        let query = r"
            UPDATE sessions
            SET revoked_at = NOW(), revoked_reason = $3
            WHERE user_id = $1 AND id <> $2 AND revoked_at IS NULL
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(keep_session_id)
            .bind(reason.as_str())
            .execute(&self.pool)
            .instrument(query_span("UPDATE"))
            .await
            .context("failed to revoke sibling sessions")?;
        Ok(result.rows_affected())
    }

    async fn revoke_by_family_id(
        &self,
        family_id: &str,
        reason: RevokedReason,
    ) -> SessionStoreResult<u64> {
        let query = r"
            UPDATE sessions
            SET revoked_at = NOW(), revoked_reason = $2
            WHERE family_id = $1 AND revoked_at IS NULL
        ";
        let result = sqlx::query(query)
            .bind(family_id)
            .bind(reason.as_str())
            .execute(&self.pool)
            .instrument(query_span("UPDATE"))
            .await
            .context("failed to revoke session family")?;
        Ok(result.rows_affected())
    }

    async fn revoke_by_user_id(
        &self,
        user_id: Uuid,
        reason: RevokedReason,
    ) -> SessionStoreResult<()> {
        let query = r"
            UPDATE sessions
            SET revoked_at = NOW(), revoked_reason = $2
            WHERE user_id = $1 AND revoked_at IS NULL
        ";
        sqlx::query(query)
            .bind(user_id)
            .bind(reason.as_str())
            .execute(&self.pool)
            .instrument(query_span("UPDATE"))
            .await
            .context("failed to revoke user sessions")?;
        Ok(())
    }

    async fn cleanup_expired(&self) -> SessionStoreResult<u64> {
        let query = "DELETE FROM sessions WHERE expires_at <= NOW()";
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(query_span("DELETE"))
            .await
            .context("failed to purge expired sessions")?;
        Ok(result.rows_affected())
    }
}
