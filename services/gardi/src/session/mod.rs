//! Session rows and the stores that persist them.
//!
//! A session is one refresh token ever issued. Rotation never updates a row
//! in place: it revokes the old row and inserts a new one carrying the same
//! `family_id`, so the full lineage of a login stays queryable. Reuse
//! detection and family-wide revocation are built on top of that trail.

mod memory;
mod postgres;
mod service;

pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;
pub use service::{RevokeOutcome, SessionService, SessionView};

use std::sync::Arc;
use std::time::Duration;

/// Periodically purge expired rows. The worker lives for the process
/// lifetime and only logs failures.
pub fn spawn_cleanup_worker(store: Arc<dyn SessionStore>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.cleanup_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "purged expired sessions"),
                Err(err) => tracing::error!("session cleanup failed: {err}"),
            }
        }
    });
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Why a session stopped being usable.
///
/// `Rotated` and `ReuseDetected` mark rotation history; the rest record
/// user- or operator-initiated revocation. The token service relies on this
/// split: presenting a refresh whose row carries a history reason is treated
/// as token reuse, while a user-initiated reason is merely invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokedReason {
    Rotated,
    ReuseDetected,
    UserSessionRevoked,
    UserRevokeOthers,
    Logout,
    UserLogoutAll,
}

impl RevokedReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rotated => "rotated",
            Self::ReuseDetected => "reuse_detected",
            Self::UserSessionRevoked => "user_session_revoked",
            Self::UserRevokeOthers => "user_revoke_others",
            Self::Logout => "logout",
            Self::UserLogoutAll => "user_logout_all",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rotated" => Some(Self::Rotated),
            "reuse_detected" => Some(Self::ReuseDetected),
            "user_session_revoked" => Some(Self::UserSessionRevoked),
            "user_revoke_others" => Some(Self::UserRevokeOthers),
            "logout" => Some(Self::Logout),
            "user_logout_all" => Some(Self::UserLogoutAll),
            _ => None,
        }
    }

    /// True for reasons that are part of normal rotation history rather than
    /// a deliberate revocation. Presenting a refresh token against such a row
    /// means the token was already spent.
    #[must_use]
    pub const fn is_rotation_history(self) -> bool {
        matches!(self, Self::Rotated | Self::ReuseDetected)
    }
}

impl std::fmt::Display for RevokedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One refresh token's durable record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Peppered HMAC of the refresh token, hex. The only stored form.
    pub refresh_token_hash: String,
    /// `jti` bound into the refresh token. `None` only on legacy rows.
    pub token_id: Option<String>,
    /// Lineage root shared by every rotation descending from one login.
    pub family_id: Option<String>,
    /// Previous `token_id` in the chain; `None` for the initial issuance.
    pub parent_token_id: Option<String>,
    pub user_agent: String,
    pub ip: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<RevokedReason>,
    pub reuse_detected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Fields the caller supplies when inserting a session row.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub refresh_token_hash: String,
    pub token_id: Option<String>,
    pub family_id: Option<String>,
    pub parent_token_id: Option<String>,
    pub user_agent: String,
    pub ip: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session not found")]
    NotFound,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SessionStoreResult<T> = Result<T, SessionStoreError>;

/// Durable session operations. The store is the system of record for all
/// session mutations; caches above it are best-effort.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new row. `refresh_token_hash` and `token_id` are unique.
    async fn create(&self, session: NewSession) -> SessionStoreResult<Session>;

    async fn find_by_hash(&self, hash: &str) -> SessionStoreResult<Session>;

    async fn find_active_by_token_id_for_user(
        &self,
        user_id: Uuid,
        token_id: &str,
    ) -> SessionStoreResult<Session>;

    async fn find_by_id_for_user(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> SessionStoreResult<Session>;

    async fn list_active_by_user_id(&self, user_id: Uuid) -> SessionStoreResult<Vec<Session>>;

    /// Atomically revoke the active session matching `old_hash` (reason
    /// `rotated`) and insert `new_session`. Returns the old row as it was
    /// revoked. Fails with [`SessionStoreError::NotFound`] when no active row
    /// matches, which includes losing the race against a concurrent rotator.
    async fn rotate_session(
        &self,
        old_hash: &str,
        new_session: NewSession,
    ) -> SessionStoreResult<Session>;

    /// Backfill lineage on legacy rows. Writes only when the existing
    /// `token_id`/`family_id` are null or empty; a second call is a no-op.
    async fn update_token_lineage_by_hash(
        &self,
        hash: &str,
        token_id: &str,
        family_id: &str,
    ) -> SessionStoreResult<()>;

    /// Stamp `reuse_detected_at` and set the reason to `reuse_detected`.
    async fn mark_reuse_detected_by_hash(&self, hash: &str) -> SessionStoreResult<()>;

    async fn revoke_by_hash(&self, hash: &str, reason: RevokedReason) -> SessionStoreResult<()>;

    /// Revoke a single session owned by `user_id`. Returns `false` when the
    /// row was already revoked (idempotent), errors with `NotFound` when the
    /// row does not exist or belongs to someone else.
    async fn revoke_by_id_for_user(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        reason: RevokedReason,
    ) -> SessionStoreResult<bool>;

    /// Revoke every active session of the user except `keep_session_id`.
    /// Returns the number of rows changed.
    async fn revoke_others_by_user(
        &self,
        user_id: Uuid,
        keep_session_id: Uuid,
        reason: RevokedReason,
    ) -> SessionStoreResult<u64>;

    /// Revoke all active members of a family. Returns the number changed.
    async fn revoke_by_family_id(
        &self,
        family_id: &str,
        reason: RevokedReason,
    ) -> SessionStoreResult<u64>;

    async fn revoke_by_user_id(
        &self,
        user_id: Uuid,
        reason: RevokedReason,
    ) -> SessionStoreResult<()>;

    /// Purge rows whose `expires_at` has passed. Returns the number removed.
    async fn cleanup_expired(&self) -> SessionStoreResult<u64>;
}
