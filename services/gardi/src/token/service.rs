//! Issue / rotate / revoke orchestration over the session store.
//!
//! Flow Overview:
//! 1) Issue signs a refresh token with a fresh jti T, binds the access token
//!    to T, and persists a session row with `token_id = family_id = T`.
//! 2) Rotate walks a state machine over the presented refresh token and, on
//!    the happy path, atomically revokes the old row and inserts the next
//!    link of the chain.
//! 3) A refresh presented against a row that was already rotated is treated
//!    as a captured token: the whole family is revoked.

use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use auth_token::TokenCodec;

use crate::session::{
    NewSession, RevokedReason, SessionStore, SessionStoreError,
};
use crate::users::{User, UserStore, UserStoreError};

use super::{generate_csrf_token, hash_refresh_token};

/// Everything handed back to the transport layer after issuance/rotation.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
    pub csrf: String,
}

#[derive(Debug, Clone)]
pub struct RotatedTokens {
    pub pair: TokenPair,
    pub user_id: Uuid,
}

#[derive(Debug, Error)]
pub enum RotateError {
    /// The refresh token is unusable but carries no compromise signal:
    /// parse failure, unknown hash, subject/jti mismatch, expiry,
    /// user-initiated revocation, or losing a rotation race.
    #[error("invalid refresh token")]
    Invalid,
    /// The token's row was already rotated or flagged; the family has been
    /// revoked. Clients see the same 401 as `Invalid`.
    #[error("refresh token reuse detected")]
    ReuseDetected,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<SessionStoreError> for RotateError {
    fn from(err: SessionStoreError) -> Self {
        match err {
            SessionStoreError::NotFound => Self::Invalid,
            SessionStoreError::Other(err) => Self::Other(err),
        }
    }
}

pub struct TokenService {
    codec: Arc<TokenCodec>,
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    pepper: SecretString,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    #[must_use]
    pub fn new(
        codec: Arc<TokenCodec>,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
        pepper: SecretString,
        access_ttl: std::time::Duration,
        refresh_ttl: std::time::Duration,
    ) -> Self {
        Self {
            codec,
            sessions,
            users,
            pepper,
            access_ttl: Duration::from_std(access_ttl).unwrap_or_else(|_| Duration::minutes(15)),
            refresh_ttl: Duration::from_std(refresh_ttl).unwrap_or_else(|_| Duration::days(30)),
        }
    }

    #[must_use]
    pub fn hash(&self, refresh_token: &str) -> String {
        hash_refresh_token(self.pepper.expose_secret().as_bytes(), refresh_token)
    }

    /// Issue a fresh token pair for an authenticated user and persist the
    /// root session of a new family.
    ///
    /// # Errors
    /// Returns an error if signing or the session insert fails.
    pub async fn issue(
        &self,
        user: &User,
        permissions: Vec<String>,
        user_agent: &str,
        ip: &str,
    ) -> anyhow::Result<TokenPair> {
        let (pair, token_id) = self.mint_pair(user, permissions)?;
        let hash = self.hash(&pair.refresh);
        self.sessions
            .create(NewSession {
                user_id: user.id,
                refresh_token_hash: hash,
                token_id: Some(token_id.clone()),
                family_id: Some(token_id),
                parent_token_id: None,
                user_agent: user_agent.to_string(),
                ip: ip.to_string(),
                expires_at: Utc::now() + self.refresh_ttl,
            })
            .await
            .map_err(anyhow::Error::from)
            .context("failed to persist issued session")?;
        Ok(pair)
    }

    /// Rotate a refresh token into a new pair.
    ///
    /// # Errors
    /// [`RotateError::Invalid`] or [`RotateError::ReuseDetected`] per the
    /// state machine; [`RotateError::Other`] for storage failures.
    pub async fn rotate(
        &self,
        refresh_token: &str,
        user_agent: &str,
        ip: &str,
    ) -> Result<RotatedTokens, RotateError> {
        let now = Utc::now();
        let Ok(claims) = self.codec.parse_refresh(refresh_token, now.timestamp()) else {
            return Err(RotateError::Invalid);
        };

        let hash = self.hash(refresh_token);
        let session = match self.sessions.find_by_hash(&hash).await {
            Ok(session) => session,
            Err(SessionStoreError::NotFound) => return Err(RotateError::Invalid),
            Err(SessionStoreError::Other(err)) => return Err(RotateError::Other(err)),
        };

        let Ok(user_id) = Uuid::parse_str(&claims.sub) else {
            return Err(RotateError::Invalid);
        };
        if session.user_id != user_id {
            return Err(RotateError::Invalid);
        }

        // Legacy rows predate lineage tracking; adopt the presented jti as
        // both token id and family root, once.
        let mut token_id = session.token_id.clone().unwrap_or_default();
        let mut family_id = session.family_id.clone().unwrap_or_default();
        if token_id.is_empty() || family_id.is_empty() {
            let fallback_family = if claims.jti.is_empty() {
                "legacy-session".to_string()
            } else {
                claims.jti.clone()
            };
            self.sessions
                .update_token_lineage_by_hash(&hash, &claims.jti, &fallback_family)
                .await?;
            token_id = claims.jti.clone();
            family_id = fallback_family;
        }

        if !token_id.is_empty() && !claims.jti.is_empty() && token_id != claims.jti {
            return Err(RotateError::Invalid);
        }

        if session.expires_at <= now {
            return Err(RotateError::Invalid);
        }

        if session.revoked_at.is_some() {
            let is_reuse = session
                .revoked_reason
                .is_none_or(RevokedReason::is_rotation_history);
            if is_reuse {
                warn!(user_id = %user_id, family_id = %family_id, "refresh token reuse detected");
                self.sessions.mark_reuse_detected_by_hash(&hash).await?;
                if !family_id.is_empty() {
                    let revoked = self
                        .sessions
                        .revoke_by_family_id(&family_id, RevokedReason::ReuseDetected)
                        .await?;
                    info!(family_id = %family_id, revoked, "revoked session family");
                }
                return Err(RotateError::ReuseDetected);
            }
            return Err(RotateError::Invalid);
        }

        let (user, permissions) = match self.users.get_with_permissions(user_id).await {
            Ok(found) => found,
            Err(UserStoreError::NotFound) => return Err(RotateError::Invalid),
            Err(err) => return Err(RotateError::Other(err.into())),
        };

        let (pair, new_token_id) = self.mint_pair(&user, permissions)?;
        let new_hash = self.hash(&pair.refresh);
        let rotation = self
            .sessions
            .rotate_session(
                &hash,
                NewSession {
                    user_id,
                    refresh_token_hash: new_hash,
                    token_id: Some(new_token_id),
                    family_id: Some(family_id),
                    parent_token_id: Some(token_id),
                    user_agent: user_agent.to_string(),
                    ip: ip.to_string(),
                    expires_at: now + self.refresh_ttl,
                },
            )
            .await;
        match rotation {
            Ok(_) => Ok(RotatedTokens { pair, user_id }),
            // A concurrent rotator won the row lock. That is not evidence of
            // token capture, so this must never escalate to reuse handling.
            Err(SessionStoreError::NotFound) => Err(RotateError::Invalid),
            Err(SessionStoreError::Other(err)) => Err(RotateError::Other(err)),
        }
    }

    /// Revoke every active session the user has.
    ///
    /// # Errors
    /// Returns an error if the store update fails.
    pub async fn revoke_all(&self, user_id: Uuid, reason: RevokedReason) -> anyhow::Result<()> {
        self.sessions
            .revoke_by_user_id(user_id, reason)
            .await
            .map_err(anyhow::Error::from)
            .context("failed to revoke user sessions")
    }

    fn mint_pair(
        &self,
        user: &User,
        permissions: Vec<String>,
    ) -> Result<(TokenPair, String), anyhow::Error> {
        let now = Utc::now().timestamp();
        let token_id = Uuid::new_v4().to_string();
        let refresh = self
            .codec
            .sign_refresh(
                &user.id.to_string(),
                &token_id,
                self.refresh_ttl.num_seconds(),
                now,
            )
            .context("failed to sign refresh token")?;
        let access = self
            .codec
            .sign_access(
                &user.id.to_string(),
                user.roles.clone(),
                permissions,
                &token_id,
                self.access_ttl.num_seconds(),
                now,
            )
            .context("failed to sign access token")?;
        let csrf = generate_csrf_token()?;
        Ok((
            TokenPair {
                access,
                refresh,
                csrf,
            },
            token_id,
        ))
    }
}
