//! User-facing session management: listing and selective revocation.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::token::hash_refresh_token;

use super::{RevokedReason, SessionStore, SessionStoreError};

/// What `/me/sessions` exposes about a session row.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionView {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub user_agent: String,
    pub ip: String,
    pub is_current: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    AlreadyRevoked,
    NotFound,
}

pub struct SessionService {
    sessions: Arc<dyn SessionStore>,
    pepper: SecretString,
}

impl SessionService {
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>, pepper: SecretString) -> Self {
        Self { sessions, pepper }
    }

    /// # Errors
    /// Returns an error if the store lookup fails.
    pub async fn list_active_sessions(
        &self,
        user_id: Uuid,
        current_session_id: Option<Uuid>,
    ) -> Result<Vec<SessionView>> {
        let sessions = self.sessions.list_active_by_user_id(user_id).await?;
        Ok(sessions
            .into_iter()
            .map(|session| SessionView {
                is_current: Some(session.id) == current_session_id,
                id: session.id,
                created_at: session.created_at,
                expires_at: session.expires_at,
                user_agent: session.user_agent,
                ip: session.ip,
            })
            .collect())
    }

    /// Identify the caller's own session row: by the access token's jti
    /// first, falling back to the refresh cookie hash.
    ///
    /// # Errors
    /// Returns an error if a store lookup fails for reasons other than a
    /// missing row.
    pub async fn resolve_current_session_id(
        &self,
        user_id: Uuid,
        access_jti: Option<&str>,
        refresh_cookie: Option<&str>,
    ) -> Result<Option<Uuid>> {
        if let Some(jti) = access_jti.filter(|jti| !jti.is_empty()) {
            match self
                .sessions
                .find_active_by_token_id_for_user(user_id, jti)
                .await
            {
                Ok(session) => return Ok(Some(session.id)),
                Err(SessionStoreError::NotFound) => {}
                Err(SessionStoreError::Other(err)) => return Err(err),
            }
        }

        let Some(refresh) = refresh_cookie.filter(|token| !token.is_empty()) else {
            return Ok(None);
        };
        let hash = hash_refresh_token(self.pepper.expose_secret().as_bytes(), refresh);
        match self.sessions.find_by_hash(&hash).await {
            Ok(session) => {
                if session.user_id == user_id && session.is_active(Utc::now()) {
                    Ok(Some(session.id))
                } else {
                    Ok(None)
                }
            }
            Err(SessionStoreError::NotFound) => Ok(None),
            Err(SessionStoreError::Other(err)) => Err(err),
        }
    }

    /// # Errors
    /// Returns an error if the store update fails.
    pub async fn revoke_session(&self, user_id: Uuid, session_id: Uuid) -> Result<RevokeOutcome> {
        match self
            .sessions
            .revoke_by_id_for_user(user_id, session_id, RevokedReason::UserSessionRevoked)
            .await
        {
            Ok(true) => Ok(RevokeOutcome::Revoked),
            Ok(false) => Ok(RevokeOutcome::AlreadyRevoked),
            Err(SessionStoreError::NotFound) => Ok(RevokeOutcome::NotFound),
            Err(SessionStoreError::Other(err)) => Err(err),
        }
    }

    /// # Errors
    /// Returns an error if the store update fails.
    pub async fn revoke_other_sessions(
        &self,
        user_id: Uuid,
        current_session_id: Uuid,
    ) -> Result<u64> {
        Ok(self
            .sessions
            .revoke_others_by_user(user_id, current_session_id, RevokedReason::UserRevokeOthers)
            .await?)
    }
}
