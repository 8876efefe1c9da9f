//! Cached permission resolution for request-time authorization.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use tracing::{debug, warn};
use uuid::Uuid;

use auth_token::Claims;

use crate::users::UserStore;

use super::PermissionCacheStore;

/// Exact-match check against a resolved permission set.
#[must_use]
pub fn has_permission(permissions: &[String], required: &str) -> bool {
    permissions.iter().any(|permission| permission == required)
}

/// Resolves effective permissions for a token's claims, caching under the
/// epoch-composite key. Cache failures fall back to the source of truth;
/// source failures propagate, because guessing permissions is not an option.
pub struct PermissionResolver {
    cache: Arc<dyn PermissionCacheStore>,
    users: Arc<dyn UserStore>,
    ttl: Duration,
}

impl PermissionResolver {
    #[must_use]
    pub fn new(
        cache: Arc<dyn PermissionCacheStore>,
        users: Arc<dyn UserStore>,
        ttl: Duration,
    ) -> Self {
        Self { cache, users, ttl }
    }

    /// # Errors
    /// Returns an error when the subject is malformed or the user store
    /// cannot produce the permission set.
    pub async fn resolve(&self, claims: &Claims) -> anyhow::Result<Vec<String>> {
        let user_id =
            Uuid::parse_str(claims.sub.trim()).map_err(|_| anyhow!("invalid subject"))?;
        let session_token_id = if claims.jti.trim().is_empty() {
            "none"
        } else {
            claims.jti.trim()
        };

        if !self.ttl.is_zero() {
            match self.cache.get(user_id, session_token_id).await {
                Ok(Some(cached)) => return Ok(cached),
                Ok(None) => {}
                Err(err) => warn!("permission cache read failed: {err}"),
            }
        }

        let (_, permissions) = self
            .users
            .get_with_permissions(user_id)
            .await
            .map_err(anyhow::Error::from)
            .context("failed to resolve user permissions")?;

        if !self.ttl.is_zero()
            && let Err(err) = self
                .cache
                .set(user_id, session_token_id, &permissions, self.ttl)
                .await
        {
            debug!("permission cache write failed: {err}");
        }
        Ok(permissions)
    }

    /// # Errors
    /// Returns an error when the epoch bump fails.
    pub async fn invalidate_user(&self, user_id: Uuid) -> anyhow::Result<()> {
        self.cache.invalidate_user(user_id).await
    }

    /// # Errors
    /// Returns an error when the epoch bump fails.
    pub async fn invalidate_all(&self) -> anyhow::Result<()> {
        self.cache.invalidate_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::MemoryPermissionCacheStore;
    use crate::users::{MemoryUserStore, NewUser};
    use auth_token::TokenType;

    fn claims(user_id: Uuid, jti: &str) -> Claims {
        Claims {
            token_type: TokenType::Access,
            iss: "https://gardi.test".to_string(),
            aud: "gardi".to_string(),
            sub: user_id.to_string(),
            exp: 0,
            iat: 0,
            jti: jti.to_string(),
            roles: Vec::new(),
            permissions: Vec::new(),
        }
    }

    async fn setup() -> (PermissionResolver, Arc<MemoryUserStore>, Uuid) {
        let users = Arc::new(
            MemoryUserStore::new()
                .with_role("admin", &["users:read", "users:write"])
                .with_role("viewer", &["users:read"]),
        );
        let user = users
            .create(NewUser {
                email: "u@example.com".to_string(),
                name: "U".to_string(),
                password_hash: "$argon2id$stub".to_string(),
                roles: vec!["admin".to_string()],
            })
            .await
            .unwrap();
        let resolver = PermissionResolver::new(
            Arc::new(MemoryPermissionCacheStore::new()),
            users.clone(),
            Duration::from_secs(60),
        );
        (resolver, users, user.id)
    }

    #[test]
    fn has_permission_is_exact() {
        let permissions = vec!["users:read".to_string(), "roles:write".to_string()];
        assert!(has_permission(&permissions, "users:read"));
        assert!(!has_permission(&permissions, "users:write"));
        assert!(!has_permission(&permissions, "users"));
    }

    #[tokio::test]
    async fn resolves_and_caches() {
        let (resolver, users, user_id) = setup().await;
        let claims = claims(user_id, "jti-1");

        let permissions = resolver.resolve(&claims).await.unwrap();
        assert_eq!(permissions, vec!["users:read", "users:write"]);

        // Demote the user behind the cache's back; the stale entry answers.
        users
            .set_roles(user_id, &["viewer".to_string()])
            .await
            .unwrap();
        let permissions = resolver.resolve(&claims).await.unwrap();
        assert_eq!(permissions, vec!["users:read", "users:write"]);
    }

    #[tokio::test]
    async fn user_epoch_bump_bypasses_stale_cache() {
        let (resolver, users, user_id) = setup().await;
        let claims = claims(user_id, "jti-1");

        resolver.resolve(&claims).await.unwrap();
        users
            .set_roles(user_id, &["viewer".to_string()])
            .await
            .unwrap();
        resolver.invalidate_user(user_id).await.unwrap();

        // Same unchanged access token, fresh permissions.
        let permissions = resolver.resolve(&claims).await.unwrap();
        assert_eq!(permissions, vec!["users:read"]);
    }

    #[tokio::test]
    async fn global_epoch_bump_bypasses_stale_cache() {
        let (resolver, users, user_id) = setup().await;
        let claims = claims(user_id, "jti-1");

        resolver.resolve(&claims).await.unwrap();
        users
            .set_roles(user_id, &["viewer".to_string()])
            .await
            .unwrap();
        resolver.invalidate_all().await.unwrap();

        let permissions = resolver.resolve(&claims).await.unwrap();
        assert_eq!(permissions, vec!["users:read"]);
    }

    #[tokio::test]
    async fn malformed_subject_is_an_error() {
        let (resolver, _, user_id) = setup().await;
        let mut claims = claims(user_id, "jti-1");
        claims.sub = "not-a-uuid".to_string();
        assert!(resolver.resolve(&claims).await.is_err());
    }

    #[tokio::test]
    async fn unknown_user_is_an_error() {
        let (resolver, _, _) = setup().await;
        let claims = claims(Uuid::new_v4(), "jti-1");
        assert!(resolver.resolve(&claims).await.is_err());
    }
}
