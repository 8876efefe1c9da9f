//! Minimal principal store: users, their roles, and the permissions those
//! roles grant. The permission resolver and the auth handlers sit on top of
//! this; everything else treats permissions as opaque strings.

mod memory;
mod password;
mod postgres;

pub use memory::MemoryUserStore;
pub use password::{hash_password, verify_password};
pub use postgres::PgUserStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub roles: Vec<String>,
}

/// User plus the stored password hash, for login verification only.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("user not found")]
    NotFound,
    #[error("email already registered")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type UserStoreResult<T> = Result<T, UserStoreError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user. Fails with [`UserStoreError::Conflict`] when the email
    /// is taken.
    async fn create(&self, new_user: NewUser) -> UserStoreResult<User>;

    async fn find_credentials_by_email(&self, email: &str) -> UserStoreResult<UserCredentials>;

    /// Resolve the user and their effective permissions (union over roles,
    /// sorted and deduplicated).
    async fn get_with_permissions(&self, id: Uuid) -> UserStoreResult<(User, Vec<String>)>;

    /// Replace the user's role set. Unknown role names are an error.
    async fn set_roles(&self, user_id: Uuid, roles: &[String]) -> UserStoreResult<()>;
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    let mut parts = email_normalized.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !local.chars().any(char::is_whitespace)
        && !domain.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
        assert!(!valid_email("two@at@signs.com"));
        assert!(!valid_email("dot@.leading"));
    }
}
