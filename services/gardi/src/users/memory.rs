//! In-memory user store with a fixed role → permission table.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    NewUser, User, UserCredentials, UserStore, UserStoreError, UserStoreResult, normalize_email,
};

struct UserRow {
    user: User,
    password_hash: String,
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<UserRow>>,
    role_permissions: HashMap<String, Vec<String>>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a role and the permissions it grants.
    #[must_use]
    pub fn with_role(mut self, role: &str, permissions: &[&str]) -> Self {
        self.role_permissions.insert(
            role.to_string(),
            permissions.iter().map(ToString::to_string).collect(),
        );
        self
    }

    fn permissions_for(&self, roles: &[String]) -> Vec<String> {
        let mut permissions: Vec<String> = roles
            .iter()
            .filter_map(|role| self.role_permissions.get(role))
            .flatten()
            .cloned()
            .collect();
        permissions.sort();
        permissions.dedup();
        permissions
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, new_user: NewUser) -> UserStoreResult<User> {
        let email = normalize_email(&new_user.email);
        let mut users = self.users.lock().await;
        if users.iter().any(|row| row.user.email == email) {
            return Err(UserStoreError::Conflict);
        }
        let user = User {
            id: Uuid::new_v4(),
            email,
            name: new_user.name,
            roles: new_user.roles,
        };
        users.push(UserRow {
            user: user.clone(),
            password_hash: new_user.password_hash,
        });
        Ok(user)
    }

    async fn find_credentials_by_email(&self, email: &str) -> UserStoreResult<UserCredentials> {
        let email = normalize_email(email);
        let users = self.users.lock().await;
        users
            .iter()
            .find(|row| row.user.email == email)
            .map(|row| UserCredentials {
                user: row.user.clone(),
                password_hash: row.password_hash.clone(),
            })
            .ok_or(UserStoreError::NotFound)
    }

    async fn get_with_permissions(&self, id: Uuid) -> UserStoreResult<(User, Vec<String>)> {
        let users = self.users.lock().await;
        let row = users
            .iter()
            .find(|row| row.user.id == id)
            .ok_or(UserStoreError::NotFound)?;
        let permissions = self.permissions_for(&row.user.roles);
        Ok((row.user.clone(), permissions))
    }

    async fn set_roles(&self, user_id: Uuid, roles: &[String]) -> UserStoreResult<()> {
        if let Some(unknown) = roles
            .iter()
            .find(|role| !self.role_permissions.contains_key(*role))
        {
            return Err(UserStoreError::Other(anyhow::anyhow!(
                "unknown role: {unknown}"
            )));
        }
        let mut users = self.users.lock().await;
        let row = users
            .iter_mut()
            .find(|row| row.user.id == user_id)
            .ok_or(UserStoreError::NotFound)?;
        row.user.roles = roles.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryUserStore {
        MemoryUserStore::new()
            .with_role("admin", &["users:read", "users:write", "roles:write"])
            .with_role("user", &["users:read"])
    }

    fn new_user(email: &str, roles: &[&str]) -> NewUser {
        NewUser {
            email: email.to_string(),
            name: "Test".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            roles: roles.iter().map(ToString::to_string).collect(),
        }
    }

    #[tokio::test]
    async fn create_conflicts_on_duplicate_email() {
        let store = store();
        store.create(new_user("a@example.com", &["user"])).await.unwrap();
        let result = store.create(new_user("A@Example.com ", &["user"])).await;
        assert!(matches!(result, Err(UserStoreError::Conflict)));
    }

    #[tokio::test]
    async fn permissions_union_over_roles() {
        let store = store();
        let user = store
            .create(new_user("a@example.com", &["admin", "user"]))
            .await
            .unwrap();
        let (_, permissions) = store.get_with_permissions(user.id).await.unwrap();
        assert_eq!(permissions, vec!["roles:write", "users:read", "users:write"]);
    }

    #[tokio::test]
    async fn set_roles_replaces_and_validates() {
        let store = store();
        let user = store
            .create(new_user("a@example.com", &["admin"]))
            .await
            .unwrap();
        store
            .set_roles(user.id, &["user".to_string()])
            .await
            .unwrap();
        let (user, permissions) = store.get_with_permissions(user.id).await.unwrap();
        assert_eq!(user.roles, vec!["user".to_string()]);
        assert_eq!(permissions, vec!["users:read"]);

        let result = store.set_roles(user.id, &["bogus".to_string()]).await;
        assert!(matches!(result, Err(UserStoreError::Other(_))));
    }
}
