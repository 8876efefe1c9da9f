//! Postgres-backed user store.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{
    NewUser, User, UserCredentials, UserStore, UserStoreError, UserStoreResult, normalize_email,
};

#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn roles_for(&self, user_id: Uuid) -> UserStoreResult<Vec<String>> {
        let query = r"
            SELECT role_name FROM user_roles
            WHERE user_id = $1
            ORDER BY role_name
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to load user roles")?;
        Ok(rows.iter().map(|row| row.get("role_name")).collect())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, new_user: NewUser) -> UserStoreResult<User> {
        let email = normalize_email(&new_user.email);
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin user transaction")?;

        let query = r"
            INSERT INTO users (id, email, name, password_hash)
            VALUES ($1, $2, $3, $4)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT"
        );
        let id = Uuid::new_v4();
        let result = sqlx::query(query)
            .bind(id)
            .bind(&email)
            .bind(&new_user.name)
            .bind(&new_user.password_hash)
            .execute(&mut *tx)
            .instrument(span)
            .await;
        if let Err(err) = result {
            if is_unique_violation(&err) {
                return Err(UserStoreError::Conflict);
            }
            return Err(UserStoreError::Other(
                anyhow::Error::new(err).context("failed to insert user"),
            ));
        }

        for role in &new_user.roles {
            let query = "INSERT INTO user_roles (user_id, role_name) VALUES ($1, $2)";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT"
            );
            sqlx::query(query)
                .bind(id)
                .bind(role)
                .execute(&mut *tx)
                .instrument(span)
                .await
                .context("failed to assign user role")?;
        }

        tx.commit()
            .await
            .context("failed to commit user transaction")?;

        Ok(User {
            id,
            email,
            name: new_user.name,
            roles: new_user.roles,
        })
    }

    async fn find_credentials_by_email(&self, email: &str) -> UserStoreResult<UserCredentials> {
        let email = normalize_email(email);
        let query = "SELECT id, email, name, password_hash FROM users WHERE email = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(&email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by email")?
            .ok_or(UserStoreError::NotFound)?;

        let id: Uuid = row.get("id");
        let roles = self.roles_for(id).await?;
        Ok(UserCredentials {
            user: User {
                id,
                email: row.get("email"),
                name: row.get("name"),
                roles,
            },
            password_hash: row.get("password_hash"),
        })
    }

    async fn get_with_permissions(&self, id: Uuid) -> UserStoreResult<(User, Vec<String>)> {
        let query = "SELECT id, email, name FROM users WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by id")?
            .ok_or(UserStoreError::NotFound)?;

        let roles = self.roles_for(id).await?;

        let query = r"
            SELECT DISTINCT permission FROM role_permissions
            WHERE role_name = ANY($1)
            ORDER BY permission
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let permission_rows = sqlx::query(query)
            .bind(&roles)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to resolve role permissions")?;
        let permissions = permission_rows
            .iter()
            .map(|row| row.get("permission"))
            .collect();

        Ok((
            User {
                id,
                email: row.get("email"),
                name: row.get("name"),
                roles,
            },
            permissions,
        ))
    }

    async fn set_roles(&self, user_id: Uuid, roles: &[String]) -> UserStoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin role transaction")?;

        let query = "SELECT 1 AS present FROM users WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let exists = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to check user for role update")?;
        if exists.is_none() {
            return Err(UserStoreError::NotFound);
        }

        let query = "SELECT COUNT(*) AS known FROM roles WHERE name = ANY($1)";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT"
        );
        let row = sqlx::query(query)
            .bind(roles)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await
            .context("failed to validate roles")?;
        let known: i64 = row.get("known");
        if known != roles.len() as i64 {
            return Err(UserStoreError::Other(anyhow::anyhow!(
                "role set contains unknown roles"
            )));
        }

        let query = "DELETE FROM user_roles WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to clear user roles")?;

        for role in roles {
            let query = "INSERT INTO user_roles (user_id, role_name) VALUES ($1, $2)";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT"
            );
            sqlx::query(query)
                .bind(user_id)
                .bind(role)
                .execute(&mut *tx)
                .instrument(span)
                .await
                .context("failed to assign user role")?;
        }

        tx.commit()
            .await
            .context("failed to commit role transaction")?;
        Ok(())
    }
}
