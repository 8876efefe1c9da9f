//! Local account registration.

use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use tracing::{error, info};

use crate::api::response;
use crate::api::state::AppState;
use crate::users::{NewUser, UserStoreError, hash_password, normalize_email, valid_email};

use super::types::{RegisterRequest, RegisterResponse};

const MIN_PASSWORD_LENGTH: usize = 12;
pub(crate) const DEFAULT_ROLE: &str = "user";
pub(crate) const USERS_NEGATIVE_NAMESPACE: &str = "users";

#[utoipa::path(
    post,
    path = "/api/v1/auth/local/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = RegisterResponse),
        (status = 400, description = "Invalid email or password"),
        (status = 409, description = "Email already registered")
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> Response {
    let email = normalize_email(&body.email);
    if !valid_email(&email) {
        return response::error(
            &headers,
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
            "invalid email address",
            None,
        );
    }
    if body.password.chars().count() < MIN_PASSWORD_LENGTH {
        return response::error(
            &headers,
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
            "password is too short",
            None,
        );
    }
    let name = body.name.trim();
    if name.is_empty() {
        return response::error(
            &headers,
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
            "name must not be empty",
            None,
        );
    }

    let password_hash = match hash_password(&body.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("failed to hash password: {err}");
            return response::error(
                &headers,
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "registration failed",
                None,
            );
        }
    };

    let user = match state
        .users
        .create(NewUser {
            email: email.clone(),
            name: name.to_string(),
            password_hash,
            roles: vec![DEFAULT_ROLE.to_string()],
        })
        .await
    {
        Ok(user) => user,
        Err(UserStoreError::Conflict) => {
            return response::error(
                &headers,
                StatusCode::CONFLICT,
                "BAD_REQUEST",
                "email already registered",
                None,
            );
        }
        Err(err) => {
            error!("failed to create user: {err}");
            return response::error(
                &headers,
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "registration failed",
                None,
            );
        }
    };

    // The email is no longer a known miss.
    if let Err(err) = state
        .negative
        .invalidate_namespace(USERS_NEGATIVE_NAMESPACE)
        .await
    {
        error!("failed to invalidate negative lookup cache: {err}");
    }

    info!(user_id = %user.id, "user registered");
    response::success(
        &headers,
        StatusCode::CREATED,
        RegisterResponse {
            user_id: user.id,
            email: user.email,
        },
    )
}
