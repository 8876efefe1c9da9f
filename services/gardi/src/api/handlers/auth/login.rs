//! Password login, gated by the abuse guard.
//!
//! Failure responses are deliberately uniform: an unknown email and a wrong
//! password are indistinguishable to the caller, and cooldown responses use
//! the same code as rate limiting.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode, header::SET_COOKIE, header::USER_AGENT},
    response::Response,
};
use tracing::{error, info, warn};

use crate::abuse::AbuseScope;
use crate::api::cookies::auth_cookies;
use crate::api::middleware::client_ip;
use crate::api::response;
use crate::api::state::AppState;
use crate::users::{UserStoreError, normalize_email, verify_password};

use super::register::USERS_NEGATIVE_NAMESPACE;
use super::types::{LoginRequest, LoginResponse};

const NEGATIVE_LOOKUP_TTL: Duration = Duration::from_secs(60);

#[utoipa::path(
    post,
    path = "/api/v1/auth/local/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated; cookies set", body = LoginResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 429, description = "Cooldown active")
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Response {
    let email = normalize_email(&body.email);
    let ip = client_ip(&headers, None);
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    // Abuse guard runs before any credential work.
    let cooldown = match state.abuse.check(AbuseScope::Login, &email, &ip).await {
        Ok(cooldown) => cooldown,
        Err(err) => {
            error!("abuse guard check failed: {err}");
            return cooldown_response(&headers, Duration::from_secs(60));
        }
    };
    if !cooldown.is_zero() {
        warn!(ip = %ip, "login attempt during cooldown");
        return cooldown_response(&headers, cooldown);
    }

    // Known-missing identities skip the store round trip.
    match state.negative.get(USERS_NEGATIVE_NAMESPACE, &email).await {
        Ok(true) => return failed_attempt(&state, &headers, &email, &ip).await,
        Ok(false) => {}
        Err(err) => error!("negative lookup cache read failed: {err}"),
    }

    let credentials = match state.users.find_credentials_by_email(&email).await {
        Ok(credentials) => credentials,
        Err(UserStoreError::NotFound) => {
            if let Err(err) = state
                .negative
                .set(USERS_NEGATIVE_NAMESPACE, &email, NEGATIVE_LOOKUP_TTL)
                .await
            {
                error!("negative lookup cache write failed: {err}");
            }
            return failed_attempt(&state, &headers, &email, &ip).await;
        }
        Err(err) => {
            error!("failed to load credentials: {err}");
            return response::error(
                &headers,
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "login failed",
                None,
            );
        }
    };

    match verify_password(&credentials.password_hash, &body.password) {
        Ok(true) => {}
        Ok(false) => return failed_attempt(&state, &headers, &email, &ip).await,
        Err(err) => {
            error!("stored password hash is unusable: {err}");
            return failed_attempt(&state, &headers, &email, &ip).await;
        }
    }

    if let Err(err) = state.abuse.reset(AbuseScope::Login, &email, &ip).await {
        error!("abuse guard reset failed: {err}");
    }

    let user = credentials.user;
    let (_, permissions) = match state.users.get_with_permissions(user.id).await {
        Ok(found) => found,
        Err(err) => {
            error!("failed to resolve permissions at login: {err}");
            return response::error(
                &headers,
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "login failed",
                None,
            );
        }
    };

    let pair = match state.tokens.issue(&user, permissions, &user_agent, &ip).await {
        Ok(pair) => pair,
        Err(err) => {
            error!("failed to issue tokens: {err}");
            return response::error(
                &headers,
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "login failed",
                None,
            );
        }
    };

    let Ok(cookies) = auth_cookies(&state.config, &pair) else {
        return response::error(
            &headers,
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL",
            "login failed",
            None,
        );
    };

    info!(user_id = %user.id, "login succeeded");
    let mut response = response::success(
        &headers,
        StatusCode::OK,
        LoginResponse {
            user_id: user.id,
            email: user.email,
            name: user.name,
            roles: user.roles,
        },
    );
    for cookie in cookies {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}

async fn failed_attempt(
    state: &AppState,
    headers: &HeaderMap,
    email: &str,
    ip: &str,
) -> Response {
    match state
        .abuse
        .register_failure(AbuseScope::Login, email, ip)
        .await
    {
        Ok(_) => {}
        Err(err) => error!("abuse guard failure registration failed: {err}"),
    }
    response::error(
        headers,
        StatusCode::UNAUTHORIZED,
        "UNAUTHORIZED",
        "invalid credentials",
        None,
    )
}

fn cooldown_response(headers: &HeaderMap, cooldown: Duration) -> Response {
    let mut response = response::error(
        headers,
        StatusCode::TOO_MANY_REQUESTS,
        "RATE_LIMITED",
        "too many attempts",
        None,
    );
    let seconds = cooldown.as_secs().max(1);
    if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
        response.headers_mut().insert("retry-after", value);
    }
    response
}
