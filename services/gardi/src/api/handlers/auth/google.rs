//! Google federated login endpoints.
//!
//! The signed `oauth_state` cookie binds the callback to the browser that
//! started the flow; the code exchange itself happens behind the
//! [`crate::oauth::CodeExchanger`] seam.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::{
        HeaderMap, StatusCode,
        header::{LOCATION, SET_COOKIE, USER_AGENT},
    },
    response::Response,
};
use chrono::Utc;
use tracing::{error, info};

use crate::api::cookies::{
    OAUTH_STATE_COOKIE, auth_cookies, clear_oauth_state_cookie, cookie_value, oauth_state_cookie,
};
use crate::api::middleware::client_ip;
use crate::api::response;
use crate::api::state::AppState;
use crate::users::{NewUser, UserStoreError, hash_password};

use super::register::DEFAULT_ROLE;
use super::types::{GoogleCallbackParams, LoginResponse};

#[utoipa::path(
    get,
    path = "/api/v1/auth/google/login",
    responses(
        (status = 302, description = "Redirect to the provider"),
        (status = 501, description = "Google login is not configured")
    ),
    tag = "auth"
)]
pub async fn google_login(headers: HeaderMap, state: Extension<Arc<AppState>>) -> Response {
    if !state.oauth.enabled() {
        return not_enabled(&headers);
    }

    let ttl = state.config.oauth_state_ttl().as_secs() as i64;
    let nonce = match state.oauth.sign_state(Utc::now().timestamp(), ttl) {
        Ok(nonce) => nonce,
        Err(err) => {
            error!("failed to sign oauth state: {err}");
            return oauth_failed(&headers, StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let authorize_url = match state.oauth.authorize_url(&nonce) {
        Ok(url) => url,
        Err(err) => {
            error!("failed to build authorize url: {err}");
            return oauth_failed(&headers, StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let mut response = Response::builder()
        .status(StatusCode::FOUND)
        .body(axum::body::Body::empty())
        .unwrap_or_default();
    if let Ok(location) = authorize_url.parse() {
        response.headers_mut().insert(LOCATION, location);
    }
    if let Ok(cookie) = oauth_state_cookie(&state.config, &nonce) {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    response
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/google/callback",
    params(
        ("code" = String, Query, description = "Authorization code"),
        ("state" = String, Query, description = "State nonce from the redirect")
    ),
    responses(
        (status = 200, description = "Authenticated; cookies set", body = LoginResponse),
        (status = 400, description = "State mismatch"),
        (status = 401, description = "Provider exchange failed"),
        (status = 501, description = "Google login is not configured")
    ),
    tag = "auth"
)]
pub async fn google_callback(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Query(params): Query<GoogleCallbackParams>,
) -> Response {
    if !state.oauth.enabled() {
        return not_enabled(&headers);
    }
    let Some(exchanger) = state.exchanger.clone() else {
        return not_enabled(&headers);
    };

    // The browser must present the same signed nonce it was handed.
    let now = Utc::now().timestamp();
    let cookie_state = cookie_value(&headers, OAUTH_STATE_COOKIE);
    let state_ok = cookie_state.as_deref() == Some(params.state.as_str())
        && state.oauth.verify_state(&params.state, now);
    if !state_ok {
        return response::error(
            &headers,
            StatusCode::BAD_REQUEST,
            "OAUTH_FAILED",
            "oauth state mismatch",
            None,
        );
    }

    let profile = match exchanger.exchange(&params.code).await {
        Ok(profile) => profile,
        Err(err) => {
            error!("oauth code exchange failed: {err}");
            return oauth_failed(&headers, StatusCode::UNAUTHORIZED);
        }
    };

    let user = match state.users.find_credentials_by_email(&profile.email).await {
        Ok(credentials) => credentials.user,
        Err(UserStoreError::NotFound) => {
            // First federated login provisions the account. The password is
            // random and never disclosed, so only Google can sign in here.
            let password_hash = match random_password().and_then(|random| hash_password(&random)) {
                Ok(hash) => hash,
                Err(err) => {
                    error!("failed to provision federated user: {err}");
                    return oauth_failed(&headers, StatusCode::INTERNAL_SERVER_ERROR);
                }
            };
            match state
                .users
                .create(NewUser {
                    email: profile.email.clone(),
                    name: profile.name.clone(),
                    password_hash,
                    roles: vec![DEFAULT_ROLE.to_string()],
                })
                .await
            {
                Ok(user) => user,
                Err(err) => {
                    error!("failed to create federated user: {err}");
                    return oauth_failed(&headers, StatusCode::INTERNAL_SERVER_ERROR);
                }
            }
        }
        Err(err) => {
            error!("failed to look up federated user: {err}");
            return oauth_failed(&headers, StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let ip = client_ip(&headers, None);
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let (user, permissions) = match state.users.get_with_permissions(user.id).await {
        Ok(found) => found,
        Err(err) => {
            error!("failed to resolve permissions after oauth: {err}");
            return oauth_failed(&headers, StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let pair = match state.tokens.issue(&user, permissions, &user_agent, &ip).await {
        Ok(pair) => pair,
        Err(err) => {
            error!("failed to issue tokens after oauth: {err}");
            return oauth_failed(&headers, StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let Ok(cookies) = auth_cookies(&state.config, &pair) else {
        return oauth_failed(&headers, StatusCode::INTERNAL_SERVER_ERROR);
    };

    info!(user_id = %user.id, "federated login succeeded");
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
    if let Some(cookie) = clear_oauth_state_cookie(&state.config) {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}

fn random_password() -> anyhow::Result<String> {
    use anyhow::Context;
    use base64::Engine;
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate placeholder password")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

fn not_enabled(headers: &HeaderMap) -> Response {
    response::error(
        headers,
        StatusCode::NOT_IMPLEMENTED,
        "NOT_ENABLED",
        "google login is not enabled",
        None,
    )
}

fn oauth_failed(headers: &HeaderMap, status: StatusCode) -> Response {
    response::error(headers, status, "OAUTH_FAILED", "google login failed", None)
}
