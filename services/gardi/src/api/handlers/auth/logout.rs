//! Logout: revoke the presented session and clear cookies.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::Response,
};
use serde_json::json;
use tracing::error;

use crate::api::cookies::{REFRESH_TOKEN_COOKIE, clear_auth_cookies, cookie_value};
use crate::api::response;
use crate::api::state::AppState;
use crate::session::RevokedReason;

#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    responses(
        (status = 200, description = "Session revoked and cookies cleared")
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, state: Extension<Arc<AppState>>) -> Response {
    // Revocation is best effort; the cookies get cleared either way.
    if let Some(refresh_token) = cookie_value(&headers, REFRESH_TOKEN_COOKIE) {
        let hash = state.tokens.hash(&refresh_token);
        if let Err(err) = state
            .session_store
            .revoke_by_hash(&hash, RevokedReason::Logout)
            .await
        {
            error!("failed to revoke session on logout: {err}");
        }
    }

    let mut response = response::success(
        &headers,
        StatusCode::OK,
        json!({ "status": "logged_out" }),
    );
    for cookie in clear_auth_cookies(&state.config) {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}
