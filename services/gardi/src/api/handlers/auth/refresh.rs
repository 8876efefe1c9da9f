//! Refresh-token rotation endpoint.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE, header::USER_AGENT},
    response::Response,
};
use tracing::{error, info, warn};

use crate::api::cookies::{REFRESH_TOKEN_COOKIE, auth_cookies, clear_auth_cookies, cookie_value};
use crate::api::middleware::client_ip;
use crate::api::response;
use crate::api::state::AppState;
use crate::token::RotateError;

use super::types::RefreshResponse;

#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    responses(
        (status = 200, description = "New token pair set in cookies", body = RefreshResponse),
        (status = 401, description = "Refresh token missing, invalid, or reused")
    ),
    tag = "auth"
)]
pub async fn refresh(headers: HeaderMap, state: Extension<Arc<AppState>>) -> Response {
    let Some(refresh_token) = cookie_value(&headers, REFRESH_TOKEN_COOKIE) else {
        return response::error(
            &headers,
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing refresh token",
            None,
        );
    };

    let ip = client_ip(&headers, None);
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    match state.tokens.rotate(&refresh_token, &user_agent, &ip).await {
        Ok(rotated) => {
            let Ok(cookies) = auth_cookies(&state.config, &rotated.pair) else {
                return response::error(
                    &headers,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "refresh failed",
                    None,
                );
            };
            info!(user_id = %rotated.user_id, "refresh token rotated");
            let mut response = response::success(
                &headers,
                StatusCode::OK,
                RefreshResponse {
                    user_id: rotated.user_id,
                },
            );
            for cookie in cookies {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
            response
        }
        // Reuse is logged loudly server-side but collapses to the same 401
        // the client would get for any dead token.
        Err(RotateError::ReuseDetected) => {
            warn!(ip = %ip, "refresh token reuse detected, family revoked");
            rejected(&state, &headers)
        }
        Err(RotateError::Invalid) => rejected(&state, &headers),
        Err(RotateError::Other(err)) => {
            error!("rotation failed: {err}");
            response::error(
                &headers,
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "refresh failed",
                None,
            )
        }
    }
}

fn rejected(state: &AppState, headers: &HeaderMap) -> Response {
    let mut response = response::error(
        headers,
        StatusCode::UNAUTHORIZED,
        "UNAUTHORIZED",
        "invalid refresh token",
        None,
    );
    for cookie in clear_auth_cookies(&state.config) {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    response
}
