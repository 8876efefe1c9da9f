//! Access-token extraction and claims binding.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::debug;

use crate::api::cookies::{ACCESS_TOKEN_COOKIE, bearer_token, cookie_value};
use crate::api::response;
use crate::api::state::AppState;

/// Where the access token came from. Bearer-sourced requests are exempt from
/// the CSRF double-submit check, cookie-sourced ones are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSource {
    Cookie,
    Bearer,
}

impl AuthSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cookie => "cookie",
            Self::Bearer => "bearer",
        }
    }
}

/// Extract the access token (cookie first, then bearer), verify it, and
/// attach the claims to the request.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let headers = request.headers().clone();

    let (raw, source) = match cookie_value(&headers, ACCESS_TOKEN_COOKIE) {
        Some(token) => (Some(token), AuthSource::Cookie),
        None => (bearer_token(&headers), AuthSource::Bearer),
    };
    let Some(raw) = raw else {
        return response::error(
            &headers,
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing access token",
            None,
        );
    };

    match state.codec.parse_access(&raw, Utc::now().timestamp()) {
        Ok(claims) => {
            debug!(source = source.as_str(), "access token accepted");
            request.extensions_mut().insert(claims);
            request.extensions_mut().insert(source);
            next.run(request).await
        }
        Err(err) => {
            debug!(source = source.as_str(), "access token rejected: {err}");
            response::error(
                &headers,
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "invalid access token",
                None,
            )
        }
    }
}
