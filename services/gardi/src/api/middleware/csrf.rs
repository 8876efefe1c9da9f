//! CSRF double-submit check for cookie-authenticated unsafe requests.

use axum::{
    extract::Request,
    http::{Method, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::api::cookies::{ACCESS_TOKEN_COOKIE, CSRF_TOKEN_COOKIE, bearer_token, cookie_value};
use crate::api::response;

const CSRF_HEADER: &str = "x-csrf-token";

/// Require `csrf_token` cookie == `X-CSRF-Token` header on unsafe verbs.
///
/// Pure-bearer requests carry no ambient credential a cross-site page could
/// ride on, so they skip the check.
pub async fn require_csrf(request: Request, next: Next) -> Response {
    if matches!(
        *request.method(),
        Method::GET | Method::HEAD | Method::OPTIONS
    ) {
        return next.run(request).await;
    }

    let headers = request.headers().clone();
    let has_auth_cookie = cookie_value(&headers, ACCESS_TOKEN_COOKIE).is_some()
        || cookie_value(&headers, crate::api::cookies::REFRESH_TOKEN_COOKIE).is_some();
    if !has_auth_cookie && bearer_token(&headers).is_some() {
        return next.run(request).await;
    }

    let cookie = cookie_value(&headers, CSRF_TOKEN_COOKIE);
    let header = headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    match (cookie, header) {
        (Some(cookie), Some(header)) if cookie == header => next.run(request).await,
        _ => response::error(
            &headers,
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "csrf token missing or mismatched",
            None,
        ),
    }
}
