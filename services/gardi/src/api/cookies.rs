//! Cookie builders and credential extraction helpers.
//!
//! Cookie scopes are deliberate: the refresh token is only ever sent to the
//! auth endpoints, the oauth state only to the google callback, and the CSRF
//! token is readable by scripts so it can be echoed in a header.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{AUTHORIZATION, COOKIE, InvalidHeaderValue},
};

use crate::token::TokenPair;

use super::state::AppConfig;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
pub const CSRF_TOKEN_COOKIE: &str = "csrf_token";
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

const REFRESH_TOKEN_PATH: &str = "/api/v1/auth";
const OAUTH_STATE_PATH: &str = "/api/v1/auth/google";

fn build_cookie(
    name: &str,
    value: &str,
    path: &str,
    max_age_seconds: i64,
    http_only: bool,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{name}={value}; Path={path}; SameSite=Lax; Max-Age={max_age_seconds}");
    if http_only {
        cookie.push_str("; HttpOnly");
    }
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// The three cookies set after issuance or rotation.
///
/// # Errors
/// Returns an error if a token contains bytes illegal in a header value.
pub fn auth_cookies(
    config: &AppConfig,
    pair: &TokenPair,
) -> Result<[HeaderValue; 3], InvalidHeaderValue> {
    let secure = config.cookie_secure();
    let access_ttl = config.access_ttl().as_secs() as i64;
    let refresh_ttl = config.refresh_ttl().as_secs() as i64;
    Ok([
        build_cookie(ACCESS_TOKEN_COOKIE, &pair.access, "/", access_ttl, true, secure)?,
        build_cookie(
            REFRESH_TOKEN_COOKIE,
            &pair.refresh,
            REFRESH_TOKEN_PATH,
            refresh_ttl,
            true,
            secure,
        )?,
        // Double-submit pair: scripts read this cookie and echo it in
        // X-CSRF-Token.
        build_cookie(CSRF_TOKEN_COOKIE, &pair.csrf, "/", refresh_ttl, false, secure)?,
    ])
}

/// Expire all auth cookies, e.g. on logout or failed rotation.
#[must_use]
pub fn clear_auth_cookies(config: &AppConfig) -> Vec<HeaderValue> {
    let secure = config.cookie_secure();
    [
        build_cookie(ACCESS_TOKEN_COOKIE, "", "/", 0, true, secure),
        build_cookie(REFRESH_TOKEN_COOKIE, "", REFRESH_TOKEN_PATH, 0, true, secure),
        build_cookie(CSRF_TOKEN_COOKIE, "", "/", 0, false, secure),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// # Errors
/// Returns an error if the state value cannot be a header value.
pub fn oauth_state_cookie(
    config: &AppConfig,
    state: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(
        OAUTH_STATE_COOKIE,
        state,
        OAUTH_STATE_PATH,
        config.oauth_state_ttl().as_secs() as i64,
        true,
        config.cookie_secure(),
    )
}

#[must_use]
pub fn clear_oauth_state_cookie(config: &AppConfig) -> Option<HeaderValue> {
    build_cookie(
        OAUTH_STATE_COOKIE,
        "",
        OAUTH_STATE_PATH,
        0,
        true,
        config.cookie_secure(),
    )
    .ok()
}

/// Read one cookie from the Cookie header.
#[must_use]
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

/// Read a bearer token from the Authorization header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
