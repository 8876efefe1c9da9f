//! Rate limiting layer: decision headers on every response, policy-driven
//! behavior when the backend is down.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::{debug, warn};

use crate::api::cookies::{ACCESS_TOKEN_COOKIE, bearer_token, cookie_value};
use crate::api::response;
use crate::api::state::AppState;
use crate::ratelimit::{Decision, RateLimitPolicy, RateLimiter};

/// What to do when the limiter backend cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    FailOpen,
    FailClosed,
}

impl FailureMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FailOpen => "fail_open",
            Self::FailClosed => "fail_closed",
        }
    }
}

/// How to derive the limiter key from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKey {
    /// Client IP from proxy headers, falling back to the socket address.
    ClientIp,
    /// `sub:<user>` when a valid access token is present, else client IP.
    SubjectOrIp,
}

/// Evaluates trusted callers that may skip the limiter; returns an audit
/// reason when the request bypasses.
pub type BypassEvaluator = Arc<dyn Fn(&HeaderMap, &str) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub app: Arc<AppState>,
    pub limiter: Arc<dyn RateLimiter>,
    pub policy: RateLimitPolicy,
    pub mode: FailureMode,
    pub scope: &'static str,
    pub key: RateLimitKey,
    pub bypass: Option<BypassEvaluator>,
}

/// Client IP for keying: proxy headers first, socket peer last.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return ip.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn write_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset_unix: i64) {
    if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&reset_unix.to_string()) {
        headers.insert("x-ratelimit-reset", value);
    }
}

fn retry_after_value(retry: std::time::Duration) -> HeaderValue {
    let seconds = retry.as_secs().max(1);
    HeaderValue::from_str(&seconds.to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("1"))
}

pub async fn rate_limit(
    State(config): State<RateLimitConfig>,
    request: Request,
    next: Next,
) -> Response {
    let headers = request.headers().clone();
    let path = request.uri().path().to_string();

    if let Some(bypass) = &config.bypass
        && let Some(reason) = bypass(&headers, &path)
    {
        // Bypasses are security-relevant; always leave a trace.
        warn!(scope = config.scope, reason = %reason, path = %path, "rate limiter bypass applied");
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let key = match config.key {
        RateLimitKey::ClientIp => client_ip(&headers, peer),
        RateLimitKey::SubjectOrIp => subject_key(&config, &headers)
            .unwrap_or_else(|| client_ip(&headers, peer)),
    };

    let decision = match config.limiter.allow(&key, config.policy).await {
        Ok(decision) => decision,
        Err(err) => {
            return handle_backend_error(&config, &headers, request, next, &err).await;
        }
    };

    if decision.allowed {
        debug!(scope = config.scope, key = %key, "rate limit allow");
        let mut response = next.run(request).await;
        apply_decision_headers(&config, response.headers_mut(), &decision);
        return response;
    }

    debug!(
        scope = config.scope,
        key = %key,
        reason = decision.reason.map_or("window", |reason| reason.as_str()),
        "rate limit deny"
    );
    let mut response = response::error(
        &headers,
        StatusCode::TOO_MANY_REQUESTS,
        "RATE_LIMITED",
        "too many requests",
        None,
    );
    apply_decision_headers(&config, response.headers_mut(), &decision);
    response
        .headers_mut()
        .insert("retry-after", retry_after_value(decision.retry_after));
    response
}

fn apply_decision_headers(config: &RateLimitConfig, headers: &mut HeaderMap, decision: &Decision) {
    write_limit_headers(
        headers,
        config.policy.sustained_limit,
        decision.remaining,
        decision.reset_at.timestamp(),
    );
}

async fn handle_backend_error(
    config: &RateLimitConfig,
    headers: &HeaderMap,
    request: Request,
    next: Next,
    err: &anyhow::Error,
) -> Response {
    match config.mode {
        FailureMode::FailOpen => {
            warn!(
                scope = config.scope,
                mode = config.mode.as_str(),
                "rate limiter backend unavailable, allowing request: {err}"
            );
            next.run(request).await
        }
        FailureMode::FailClosed => {
            warn!(
                scope = config.scope,
                mode = config.mode.as_str(),
                "rate limiter backend unavailable, denying request: {err}"
            );
            let mut response = response::error(
                headers,
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "too many requests",
                None,
            );
            let reset = Utc::now()
                + chrono::Duration::from_std(config.policy.sustained_window)
                    .unwrap_or_else(|_| chrono::Duration::seconds(60));
            write_limit_headers(
                response.headers_mut(),
                config.policy.sustained_limit,
                0,
                reset.timestamp(),
            );
            response
                .headers_mut()
                .insert("retry-after", retry_after_value(config.policy.sustained_window));
            response
        }
    }
}

fn subject_key(config: &RateLimitConfig, headers: &HeaderMap) -> Option<String> {
    let raw = cookie_value(headers, ACCESS_TOKEN_COOKIE).or_else(|| bearer_token(headers))?;
    let claims = config
        .app
        .codec
        .parse_access(&raw, Utc::now().timestamp())
        .ok()?;
    Some(format!("sub:{}", claims.sub))
}
