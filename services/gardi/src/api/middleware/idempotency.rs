//! Idempotency gate: fingerprint the request, run the state machine, and
//! capture the winning handler's response for replay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, to_bytes},
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

use auth_token::Claims;

use crate::api::response;
use crate::idempotency::{BeginOutcome, CachedResponse, IdempotencyStore, fingerprint};

use super::rate_limit::client_ip;

const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
const REPLAYED_HEADER: &str = "x-idempotency-replayed";
const MAX_BODY_BYTES: usize = 1 << 20;

#[derive(Clone)]
pub struct IdempotencyConfig {
    pub store: Arc<dyn IdempotencyStore>,
    pub scope: &'static str,
    pub ttl: Duration,
    pub completion_ttl: Duration,
}

pub async fn idempotency_gate(
    State(config): State<IdempotencyConfig>,
    request: Request,
    next: Next,
) -> Response {
    let headers = request.headers().clone();
    let Some(key) = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
    else {
        // No key means the client opted out of idempotent handling.
        return next.run(request).await;
    };

    // Fingerprint binds the key to who sent what, where.
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let actor = request
        .extensions()
        .get::<Claims>()
        .map_or_else(|| client_ip(&headers, peer), |claims| format!("sub:{}", claims.sub));
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let (parts, body) = request.into_parts();
    let Ok(bytes) = to_bytes(body, MAX_BODY_BYTES).await else {
        return response::error(
            &headers,
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
            "request body too large or unreadable",
            None,
        );
    };
    let request_fingerprint = fingerprint(&method, &path, &actor, &bytes);
    let request = Request::from_parts(parts, Body::from(bytes));

    let outcome = config
        .store
        .begin(config.scope, &key, &request_fingerprint, config.ttl)
        .await;
    match outcome {
        Err(err) => {
            error!(scope = config.scope, "idempotency backend unavailable: {err}");
            response::error(
                &headers,
                StatusCode::SERVICE_UNAVAILABLE,
                "DEPENDENCY_UNREADY",
                "idempotency backend unavailable",
                None,
            )
        }
        Ok(BeginOutcome::New) => {
            let response = next.run(request).await;
            capture_and_complete(&config, &key, &request_fingerprint, response).await
        }
        Ok(BeginOutcome::InProgress) => {
            debug!(scope = config.scope, "duplicate request while in progress");
            response::error(
                &headers,
                StatusCode::CONFLICT,
                "IDEMPOTENCY_CONFLICT",
                "request with this idempotency key is in progress",
                None,
            )
        }
        Ok(BeginOutcome::Conflict) => response::error(
            &headers,
            StatusCode::CONFLICT,
            "IDEMPOTENCY_CONFLICT",
            "idempotency key reused with a different request",
            None,
        ),
        Ok(BeginOutcome::Replay(cached)) => {
            debug!(scope = config.scope, status = cached.status, "replaying recorded response");
            replay_response(&cached)
        }
    }
}

/// Buffer whatever the handler wrote and record it; the record is replayed
/// identically regardless of status class.
async fn capture_and_complete(
    config: &IdempotencyConfig,
    key: &str,
    request_fingerprint: &str,
    response: Response,
) -> Response {
    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(scope = config.scope, "failed to buffer response body: {err}");
            return Response::from_parts(parts, Body::empty());
        }
    };

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();
    let cached = CachedResponse {
        status: parts.status.as_u16(),
        content_type,
        body: bytes.to_vec(),
    };
    if let Err(err) = config
        .store
        .complete(
            config.scope,
            key,
            request_fingerprint,
            cached,
            config.completion_ttl,
        )
        .await
    {
        // The handler already ran; losing the record only costs replay.
        error!(scope = config.scope, "failed to record idempotent response: {err}");
    }

    Response::from_parts(parts, Body::from(bytes))
}

fn replay_response(cached: &CachedResponse) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK));
    if !cached.content_type.is_empty()
        && let Ok(value) = HeaderValue::from_str(&cached.content_type)
    {
        builder = builder.header(CONTENT_TYPE, value);
    }
    builder = builder.header(REPLAYED_HEADER, HeaderValue::from_static("true"));
    builder
        .body(Body::from(cached.body.clone()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
