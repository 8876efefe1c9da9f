//! Endpoints for the authenticated user: identity echo and session
//! management.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use auth_token::Claims;

use crate::api::cookies::{REFRESH_TOKEN_COOKIE, cookie_value};
use crate::api::response;
use crate::api::state::AppState;
use crate::session::{RevokeOutcome, SessionView};

fn claims_user_id(headers: &HeaderMap, claims: &Claims) -> Result<Uuid, Response> {
    Uuid::parse_str(&claims.sub).map_err(|_| {
        response::error(
            headers,
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "invalid access token",
            None,
        )
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/me",
    responses(
        (status = 200, description = "Caller identity from the access token")
    ),
    tag = "me"
)]
pub async fn me(headers: HeaderMap, claims: Extension<Claims>) -> Response {
    response::success(
        &headers,
        StatusCode::OK,
        json!({
            "user_id": claims.sub,
            "roles": claims.roles,
            "permissions": claims.permissions,
        }),
    )
}

#[utoipa::path(
    get,
    path = "/api/v1/me/sessions",
    responses(
        (status = 200, description = "Active sessions, current one marked", body = [SessionView])
    ),
    tag = "me"
)]
pub async fn list_sessions(
    headers: HeaderMap,
    claims: Extension<Claims>,
    state: Extension<Arc<AppState>>,
) -> Response {
    let user_id = match claims_user_id(&headers, &claims) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    let refresh_cookie = cookie_value(&headers, REFRESH_TOKEN_COOKIE);
    let current = match state
        .sessions
        .resolve_current_session_id(user_id, Some(&claims.jti), refresh_cookie.as_deref())
        .await
    {
        Ok(current) => current,
        Err(err) => {
            error!("failed to resolve current session: {err}");
            None
        }
    };

    match state.sessions.list_active_sessions(user_id, current).await {
        Ok(views) => response::success(&headers, StatusCode::OK, views),
        Err(err) => {
            error!("failed to list sessions: {err}");
            response::error(
                &headers,
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "failed to list sessions",
                None,
            )
        }
    }
}

#[utoipa::path(
    delete,
    path = "/api/v1/me/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session revoked (idempotent)"),
        (status = 404, description = "No such session for this user")
    ),
    tag = "me"
)]
pub async fn revoke_session(
    headers: HeaderMap,
    claims: Extension<Claims>,
    state: Extension<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Response {
    let user_id = match claims_user_id(&headers, &claims) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    match state.sessions.revoke_session(user_id, session_id).await {
        Ok(RevokeOutcome::Revoked) => {
            response::success(&headers, StatusCode::OK, json!({ "status": "revoked" }))
        }
        Ok(RevokeOutcome::AlreadyRevoked) => response::success(
            &headers,
            StatusCode::OK,
            json!({ "status": "already_revoked" }),
        ),
        Ok(RevokeOutcome::NotFound) => response::error(
            &headers,
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "session not found",
            None,
        ),
        Err(err) => {
            error!("failed to revoke session: {err}");
            response::error(
                &headers,
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "failed to revoke session",
                None,
            )
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/me/sessions/revoke-others",
    responses(
        (status = 200, description = "Sibling sessions revoked"),
        (status = 400, description = "Current session could not be identified")
    ),
    tag = "me"
)]
pub async fn revoke_other_sessions(
    headers: HeaderMap,
    claims: Extension<Claims>,
    state: Extension<Arc<AppState>>,
) -> Response {
    let user_id = match claims_user_id(&headers, &claims) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    let refresh_cookie = cookie_value(&headers, REFRESH_TOKEN_COOKIE);
    let current = match state
        .sessions
        .resolve_current_session_id(user_id, Some(&claims.jti), refresh_cookie.as_deref())
        .await
    {
        Ok(Some(current)) => current,
        Ok(None) => {
            return response::error(
                &headers,
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                "cannot identify the current session",
                None,
            );
        }
        Err(err) => {
            error!("failed to resolve current session: {err}");
            return response::error(
                &headers,
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "failed to revoke sessions",
                None,
            );
        }
    };

    match state.sessions.revoke_other_sessions(user_id, current).await {
        Ok(revoked) => {
            response::success(&headers, StatusCode::OK, json!({ "revoked": revoked }))
        }
        Err(err) => {
            error!("failed to revoke sibling sessions: {err}");
            response::error(
                &headers,
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "failed to revoke sessions",
                None,
            )
        }
    }
}
