//! Admin mutations over roles and the permission cache.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::response;
use crate::api::state::AppState;
use crate::users::UserStoreError;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetRolesRequest {
    pub roles: Vec<String>,
}

#[utoipa::path(
    patch,
    path = "/api/v1/admin/users/{id}/roles",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = SetRolesRequest,
    responses(
        (status = 200, description = "Roles replaced; cached permissions invalidated"),
        (status = 400, description = "Unknown role in the set"),
        (status = 404, description = "No such user")
    ),
    tag = "admin"
)]
pub async fn set_user_roles(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
    Json(body): Json<SetRolesRequest>,
) -> Response {
    match state.users.set_roles(user_id, &body.roles).await {
        Ok(()) => {}
        Err(UserStoreError::NotFound) => {
            return response::error(
                &headers,
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "user not found",
                None,
            );
        }
        Err(err) => {
            error!("failed to set roles: {err}");
            return response::error(
                &headers,
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                "role set was rejected",
                None,
            );
        }
    }

    // The epoch bump is what makes the change effective for tokens that are
    // already in the wild; failing it would leave stale grants live.
    if let Err(err) = state.resolver.invalidate_user(user_id).await {
        error!("failed to invalidate cached permissions: {err}");
        return response::error(
            &headers,
            StatusCode::SERVICE_UNAVAILABLE,
            "RBAC_UNAVAILABLE",
            "permission cache invalidation failed",
            None,
        );
    }

    info!(user_id = %user_id, roles = ?body.roles, "user roles updated");
    response::success(&headers, StatusCode::OK, json!({ "status": "updated" }))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/rbac/invalidate",
    responses(
        (status = 200, description = "Global permission cache epoch bumped")
    ),
    tag = "admin"
)]
pub async fn invalidate_rbac_cache(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Response {
    if let Err(err) = state.resolver.invalidate_all().await {
        error!("failed to bump global permission epoch: {err}");
        return response::error(
            &headers,
            StatusCode::SERVICE_UNAVAILABLE,
            "RBAC_UNAVAILABLE",
            "permission cache invalidation failed",
            None,
        );
    }
    info!("global permission cache invalidated");
    response::success(&headers, StatusCode::OK, json!({ "status": "invalidated" }))
}
