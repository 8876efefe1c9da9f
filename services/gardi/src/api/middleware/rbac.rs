//! Permission enforcement on top of the resolver.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use serde_json::json;
use tracing::{debug, error};

use auth_token::Claims;

use crate::api::response;
use crate::rbac::{PermissionResolver, has_permission};

/// State for [`require_permission`]: which permission this route needs.
#[derive(Clone)]
pub struct RequiredPermission {
    pub resolver: Arc<PermissionResolver>,
    pub permission: &'static str,
}

/// Resolve the caller's effective permissions and require one of them.
///
/// Resolver failure is a 503, not a 403: we refuse to guess when the
/// authority is unreachable.
pub async fn require_permission(
    State(required): State<RequiredPermission>,
    request: Request,
    next: Next,
) -> Response {
    let headers = request.headers().clone();
    let Some(claims) = request.extensions().get::<Claims>() else {
        return response::error(
            &headers,
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing auth context",
            None,
        );
    };

    let permissions = match required.resolver.resolve(claims).await {
        Ok(permissions) => permissions,
        Err(err) => {
            error!(permission = required.permission, "permission resolution failed: {err}");
            return response::error(
                &headers,
                StatusCode::SERVICE_UNAVAILABLE,
                "RBAC_UNAVAILABLE",
                "permission resolution unavailable",
                None,
            );
        }
    };

    if !has_permission(&permissions, required.permission) {
        debug!(permission = required.permission, sub = %claims.sub, "permission denied");
        return response::error(
            &headers,
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "insufficient permission",
            Some(json!({ "required": required.permission })),
        );
    }

    next.run(request).await
}
