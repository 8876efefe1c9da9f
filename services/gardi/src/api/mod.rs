//! HTTP surface: router assembly and server lifecycle.

pub mod cookies;
pub mod handlers;
pub mod middleware;
mod openapi;
pub mod response;
mod state;

pub use handlers::health::Readiness;
pub use openapi::openapi;
pub use state::{AppConfig, AppState};

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, patch, post},
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;

use crate::idempotency::IdempotencyStore;
use crate::ratelimit::{RateLimitPolicy, RateLimiter};

use handlers::{admin, auth, health, me};
use middleware::{
    FailureMode, IdempotencyConfig, RateLimitConfig, RateLimitKey, idempotency_gate, rate_limit,
    require_auth, require_csrf, require_permission,
};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Everything the router needs beyond the application state.
pub struct ApiDeps {
    pub state: Arc<AppState>,
    pub readiness: Arc<Readiness>,
    pub limiter: Arc<dyn RateLimiter>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub api_policy: RateLimitPolicy,
    pub auth_policy: RateLimitPolicy,
    pub failure_mode: FailureMode,
    pub bypass: Option<middleware::BypassEvaluator>,
}

impl ApiDeps {
    fn limiter_config(
        &self,
        scope: &'static str,
        policy: RateLimitPolicy,
        key: RateLimitKey,
    ) -> RateLimitConfig {
        RateLimitConfig {
            app: self.state.clone(),
            limiter: self.limiter.clone(),
            policy,
            mode: self.failure_mode,
            scope,
            key,
            bypass: self.bypass.clone(),
        }
    }

    fn idempotency_config(&self, scope: &'static str) -> IdempotencyConfig {
        IdempotencyConfig {
            store: self.idempotency.clone(),
            scope,
            ttl: self.state.config.idempotency_ttl(),
            completion_ttl: self.state.config.idempotency_completion_ttl(),
        }
    }
}

/// Assemble the full router with per-route middleware stacks.
#[must_use]
pub fn router(deps: &ApiDeps) -> Router {
    let auth_mw = from_fn_with_state(deps.state.clone(), require_auth);
    let auth_limit = from_fn_with_state(
        deps.limiter_config("auth", deps.auth_policy, RateLimitKey::ClientIp),
        rate_limit,
    );
    let api_limit = from_fn_with_state(
        deps.limiter_config("api", deps.api_policy, RateLimitKey::SubjectOrIp),
        rate_limit,
    );

    let auth_routes = Router::new()
        .route(
            "/local/register",
            post(auth::register::register)
                .layer(from_fn_with_state(
                    deps.idempotency_config("auth.local.register"),
                    idempotency_gate,
                ))
                .layer(auth_limit.clone()),
        )
        .route(
            "/local/login",
            post(auth::login::login).layer(auth_limit.clone()),
        )
        .route(
            "/google/login",
            get(auth::google::google_login).layer(auth_limit.clone()),
        )
        .route(
            "/google/callback",
            get(auth::google::google_callback).layer(auth_limit.clone()),
        )
        .route(
            "/refresh",
            post(auth::refresh::refresh)
                .layer(from_fn(require_csrf))
                .layer(auth_limit.clone()),
        )
        .route(
            "/logout",
            post(auth::logout::logout)
                .layer(auth_mw.clone())
                .layer(from_fn(require_csrf)),
        );

    let me_routes = Router::new()
        .route("/", get(me::me))
        .route("/sessions", get(me::list_sessions))
        .route(
            "/sessions/{id}",
            delete(me::revoke_session).layer(from_fn(require_csrf)),
        )
        .route(
            "/sessions/revoke-others",
            post(me::revoke_other_sessions).layer(from_fn(require_csrf)),
        )
        .layer(auth_mw.clone());

    let users_write = middleware::RequiredPermission {
        resolver: deps.state.resolver.clone(),
        permission: "users:write",
    };
    let roles_write = middleware::RequiredPermission {
        resolver: deps.state.resolver.clone(),
        permission: "roles:write",
    };
    let admin_routes = Router::new()
        .route(
            "/users/{id}/roles",
            patch(admin::set_user_roles)
                .layer(from_fn_with_state(
                    deps.idempotency_config("admin.users.roles.patch"),
                    idempotency_gate,
                ))
                .layer(from_fn_with_state(users_write, require_permission)),
        )
        .route(
            "/rbac/invalidate",
            post(admin::invalidate_rbac_cache)
                .layer(from_fn_with_state(roles_write, require_permission)),
        )
        .layer(auth_mw);

    let api = Router::new()
        .nest("/auth", auth_routes)
        .nest("/me", me_routes)
        .nest("/admin", admin_routes)
        .layer(api_limit);

    Router::new()
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID_HEADER),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID_HEADER,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(deps.state.clone()))
                .layer(Extension(deps.readiness.clone())),
        )
}

/// Bind and serve until ctrl-c.
///
/// # Errors
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(port: u16, deps: ApiDeps) -> Result<()> {
    // Expired rows are garbage either way; sweeping them in the background
    // keeps the table from growing unbounded.
    crate::session::spawn_cleanup_worker(
        deps.state.session_store.clone(),
        std::time::Duration::from_secs(15 * 60),
    );

    let app = router(&deps);
    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Gracefully shutdown");
    })
    .await
    .context("server error")?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
