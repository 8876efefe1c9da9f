//! Liveness and readiness probes.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde_json::json;
use sqlx::{Connection, PgPool};
use std::sync::Arc;
use tracing::{Instrument, error, info_span};
use utoipa::ToSchema;

use crate::api::response;

/// Dependency handles the readiness probe pings. Either may be absent when
/// the deployment runs without that backend.
#[derive(Clone, Default)]
pub struct Readiness {
    pub pool: Option<PgPool>,
    pub redis: Option<ConnectionManager>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
}

#[utoipa::path(
    get,
    path = "/health/live",
    responses(
        (status = 200, description = "Process is alive")
    ),
    tag = "health"
)]
pub async fn live(headers: HeaderMap) -> impl IntoResponse {
    response::success(&headers, StatusCode::OK, json!({ "status": "ok" }))
}

#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "All dependencies answer", body = [HealthCheck]),
        (status = 503, description = "A dependency is unavailable", body = [HealthCheck])
    ),
    tag = "health"
)]
pub async fn ready(
    headers: HeaderMap,
    readiness: Extension<Arc<Readiness>>,
) -> Response {
    let mut checks = Vec::new();
    let mut healthy = true;

    if let Some(pool) = &readiness.pool {
        let ok = ping_postgres(pool).await;
        healthy &= ok;
        checks.push(HealthCheck {
            name: "postgres".to_string(),
            status: status_str(ok),
        });
    }
    if let Some(conn) = &readiness.redis {
        let ok = ping_redis(conn.clone()).await;
        healthy &= ok;
        checks.push(HealthCheck {
            name: "redis".to_string(),
            status: status_str(ok),
        });
    }

    if healthy {
        response::success(
            &headers,
            StatusCode::OK,
            json!({ "status": "ready", "checks": checks }),
        )
    } else {
        response::error(
            &headers,
            StatusCode::SERVICE_UNAVAILABLE,
            "DEPENDENCY_UNREADY",
            "dependencies are not ready",
            Some(json!({ "checks": checks })),
        )
    }
}

fn status_str(ok: bool) -> String {
    if ok { "ok" } else { "error" }.to_string()
}

async fn ping_postgres(pool: &PgPool) -> bool {
    let span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
    async {
        match pool.acquire().await {
            Ok(mut conn) => match conn.ping().await {
                Ok(()) => true,
                Err(err) => {
                    error!("failed to ping database: {err}");
                    false
                }
            },
            Err(err) => {
                error!("failed to acquire database connection: {err}");
                false
            }
        }
    }
    .instrument(span)
    .await
}

async fn ping_redis(mut conn: ConnectionManager) -> bool {
    let span = info_span!("redis.command", db.system = "redis", db.operation = "PING");
    async {
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => true,
            Err(err) => {
                error!("failed to ping redis: {err}");
                false
            }
        }
    }
    .instrument(span)
    .await
}
