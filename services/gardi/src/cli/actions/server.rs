//! Server action: build the configured store variants and run the API.

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

use auth_token::TokenCodec;

use crate::abuse::{AbuseGuard, AbusePolicy, MemoryAbuseGuard, RedisAbuseGuard};
use crate::api::{self, ApiDeps, AppConfig, AppState, Readiness};
use crate::api::middleware::FailureMode;
use crate::idempotency::{IdempotencyStore, MemoryIdempotencyStore, RedisIdempotencyStore};
use crate::oauth::{CodeExchanger, GoogleOAuth, GoogleOAuthConfig, HttpCodeExchanger};
use crate::ratelimit::{LocalRateLimiter, RateLimitPolicy, RateLimiter, RedisRateLimiter};
use crate::rbac::{
    MemoryNegativeLookupCache, MemoryPermissionCacheStore, NegativeLookupCache,
    PermissionCacheStore, PermissionResolver, RedisNegativeLookupCache, RedisPermissionCacheStore,
};
use crate::session::{MemorySessionStore, PgSessionStore, SessionService, SessionStore};
use crate::token::TokenService;
use crate::users::{MemoryUserStore, PgUserStore, UserStore};

pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub redis_url: Option<String>,
    pub base_url: String,
    pub token_issuer: String,
    pub token_audience: String,
    pub access_token_secret: SecretString,
    pub refresh_token_secret: SecretString,
    pub refresh_token_pepper: SecretString,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub api_rate_limit_rpm: u32,
    pub auth_rate_limit_rpm: u32,
    pub rate_limit_fail_open: bool,
    pub idempotency_ttl: Duration,
    pub idempotency_completion_ttl: Duration,
    pub permission_cache_ttl: Duration,
    pub abuse_free_attempts: u32,
    pub abuse_base_delay: Duration,
    pub abuse_multiplier: f64,
    pub abuse_max_delay: Duration,
    pub abuse_reset_window: Duration,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<SecretString>,
    pub google_redirect_url: Option<String>,
}

/// Default role set for deployments without a database; the SQL seed mirrors
/// these grants.
fn memory_user_store() -> MemoryUserStore {
    MemoryUserStore::new().with_role("user", &[]).with_role(
        "admin",
        &[
            "users:read",
            "users:write",
            "roles:read",
            "roles:write",
            "permissions:read",
            "permissions:write",
        ],
    )
}

/// Execute the server action.
///
/// # Errors
/// Returns an error when a configured backend is unreachable or the server
/// fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let codec = Arc::new(TokenCodec::new(
        args.token_issuer.clone(),
        args.token_audience.clone(),
        args.access_token_secret.expose_secret().as_bytes().to_vec(),
        args.refresh_token_secret.expose_secret().as_bytes().to_vec(),
    ));

    // Durable stores: Postgres when configured, process memory otherwise.
    let (session_store, user_store, pool): (
        Arc<dyn SessionStore>,
        Arc<dyn UserStore>,
        Option<sqlx::PgPool>,
    ) = if let Some(dsn) = &args.dsn {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        (
            Arc::new(PgSessionStore::new(pool.clone())),
            Arc::new(PgUserStore::new(pool.clone())),
            Some(pool),
        )
    } else {
        warn!("no --dsn configured, users and sessions are in-memory only");
        (
            Arc::new(MemorySessionStore::new()),
            Arc::new(memory_user_store()),
            None,
        )
    };

    let abuse_policy = AbusePolicy {
        free_attempts: args.abuse_free_attempts,
        base_delay: args.abuse_base_delay,
        multiplier: args.abuse_multiplier,
        max_delay: args.abuse_max_delay,
        reset_window: args.abuse_reset_window,
    };

    // Coordinated stores: Redis when configured, in-process otherwise.
    let (limiter, idempotency, permission_cache, negative, abuse, redis): (
        Arc<dyn RateLimiter>,
        Arc<dyn IdempotencyStore>,
        Arc<dyn PermissionCacheStore>,
        Arc<dyn NegativeLookupCache>,
        Arc<dyn AbuseGuard>,
        Option<redis::aio::ConnectionManager>,
    ) = if let Some(redis_url) = &args.redis_url {
        let client = redis::Client::open(redis_url.as_str())
            .context("Invalid redis URL")?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .context("Failed to connect to redis")?;
        (
            Arc::new(RedisRateLimiter::new(conn.clone(), "gardi:ratelimit")),
            Arc::new(RedisIdempotencyStore::new(conn.clone(), "gardi:idem")),
            Arc::new(RedisPermissionCacheStore::new(conn.clone(), "gardi:rbac")),
            Arc::new(RedisNegativeLookupCache::new(conn.clone(), "gardi:neg")),
            Arc::new(RedisAbuseGuard::new(conn.clone(), "gardi:abuse", abuse_policy)),
            Some(conn),
        )
    } else {
        warn!("no --redis-url configured, limiter and caches are per-instance");
        (
            Arc::new(LocalRateLimiter::new()),
            Arc::new(MemoryIdempotencyStore::new()),
            Arc::new(MemoryPermissionCacheStore::new()),
            Arc::new(MemoryNegativeLookupCache::new()),
            Arc::new(MemoryAbuseGuard::new(abuse_policy)),
            None,
        )
    };

    let tokens = Arc::new(TokenService::new(
        codec.clone(),
        session_store.clone(),
        user_store.clone(),
        args.refresh_token_pepper.clone(),
        args.access_ttl,
        args.refresh_ttl,
    ));
    let sessions = SessionService::new(session_store.clone(), args.refresh_token_pepper.clone());
    let resolver = Arc::new(PermissionResolver::new(
        permission_cache,
        user_store.clone(),
        args.permission_cache_ttl,
    ));

    let google_config = match (&args.google_client_id, &args.google_redirect_url) {
        (Some(client_id), Some(redirect_url)) => Some(GoogleOAuthConfig {
            client_id: client_id.clone(),
            client_secret: args
                .google_client_secret
                .clone()
                .unwrap_or_else(|| SecretString::from("")),
            redirect_url: redirect_url.clone(),
        }),
        _ => None,
    };
    // The state nonce key only needs to be stable per deployment; the pepper
    // already is.
    let oauth = GoogleOAuth::new(google_config.clone(), args.refresh_token_pepper.clone());
    let exchanger: Option<Arc<dyn CodeExchanger>> = match google_config {
        Some(config) => {
            let http = reqwest::Client::builder()
                .user_agent(crate::APP_USER_AGENT)
                .timeout(Duration::from_secs(10))
                .build()
                .context("failed to build http client")?;
            Some(Arc::new(HttpCodeExchanger::new(http, config)))
        }
        None => None,
    };
    if oauth.enabled() {
        info!("google login enabled");
    }

    let config = AppConfig::new(args.base_url.clone())
        .with_access_ttl(args.access_ttl)
        .with_refresh_ttl(args.refresh_ttl)
        .with_idempotency_ttl(args.idempotency_ttl)
        .with_idempotency_completion_ttl(args.idempotency_completion_ttl)
        .with_permission_cache_ttl(args.permission_cache_ttl);

    let state = Arc::new(AppState {
        config,
        codec,
        tokens,
        sessions,
        session_store,
        users: user_store,
        resolver,
        abuse,
        negative,
        oauth,
        exchanger,
    });

    let minute = Duration::from_secs(60);
    let deps = ApiDeps {
        state,
        readiness: Arc::new(Readiness { pool, redis }),
        limiter,
        idempotency,
        api_policy: RateLimitPolicy::per_window(args.api_rate_limit_rpm, minute),
        auth_policy: RateLimitPolicy::per_window(args.auth_rate_limit_rpm, minute),
        failure_mode: if args.rate_limit_fail_open {
            FailureMode::FailOpen
        } else {
            FailureMode::FailClosed
        },
        bypass: None,
    };

    api::serve(args.port, deps).await
}
