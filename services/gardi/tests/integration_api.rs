//! End-to-end tests over the assembled router with in-process store
//! variants: auth flows, CSRF, rate limiting, idempotency, and permission
//! invalidation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{
        Request, StatusCode,
        header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
    },
    middleware::from_fn_with_state,
    routing::post,
};
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;

use auth_token::TokenCodec;
use gardi::abuse::{AbusePolicy, MemoryAbuseGuard};
use gardi::api::middleware::{FailureMode, IdempotencyConfig, idempotency_gate};
use gardi::api::{ApiDeps, AppConfig, AppState, Readiness, router};
use gardi::idempotency::MemoryIdempotencyStore;
use gardi::oauth::GoogleOAuth;
use gardi::ratelimit::{LocalRateLimiter, NoopRateLimiter, RateLimitPolicy, RateLimiter};
use gardi::rbac::{MemoryNegativeLookupCache, MemoryPermissionCacheStore, PermissionResolver};
use gardi::session::{MemorySessionStore, SessionService, SessionStore};
use gardi::token::TokenService;
use gardi::users::{MemoryUserStore, NewUser, UserStore, hash_password};

const ACCESS_KEY: &[u8] = b"integration-access-key-000000001";
const REFRESH_KEY: &[u8] = b"integration-refresh-key-00000001";
const PASSWORD: &str = "correct-horse-battery-staple";

struct TestApp {
    app: Router,
    state: Arc<AppState>,
    users: Arc<MemoryUserStore>,
}

fn build_app(limiter: Arc<dyn RateLimiter>, auth_policy: RateLimitPolicy) -> TestApp {
    let codec = Arc::new(TokenCodec::new(
        "http://localhost:8080",
        "gardi",
        ACCESS_KEY,
        REFRESH_KEY,
    ));
    let session_store: Arc<MemorySessionStore> = Arc::new(MemorySessionStore::new());
    let users = Arc::new(MemoryUserStore::new().with_role("user", &[]).with_role(
        "admin",
        &["users:read", "users:write", "roles:read", "roles:write"],
    ));
    let pepper = SecretString::from("integration-test-pepper");
    let tokens = Arc::new(TokenService::new(
        codec.clone(),
        session_store.clone() as Arc<dyn SessionStore>,
        users.clone() as Arc<dyn UserStore>,
        pepper.clone(),
        Duration::from_secs(900),
        Duration::from_secs(3600),
    ));
    let resolver = Arc::new(PermissionResolver::new(
        Arc::new(MemoryPermissionCacheStore::new()),
        users.clone() as Arc<dyn UserStore>,
        Duration::from_secs(300),
    ));
    let state = Arc::new(AppState {
        config: AppConfig::new("http://localhost:8080".to_string()),
        codec,
        tokens,
        sessions: SessionService::new(session_store.clone() as Arc<dyn SessionStore>, pepper.clone()),
        session_store: session_store as Arc<dyn SessionStore>,
        users: users.clone() as Arc<dyn UserStore>,
        resolver,
        abuse: Arc::new(MemoryAbuseGuard::new(AbusePolicy {
            free_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            reset_window: Duration::from_secs(60),
        })),
        negative: Arc::new(MemoryNegativeLookupCache::new()),
        oauth: GoogleOAuth::new(None, pepper),
        exchanger: None,
    });

    let deps = ApiDeps {
        state: state.clone(),
        readiness: Arc::new(Readiness::default()),
        limiter,
        idempotency: Arc::new(MemoryIdempotencyStore::new()),
        api_policy: RateLimitPolicy::per_window(10_000, Duration::from_secs(60)),
        auth_policy,
        failure_mode: FailureMode::FailClosed,
        bypass: None,
    };
    TestApp {
        app: router(&deps),
        state,
        users,
    }
}

fn unlimited_app() -> TestApp {
    build_app(
        Arc::new(NoopRateLimiter),
        RateLimitPolicy::per_window(10_000, Duration::from_secs(60)),
    )
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn cookie_from(response: &axum::response::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookie| {
            let (pair, _) = cookie.split_once(';')?;
            let (key, value) = pair.split_once('=')?;
            (key == name && !value.is_empty()).then(|| value.to_string())
        })
}

async fn register_and_login(app: &TestApp, email: &str) -> (String, String, String) {
    let response = app
        .app
        .clone()
        .oneshot(post_json(
            "/api/v1/auth/local/register",
            json!({ "email": email, "name": "Test", "password": PASSWORD }),
        ))
        .await
        .expect("register");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .app
        .clone()
        .oneshot(post_json(
            "/api/v1/auth/local/login",
            json!({ "email": email, "password": PASSWORD }),
        ))
        .await
        .expect("login");
    assert_eq!(response.status(), StatusCode::OK);

    let access = cookie_from(&response, "access_token").expect("access cookie");
    let refresh = cookie_from(&response, "refresh_token").expect("refresh cookie");
    let csrf = cookie_from(&response, "csrf_token").expect("csrf cookie");
    (access, refresh, csrf)
}

#[tokio::test]
async fn health_live_always_answers() {
    let app = unlimited_app();
    let response = app
        .app
        .oneshot(
            Request::builder()
                .uri("/health/live")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
    assert!(body["meta"]["request_id"].is_string());
}

#[tokio::test]
async fn register_login_me_flow() {
    let app = unlimited_app();
    let (access, _, _) = register_and_login(&app, "alice@example.com").await;

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/me")
                .header(COOKIE, format!("access_token={access}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["roles"][0], "user");
}

#[tokio::test]
async fn missing_and_invalid_tokens_are_unauthorized() {
    let app = unlimited_app();

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    assert_eq!(body["error"]["message"], "missing access token");

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/me")
                .header("authorization", "Bearer not-a-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["message"], "invalid access token");
}

#[tokio::test]
async fn wrong_password_is_uniform_unauthorized() {
    let app = unlimited_app();
    register_and_login(&app, "bob@example.com").await;

    for email in ["bob@example.com", "ghost@example.com"] {
        let response = app
            .app
            .clone()
            .oneshot(post_json(
                "/api/v1/auth/local/login",
                json!({ "email": email, "password": "wrong-password-wrong" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "invalid credentials");
    }
}

#[tokio::test]
async fn repeated_failures_trigger_cooldown() {
    let app = unlimited_app();
    register_and_login(&app, "carol@example.com").await;

    // Three free attempts, then the guard starts pushing back.
    let mut last_status = StatusCode::OK;
    for _ in 0..5 {
        let response = app
            .app
            .clone()
            .oneshot(post_json(
                "/api/v1/auth/local/login",
                json!({ "email": "carol@example.com", "password": "wrong-password-wrong" }),
            ))
            .await
            .unwrap();
        last_status = response.status();
    }
    assert_eq!(last_status, StatusCode::TOO_MANY_REQUESTS);

    let response = app
        .app
        .clone()
        .oneshot(post_json(
            "/api/v1/auth/local/login",
            json!({ "email": "carol@example.com", "password": PASSWORD }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "RATE_LIMITED");
}

#[tokio::test]
async fn refresh_rotates_and_reuse_is_rejected() {
    let app = unlimited_app();
    let (_, refresh, csrf) = register_and_login(&app, "dave@example.com").await;

    let rotate = |refresh: String, csrf: String| {
        let app = app.app.clone();
        async move {
            app.oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/auth/refresh")
                    .header(
                        COOKIE,
                        format!("refresh_token={refresh}; csrf_token={csrf}"),
                    )
                    .header("x-csrf-token", csrf.clone())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
        }
    };

    let response = rotate(refresh.clone(), csrf.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let new_refresh = cookie_from(&response, "refresh_token").expect("rotated refresh cookie");
    let new_csrf = cookie_from(&response, "csrf_token").expect("rotated csrf cookie");
    assert_ne!(new_refresh, refresh);

    // Presenting the spent token again fails and kills the family.
    let response = rotate(refresh.clone(), csrf.clone()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["message"], "invalid refresh token");

    // The fresh token died with its family.
    let response = rotate(new_refresh, new_csrf).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn csrf_double_submit_is_enforced() {
    let app = unlimited_app();
    let (_, refresh, csrf) = register_and_login(&app, "erin@example.com").await;

    // Missing header.
    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/refresh")
                .header(COOKIE, format!("refresh_token={refresh}; csrf_token={csrf}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    // Mismatched header.
    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/refresh")
                .header(COOKIE, format!("refresh_token={refresh}; csrf_token={csrf}"))
                .header("x-csrf-token", "some-other-value")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Matching pair proceeds into the handler.
    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/refresh")
                .header(COOKIE, format!("refresh_token={refresh}; csrf_token={csrf}"))
                .header("x-csrf-token", csrf.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn logout_revokes_and_clears_cookies() {
    let app = unlimited_app();
    let (access, refresh, csrf) = register_and_login(&app, "frank@example.com").await;

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/logout")
                .header(
                    COOKIE,
                    format!("access_token={access}; refresh_token={refresh}; csrf_token={csrf}"),
                )
                .header("x-csrf-token", csrf.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cleared: Vec<_> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    assert!(cleared.iter().any(|cookie| cookie.contains("Max-Age=0")));

    // The refresh token is dead now.
    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/refresh")
                .header(COOKIE, format!("refresh_token={refresh}; csrf_token={csrf}"))
                .header("x-csrf-token", csrf.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_listing_and_selective_revocation() {
    let app = unlimited_app();
    let (access_a, _, _) = register_and_login(&app, "grace@example.com").await;

    // Second login from "another device".
    let response = app
        .app
        .clone()
        .oneshot(post_json(
            "/api/v1/auth/local/login",
            json!({ "email": "grace@example.com", "password": PASSWORD }),
        ))
        .await
        .unwrap();
    let access_b = cookie_from(&response, "access_token").unwrap();
    let refresh_b = cookie_from(&response, "refresh_token").unwrap();
    let csrf_b = cookie_from(&response, "csrf_token").unwrap();

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/me/sessions")
                .header(
                    COOKIE,
                    format!("access_token={access_b}; refresh_token={refresh_b}"),
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let sessions = body["data"].as_array().expect("session list");
    assert_eq!(sessions.len(), 2);
    let current: Vec<_> = sessions
        .iter()
        .filter(|session| session["is_current"] == true)
        .collect();
    assert_eq!(current.len(), 1);

    // Revoke the other session.
    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/me/sessions/revoke-others")
                .header(
                    COOKIE,
                    format!(
                        "access_token={access_b}; refresh_token={refresh_b}; csrf_token={csrf_b}"
                    ),
                )
                .header("x-csrf-token", csrf_b.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["revoked"], 1);

    // The first device's access token still parses, but its session is gone
    // from the listing.
    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/me/sessions")
                .header(COOKIE, format!("access_token={access_a}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn rate_limited_auth_endpoint_emits_headers() {
    let app = build_app(
        Arc::new(LocalRateLimiter::new()),
        RateLimitPolicy::per_window(2, Duration::from_secs(60)),
    );

    let attempt = || {
        app.app.clone().oneshot(post_json(
            "/api/v1/auth/local/login",
            json!({ "email": "nobody@example.com", "password": "wrong-password-wrong" }),
        ))
    };

    let response = attempt().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get("x-ratelimit-limit").unwrap(),
        "2"
    );
    assert_eq!(
        response.headers().get("x-ratelimit-remaining").unwrap(),
        "1"
    );
    assert!(response.headers().contains_key("x-ratelimit-reset"));

    let response = attempt().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = attempt().await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .expect("retry-after header");
    assert!(retry_after >= 1);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "RATE_LIMITED");
}

#[tokio::test]
async fn idempotent_register_replays_identically() {
    let app = unlimited_app();
    let body = json!({ "email": "henry@example.com", "name": "Henry", "password": PASSWORD });

    let request = |body: Value| {
        Request::builder()
            .method("POST")
            .uri("/api/v1/auth/local/register")
            .header(CONTENT_TYPE, "application/json")
            .header("idempotency-key", "reg-001")
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let response = app.app.clone().oneshot(request(body.clone())).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().get("x-idempotency-replayed").is_none());
    let original = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    // Same key, same payload: replayed byte for byte, no second execution.
    let response = app.app.clone().oneshot(request(body.clone())).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response.headers().get("x-idempotency-replayed").unwrap(),
        "true"
    );
    let replayed = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(original, replayed);

    // Same key, different payload: conflict.
    let response = app
        .app
        .clone()
        .oneshot(request(json!({
            "email": "other@example.com", "name": "Other", "password": PASSWORD
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "IDEMPOTENCY_CONFLICT");
}

#[tokio::test]
async fn concurrent_identical_requests_execute_once() {
    // A gated stub handler stands in for a slow registration, mirroring the
    // at-most-once contract at the middleware level.
    let (release_tx, release_rx) = tokio::sync::watch::channel(false);
    let executions = Arc::new(AtomicU64::new(0));

    let config = IdempotencyConfig {
        store: Arc::new(MemoryIdempotencyStore::new()),
        scope: "test.register",
        ttl: Duration::from_secs(60),
        completion_ttl: Duration::from_secs(300),
    };
    let handler_executions = executions.clone();
    let app = Router::new()
        .route(
            "/register",
            post(move || {
                let executions = handler_executions.clone();
                let mut release = release_rx.clone();
                async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    while !*release.borrow() {
                        if release.changed().await.is_err() {
                            break;
                        }
                    }
                    (
                        StatusCode::CREATED,
                        [(CONTENT_TYPE, "application/json")],
                        r#"{"status":"created","id":"user-123"}"#,
                    )
                }
            }),
        )
        .layer(from_fn_with_state(config, idempotency_gate));

    let request = || {
        Request::builder()
            .method("POST")
            .uri("/register")
            .header(CONTENT_TYPE, "application/json")
            .header("idempotency-key", "race-001")
            .body(Body::from(r#"{"email":"race@example.com"}"#))
            .unwrap()
    };

    let mut handles = Vec::new();
    for _ in 0..12 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            app.oneshot(request()).await.unwrap()
        }));
    }

    // Wait until the winner sits in the handler and every loser has already
    // been turned away, then let the winner finish.
    while executions.load(Ordering::SeqCst) == 0
        || handles.iter().filter(|handle| handle.is_finished()).count() < 11
    {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    release_tx.send(true).unwrap();

    let mut created = 0;
    let mut in_progress = 0;
    for handle in handles {
        let response = handle.await.unwrap();
        match response.status() {
            StatusCode::CREATED => {
                assert!(response.headers().get("x-idempotency-replayed").is_none());
                created += 1;
            }
            StatusCode::CONFLICT => {
                let body = body_json(response).await;
                assert_eq!(
                    body["error"]["message"],
                    "request with this idempotency key is in progress"
                );
                in_progress += 1;
            }
            status => panic!("unexpected status: {status}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(in_progress, 11);
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    // After completion the record replays.
    let response = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response.headers().get("x-idempotency-replayed").unwrap(),
        "true"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], br#"{"status":"created","id":"user-123"}"#);
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn role_change_denies_existing_access_token() {
    let app = unlimited_app();

    // An operator and a target user who starts with admin rights.
    let operator = app
        .users
        .create(NewUser {
            email: "operator@example.com".to_string(),
            name: "Operator".to_string(),
            password_hash: hash_password(PASSWORD).unwrap(),
            roles: vec!["admin".to_string()],
        })
        .await
        .unwrap();
    let target = app
        .users
        .create(NewUser {
            email: "target@example.com".to_string(),
            name: "Target".to_string(),
            password_hash: hash_password(PASSWORD).unwrap(),
            roles: vec!["admin".to_string()],
        })
        .await
        .unwrap();

    let (_, operator_perms) = app.users.get_with_permissions(operator.id).await.unwrap();
    let operator_pair = app
        .state
        .tokens
        .issue(&operator, operator_perms, "test", "127.0.0.1")
        .await
        .unwrap();
    let (_, target_perms) = app.users.get_with_permissions(target.id).await.unwrap();
    let target_pair = app
        .state
        .tokens
        .issue(&target, target_perms, "test", "127.0.0.1")
        .await
        .unwrap();

    let invalidate_as = |access: String| {
        let app = app.app.clone();
        async move {
            app.oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/admin/rbac/invalidate")
                    .header("authorization", format!("Bearer {access}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
        }
    };

    // Target can use the admin surface, and the result is now cached.
    let response = invalidate_as(target_pair.access.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Operator demotes the target.
    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(format!("/api/v1/admin/users/{}/roles", target.id))
                .header("authorization", format!("Bearer {}", operator_pair.access))
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "roles": ["user"] }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The target's unchanged access token is denied on the next request;
    // the epoch bump made the cached permissions unreachable.
    let response = invalidate_as(target_pair.access.clone()).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "FORBIDDEN");
    assert_eq!(body["error"]["details"]["required"], "roles:write");
}

#[tokio::test]
async fn admin_surface_requires_authentication() {
    let app = unlimited_app();
    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/admin/rbac/invalidate")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn google_routes_disabled_without_config() {
    let app = unlimited_app();
    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/auth/google/login")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "NOT_ENABLED");
}
