//! Integration tests for the Redis-backed stores: concurrent limiter
//! fairness, idempotency state transitions, and abuse guard behavior.
//! Skipped when no container runtime is available.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use redis::AsyncCommands;
use test_support::{redis::RedisContainer, runtime};

use gardi::abuse::{AbuseGuard, AbusePolicy, AbuseScope, RedisAbuseGuard};
use gardi::idempotency::{
    BeginOutcome, CachedResponse, IdempotencyStore, RedisIdempotencyStore,
};
use gardi::ratelimit::{RateLimitPolicy, RateLimiter, RedisRateLimiter};

#[tokio::test]
async fn concurrent_burst_honors_sustained_limit() -> Result<()> {
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }

    let container = RedisContainer::start().await?;
    let conn = container.connection().await?;
    let limiter = Arc::new(RedisRateLimiter::new(conn, "itest:rl"));
    let policy = RateLimitPolicy {
        sustained_limit: 20,
        sustained_window: Duration::from_secs(600),
        burst_capacity: 20,
        burst_refill_per_sec: 20.0 / 600.0,
    };

    let allowed = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::new();
    for _ in 0..100 {
        let limiter = limiter.clone();
        let allowed = allowed.clone();
        handles.push(tokio::spawn(async move {
            let decision = limiter.allow("same-actor", policy).await?;
            if decision.allowed {
                allowed.fetch_add(1, Ordering::SeqCst);
            }
            anyhow::Ok(())
        }));
    }
    for handle in handles {
        handle.await??;
    }

    assert_eq!(allowed.load(Ordering::SeqCst), 20);

    // The very next request is still inside the window.
    let decision = limiter.allow("same-actor", policy).await?;
    assert!(!decision.allowed);
    assert!(decision.retry_after > Duration::ZERO);
    assert_eq!(decision.remaining, 0);

    // Other keys are unaffected.
    let decision = limiter.allow("other-actor", policy).await?;
    assert!(decision.allowed);
    Ok(())
}

#[tokio::test]
async fn idempotency_state_transitions_and_ttl_refresh() -> Result<()> {
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }

    let container = RedisContainer::start().await?;
    let conn = container.connection().await?;
    let store = RedisIdempotencyStore::new(conn.clone(), "itest:idem");

    let scope = "register";
    let key = "idem-key";
    let fingerprint = "fp-1";
    let ttl = Duration::from_secs(5);

    let outcome = store.begin(scope, key, fingerprint, ttl).await?;
    assert_eq!(outcome, BeginOutcome::New);

    let outcome = store.begin(scope, key, fingerprint, ttl).await?;
    assert_eq!(outcome, BeginOutcome::InProgress);

    let outcome = store.begin(scope, key, "fp-conflict", ttl).await?;
    assert_eq!(outcome, BeginOutcome::Conflict);

    let redis_key = format!("itest:idem:{scope}:{key}");
    let mut raw = conn.clone();
    let initial_ttl: i64 = raw.pttl(&redis_key).await?;
    assert!(initial_ttl > 0);

    let response = CachedResponse {
        status: 201,
        content_type: "application/json".to_string(),
        body: br#"{"ok":true}"#.to_vec(),
    };
    store
        .complete(scope, key, fingerprint, response.clone(), Duration::from_secs(30))
        .await?;

    let post_complete_ttl: i64 = raw.pttl(&redis_key).await?;
    assert!(
        post_complete_ttl > initial_ttl,
        "expected ttl refresh on complete, before={initial_ttl} after={post_complete_ttl}"
    );

    let outcome = store.begin(scope, key, fingerprint, ttl).await?;
    assert_eq!(outcome, BeginOutcome::Replay(response));
    Ok(())
}

#[tokio::test]
async fn idempotency_malformed_replay_fails_closed() -> Result<()> {
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }

    let container = RedisContainer::start().await?;
    let conn = container.connection().await?;
    let store = RedisIdempotencyStore::new(conn.clone(), "itest:idem");
    let redis_key = "itest:idem:register:idem-malformed";
    let mut raw = conn.clone();

    // Unparseable status.
    raw.hset_multiple::<_, _, _, ()>(
        redis_key,
        &[
            ("fingerprint", "fp-1"),
            ("status", "completed"),
            ("response_status", "NaN"),
            ("content_type", "application/json"),
            ("response_body", "eyJvayI6dHJ1ZX0="),
        ],
    )
    .await?;
    let result = store
        .begin("register", "idem-malformed", "fp-1", Duration::from_secs(1))
        .await;
    assert!(result.is_err());

    // Unparseable body.
    raw.hset::<_, _, _, ()>(redis_key, "response_status", "200")
        .await?;
    raw.hset::<_, _, _, ()>(redis_key, "response_body", "!!!not-base64!!!")
        .await?;
    let result = store
        .begin("register", "idem-malformed", "fp-1", Duration::from_secs(1))
        .await;
    assert!(result.is_err());
    Ok(())
}

#[tokio::test]
async fn abuse_guard_cooldown_growth_reset_and_isolation() -> Result<()> {
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }

    let container = RedisContainer::start().await?;
    let conn = container.connection().await?;
    let policy = AbusePolicy {
        free_attempts: 1,
        base_delay: Duration::from_millis(200),
        multiplier: 2.0,
        max_delay: Duration::from_secs(2),
        reset_window: Duration::from_secs(5),
    };
    let guard = RedisAbuseGuard::new(conn, "itest:abuse", policy);

    let first = guard
        .register_failure(AbuseScope::Login, "u1@example.com", "10.0.0.1")
        .await?;
    assert_eq!(first, Duration::ZERO);

    let second = guard
        .register_failure(AbuseScope::Login, "u1@example.com", "10.0.0.1")
        .await?;
    assert!(second > Duration::ZERO);

    let third = guard
        .register_failure(AbuseScope::Login, "u1@example.com", "10.0.0.1")
        .await?;
    assert!(third >= second);

    let cooldown = guard
        .check(AbuseScope::Login, "u1@example.com", "10.0.0.1")
        .await?;
    assert!(cooldown > Duration::ZERO);

    // Different identity/ip pairs are untouched.
    let other = guard
        .check(AbuseScope::Login, "u2@example.com", "10.0.0.2")
        .await?;
    assert_eq!(other, Duration::ZERO);

    guard
        .reset(AbuseScope::Login, "u1@example.com", "10.0.0.1")
        .await?;
    let cleared = guard
        .check(AbuseScope::Login, "u1@example.com", "10.0.0.1")
        .await?;
    assert_eq!(cleared, Duration::ZERO);
    Ok(())
}

#[tokio::test]
async fn abuse_guard_malformed_state_fails_closed() -> Result<()> {
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }

    let container = RedisContainer::start().await?;
    let conn = container.connection().await?;
    let guard = RedisAbuseGuard::new(conn.clone(), "itest:abuse", AbusePolicy::default());

    let mut raw = conn.clone();
    raw.hset_multiple::<_, _, _, ()>(
        "itest:abuse:forgot:broken@example.com:",
        &[("last_failure_ms", "bad"), ("cooldown_until_ms", "still-bad")],
    )
    .await?;

    let result = guard
        .check(AbuseScope::Forgot, "broken@example.com", "")
        .await;
    assert!(result.is_err());
    Ok(())
}

#[tokio::test]
async fn permission_cache_epochs_invalidate_without_deletion() -> Result<()> {
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }

    use gardi::rbac::{PermissionCacheStore, RedisPermissionCacheStore};
    use uuid::Uuid;

    let container = RedisContainer::start().await?;
    let conn = container.connection().await?;
    let store = RedisPermissionCacheStore::new(conn.clone(), "itest:rbac");
    let ttl = Duration::from_secs(60);

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let perms = vec!["users:read".to_string()];
    store.set(alice, "jti-a", &perms, ttl).await?;
    store.set(bob, "jti-b", &perms, ttl).await?;

    assert_eq!(store.get(alice, "jti-a").await?, Some(perms.clone()));

    store.invalidate_user(alice).await?;
    assert_eq!(store.get(alice, "jti-a").await?, None);
    assert_eq!(store.get(bob, "jti-b").await?, Some(perms.clone()));

    store.invalidate_all().await?;
    assert_eq!(store.get(bob, "jti-b").await?, None);

    // Malformed epoch state is an error, not epoch zero.
    let mut raw = conn.clone();
    raw.set::<_, _, ()>("itest:rbac:epoch:global", "not-a-number")
        .await?;
    assert!(store.get(bob, "jti-b").await.is_err());
    Ok(())
}
