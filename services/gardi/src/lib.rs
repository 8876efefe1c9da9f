//! # Gardi (Authentication & Authorization Authority)
//!
//! `gardi` issues and rotates access/refresh token pairs, enforces
//! role-based permissions, and guards its own edge against duplicate and
//! abusive requests.
//!
//! ## Session Lineage
//!
//! Every refresh token ever issued has its own session row. Rotation revokes
//! the old row and inserts a successor sharing the login's `family_id`, so a
//! refresh token presented after it was already spent is treated as captured
//! and the whole family is revoked.
//!
//! ## Coordinated Edge Controls
//!
//! - **Rate limiting** combines a sustained window with a token bucket; the
//!   distributed variant decides atomically in Redis so a fleet shares one
//!   budget per key.
//! - **Idempotency** gives unsafe endpoints at-most-once semantics keyed by
//!   the `Idempotency-Key` header, with byte-faithful replay of the recorded
//!   response.
//! - **Permissions** resolve per request through an epoch-keyed cache;
//!   invalidation is a counter bump, never a key scan.
//! - **Abuse guarding** applies exponential cooldowns per
//!   (scope, identity, ip) before any credential is checked.
//!
//! Every backend-coordinated store also ships an in-process variant, so the
//! service runs complete (single-node) without Postgres or Redis.

pub mod abuse;
pub mod api;
pub mod cli;
pub mod idempotency;
pub mod oauth;
pub mod ratelimit;
pub mod rbac;
pub mod session;
pub mod token;
pub mod users;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
