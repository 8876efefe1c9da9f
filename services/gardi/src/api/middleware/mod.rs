//! Request middleware: credential extraction, CSRF double-submit, rate
//! limiting, idempotency, and permission checks.

mod auth;
mod csrf;
mod idempotency;
mod rate_limit;
mod rbac;

pub use auth::{AuthSource, require_auth};
pub use csrf::require_csrf;
pub use idempotency::{IdempotencyConfig, idempotency_gate};
pub use rate_limit::{
    BypassEvaluator, FailureMode, RateLimitConfig, RateLimitKey, client_ip, rate_limit,
};
pub use rbac::{RequiredPermission, require_permission};
