//! Container helpers for integration tests: a Postgres and a Redis image
//! behind the same readiness gate, so tests skip cleanly on machines without
//! a container runtime.

pub mod postgres;
pub mod redis;
pub mod runtime;

use uuid::Uuid;

pub(crate) fn unique_name(prefix: &str) -> String {
    format!("gardi-test-{prefix}-{}", Uuid::new_v4().simple())
}
