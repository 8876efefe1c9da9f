//! OpenAPI document for the HTTP surface.
//!
//! Handlers carry `#[utoipa::path]` annotations; this module collects them
//! into one spec. Routes stay wired by hand in `api::router` because most of
//! them carry per-route middleware stacks.

use utoipa::OpenApi;
use utoipa::openapi::{InfoBuilder, License};

use super::handlers::{admin, auth, health, me};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::live,
        health::ready,
        auth::register::register,
        auth::login::login,
        auth::refresh::refresh,
        auth::logout::logout,
        auth::google::google_login,
        auth::google::google_callback,
        me::me,
        me::list_sessions,
        me::revoke_session,
        me::revoke_other_sessions,
        admin::set_user_roles,
        admin::invalidate_rbac_cache,
    ),
    components(schemas(
        auth::types::RegisterRequest,
        auth::types::RegisterResponse,
        auth::types::LoginRequest,
        auth::types::LoginResponse,
        auth::types::RefreshResponse,
        admin::SetRolesRequest,
        health::HealthCheck,
        crate::session::SessionView,
    )),
    tags(
        (name = "health", description = "Liveness and readiness probes"),
        (name = "auth", description = "Login, rotation, and federation"),
        (name = "me", description = "Caller identity and session management"),
        (name = "admin", description = "Role and permission administration"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut spec = ApiDoc::openapi();
    spec.info = cargo_info();
    spec
}

fn cargo_info() -> utoipa::openapi::Info {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();
    info.license = cargo_license();
    info
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}
