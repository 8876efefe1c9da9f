//! Shared application state and configuration.

use std::sync::Arc;
use std::time::Duration;

use auth_token::TokenCodec;

use crate::abuse::AbuseGuard;
use crate::oauth::{CodeExchanger, GoogleOAuth};
use crate::rbac::{NegativeLookupCache, PermissionResolver};
use crate::session::{SessionService, SessionStore};
use crate::token::TokenService;
use crate::users::UserStore;

const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(60);
const DEFAULT_IDEMPOTENCY_COMPLETION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_PERMISSION_CACHE_TTL: Duration = Duration::from_secs(30);
const DEFAULT_OAUTH_STATE_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct AppConfig {
    base_url: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    idempotency_ttl: Duration,
    idempotency_completion_ttl: Duration,
    permission_cache_ttl: Duration,
    oauth_state_ttl: Duration,
}

impl AppConfig {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            idempotency_ttl: DEFAULT_IDEMPOTENCY_TTL,
            idempotency_completion_ttl: DEFAULT_IDEMPOTENCY_COMPLETION_TTL,
            permission_cache_ttl: DEFAULT_PERMISSION_CACHE_TTL,
            oauth_state_ttl: DEFAULT_OAUTH_STATE_TTL,
        }
    }

    #[must_use]
    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_idempotency_completion_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_completion_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_permission_cache_ttl(mut self, ttl: Duration) -> Self {
        self.permission_cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_oauth_state_ttl(mut self, ttl: Duration) -> Self {
        self.oauth_state_ttl = ttl;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Cookies are only marked `Secure` when the service is fronted by TLS.
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    #[must_use]
    pub fn idempotency_ttl(&self) -> Duration {
        self.idempotency_ttl
    }

    #[must_use]
    pub fn idempotency_completion_ttl(&self) -> Duration {
        self.idempotency_completion_ttl
    }

    #[must_use]
    pub fn permission_cache_ttl(&self) -> Duration {
        self.permission_cache_ttl
    }

    #[must_use]
    pub fn oauth_state_ttl(&self) -> Duration {
        self.oauth_state_ttl
    }
}

/// Everything the handlers need, injected as one `Extension`.
pub struct AppState {
    pub config: AppConfig,
    pub codec: Arc<TokenCodec>,
    pub tokens: Arc<TokenService>,
    pub sessions: SessionService,
    pub session_store: Arc<dyn SessionStore>,
    pub users: Arc<dyn UserStore>,
    pub resolver: Arc<PermissionResolver>,
    pub abuse: Arc<dyn AbuseGuard>,
    pub negative: Arc<dyn NegativeLookupCache>,
    pub oauth: GoogleOAuth,
    pub exchanger: Option<Arc<dyn CodeExchanger>>,
}
