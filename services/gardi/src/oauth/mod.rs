//! Google federated login.
//!
//! The service owns the state nonce and the session issuance; the provider
//! round trip itself (code for token, token for profile) sits behind
//! [`CodeExchanger`] so handlers never talk HTTP to Google directly and
//! tests can swap the seam out.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use url::Url;

const AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// What the provider tells us about the authenticated account.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleProfile {
    #[serde(rename = "sub")]
    pub subject: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[async_trait]
pub trait CodeExchanger: Send + Sync {
    /// Exchange an authorization code for the account profile.
    ///
    /// # Errors
    /// Returns an error when the provider round trip fails.
    async fn exchange(&self, code: &str) -> Result<GoogleProfile>;
}

#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_url: String,
}

/// Builds authorize URLs and signs/verifies the `oauth_state` nonce.
pub struct GoogleOAuth {
    config: Option<GoogleOAuthConfig>,
    state_key: SecretString,
}

impl GoogleOAuth {
    #[must_use]
    pub fn new(config: Option<GoogleOAuthConfig>, state_key: SecretString) -> Self {
        Self { config, state_key }
    }

    /// Google login is opt-in; without a client id the routes answer
    /// `NOT_ENABLED`.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config
            .as_ref()
            .is_some_and(|config| !config.client_id.is_empty())
    }

    /// Mint a signed state nonce: `nonce.expiry.signature`, all url-safe.
    ///
    /// # Errors
    /// Returns an error if the RNG fails.
    pub fn sign_state(&self, now_unix_seconds: i64, ttl_seconds: i64) -> Result<String> {
        let mut nonce = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut nonce)
            .context("failed to generate oauth state nonce")?;
        let nonce = URL_SAFE_NO_PAD.encode(nonce);
        let expires = now_unix_seconds + ttl_seconds;
        let payload = format!("{nonce}.{expires}");
        let signature = self.state_signature(&payload);
        Ok(format!("{payload}.{signature}"))
    }

    /// Check signature and expiry of a presented state value.
    #[must_use]
    pub fn verify_state(&self, state: &str, now_unix_seconds: i64) -> bool {
        let mut parts = state.rsplitn(2, '.');
        let (Some(signature), Some(payload)) = (parts.next(), parts.next()) else {
            return false;
        };
        if self.state_signature(payload) != signature {
            return false;
        }
        let Some((_, expires)) = payload.rsplit_once('.') else {
            return false;
        };
        expires
            .parse::<i64>()
            .is_ok_and(|expires| expires > now_unix_seconds)
    }

    /// # Errors
    /// Returns an error when Google login is not configured.
    pub fn authorize_url(&self, state: &str) -> Result<String> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| anyhow!("google oauth is not configured"))?;
        let mut url = Url::parse(AUTHORIZE_ENDPOINT).context("invalid authorize endpoint")?;
        url.query_pairs_mut()
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", "openid email profile")
            .append_pair("state", state);
        Ok(url.into())
    }

    fn state_signature(&self, payload: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.state_key.expose_secret().as_bytes())
            .expect("hmac accepts any key length");
        mac.update(payload.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

/// Production exchanger using the real provider endpoints.
pub struct HttpCodeExchanger {
    http: reqwest::Client,
    config: GoogleOAuthConfig,
}

impl HttpCodeExchanger {
    #[must_use]
    pub fn new(http: reqwest::Client, config: GoogleOAuthConfig) -> Self {
        Self { http, config }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[async_trait]
impl CodeExchanger for HttpCodeExchanger {
    async fn exchange(&self, code: &str) -> Result<GoogleProfile> {
        let response = self
            .http
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret()),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .context("failed to call token endpoint")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "token endpoint returned status {}",
                response.status()
            ));
        }
        let token: TokenResponse = response
            .json()
            .await
            .context("failed to decode token response")?;

        let response = self
            .http
            .get(USERINFO_ENDPOINT)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .context("failed to call userinfo endpoint")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "userinfo endpoint returned status {}",
                response.status()
            ));
        }
        response
            .json()
            .await
            .context("failed to decode userinfo response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn oauth() -> GoogleOAuth {
        GoogleOAuth::new(
            Some(GoogleOAuthConfig {
                client_id: "client-123".to_string(),
                client_secret: SecretString::from("secret"),
                redirect_url: "https://gardi.test/api/v1/auth/google/callback".to_string(),
            }),
            SecretString::from("state-signing-key"),
        )
    }

    #[test]
    fn state_round_trip() -> Result<()> {
        let oauth = oauth();
        let state = oauth.sign_state(NOW, 600)?;
        assert!(oauth.verify_state(&state, NOW));
        assert!(oauth.verify_state(&state, NOW + 599));
        assert!(!oauth.verify_state(&state, NOW + 600));
        Ok(())
    }

    #[test]
    fn tampered_state_is_rejected() -> Result<()> {
        let oauth = oauth();
        let state = oauth.sign_state(NOW, 600)?;
        let mut tampered = state.clone();
        tampered.insert(0, 'x');
        assert!(!oauth.verify_state(&tampered, NOW));
        assert!(!oauth.verify_state("", NOW));
        assert!(!oauth.verify_state("a.b", NOW));
        Ok(())
    }

    #[test]
    fn state_from_other_key_is_rejected() -> Result<()> {
        let other = GoogleOAuth::new(None, SecretString::from("other-key"));
        let state = other.sign_state(NOW, 600)?;
        assert!(!oauth().verify_state(&state, NOW));
        Ok(())
    }

    #[test]
    fn authorize_url_carries_state_and_client() -> Result<()> {
        let oauth = oauth();
        let url = oauth.authorize_url("the-state")?;
        let parsed = Url::parse(&url)?;
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(pairs.contains(&("client_id".to_string(), "client-123".to_string())));
        assert!(pairs.contains(&("state".to_string(), "the-state".to_string())));
        assert!(pairs.contains(&("response_type".to_string(), "code".to_string())));
        Ok(())
    }

    #[test]
    fn enabled_requires_client_id() {
        assert!(oauth().enabled());
        let disabled = GoogleOAuth::new(None, SecretString::from("key"));
        assert!(!disabled.enabled());
    }
}
