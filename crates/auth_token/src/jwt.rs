use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Header {
    alg: String,
    typ: String,
}

impl Header {
    fn hs256() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Claim shape shared by access and refresh tokens.
///
/// `roles` and `permissions` are only populated on access tokens and are
/// omitted from the wire form when empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub token_type: TokenType,
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

/// Signs and verifies access/refresh tokens with independent symmetric keys.
pub struct TokenCodec {
    issuer: String,
    audience: String,
    access_key: Vec<u8>,
    refresh_key: Vec<u8>,
}

impl TokenCodec {
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        access_key: impl Into<Vec<u8>>,
        refresh_key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            access_key: access_key.into(),
            refresh_key: refresh_key.into(),
        }
    }

    /// Sign an access token bound to the given `jti`.
    ///
    /// Rotation passes the refresh token's `jti` here so the pair shares one
    /// lineage identifier.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded.
    pub fn sign_access(
        &self,
        sub: &str,
        roles: Vec<String>,
        permissions: Vec<String>,
        jti: &str,
        ttl_seconds: i64,
        now_unix_seconds: i64,
    ) -> Result<String, Error> {
        let claims = Claims {
            token_type: TokenType::Access,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: sub.to_string(),
            exp: now_unix_seconds + ttl_seconds,
            iat: now_unix_seconds,
            jti: jti.to_string(),
            roles,
            permissions,
        };
        sign(&self.access_key, &claims)
    }

    /// Sign a refresh token with a fresh `jti` chosen by the caller.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded.
    pub fn sign_refresh(
        &self,
        sub: &str,
        jti: &str,
        ttl_seconds: i64,
        now_unix_seconds: i64,
    ) -> Result<String, Error> {
        let claims = Claims {
            token_type: TokenType::Refresh,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: sub.to_string(),
            exp: now_unix_seconds + ttl_seconds,
            iat: now_unix_seconds,
            jti: jti.to_string(),
            roles: Vec::new(),
            permissions: Vec::new(),
        };
        sign(&self.refresh_key, &claims)
    }

    /// Verify an access token and return its claims.
    ///
    /// # Errors
    /// Returns an error if the token is malformed, carries an unexpected
    /// algorithm or type, fails signature verification, is expired, or does
    /// not match the configured issuer/audience.
    pub fn parse_access(&self, raw: &str, now_unix_seconds: i64) -> Result<Claims, Error> {
        self.parse(raw, &self.access_key, TokenType::Access, now_unix_seconds)
    }

    /// Verify a refresh token and return its claims.
    ///
    /// # Errors
    /// Same failure modes as [`Self::parse_access`].
    pub fn parse_refresh(&self, raw: &str, now_unix_seconds: i64) -> Result<Claims, Error> {
        self.parse(raw, &self.refresh_key, TokenType::Refresh, now_unix_seconds)
    }

    fn parse(
        &self,
        raw: &str,
        key: &[u8],
        expected_type: TokenType,
        now_unix_seconds: i64,
    ) -> Result<Claims, Error> {
        let mut parts = raw.split('.');
        let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
        let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
        let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
        if parts.next().is_some() {
            return Err(Error::TokenFormat);
        }

        let header: Header = b64d_json(header_b64)?;
        if header.alg != "HS256" {
            return Err(Error::UnsupportedAlg(header.alg));
        }

        let signing_input = format!("{header_b64}.{claims_b64}");
        let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
        let mut mac = HmacSha256::new_from_slice(key).map_err(|_| Error::InvalidSignature)?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Error::InvalidSignature)?;

        let claims: Claims = b64d_json(claims_b64)?;
        if claims.iss != self.issuer {
            return Err(Error::InvalidIssuer);
        }
        if claims.aud != self.audience {
            return Err(Error::InvalidAudience);
        }
        if claims.exp <= now_unix_seconds {
            return Err(Error::Expired);
        }
        if claims.token_type != expected_type {
            return Err(Error::UnexpectedTokenType(
                claims.token_type.as_str().to_string(),
            ));
        }

        Ok(claims)
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_key", &"***")
            .field("refresh_key", &"***")
            .finish()
    }
}

fn sign(key: &[u8], claims: &Claims) -> Result<String, Error> {
    let header_b64 = b64e_json(&Header::hs256())?;
    let claims_b64 = b64e_json(claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| Error::InvalidSignature)?;
    mac.update(signing_input.as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

    Ok(format!("{signing_input}.{signature_b64}"))
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;
    const ACCESS_KEY: &[u8] = b"access-secret-key-for-tests-0001";
    const REFRESH_KEY: &[u8] = b"refresh-secret-key-for-tests-001";

    fn codec() -> TokenCodec {
        TokenCodec::new("https://gardi.test", "gardi", ACCESS_KEY, REFRESH_KEY)
    }

    #[test]
    fn access_round_trip_preserves_claims() -> Result<(), Error> {
        let token = codec().sign_access(
            "42",
            vec!["admin".to_string()],
            vec!["users:write".to_string()],
            "jti-1",
            900,
            NOW,
        )?;
        let claims = codec().parse_access(&token, NOW)?;
        assert_eq!(claims.token_type, TokenType::Access);
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.jti, "jti-1");
        assert_eq!(claims.roles, vec!["admin".to_string()]);
        assert_eq!(claims.permissions, vec!["users:write".to_string()]);
        assert_eq!(claims.exp, NOW + 900);
        Ok(())
    }

    #[test]
    fn refresh_round_trip_omits_roles() -> Result<(), Error> {
        let token = codec().sign_refresh("42", "jti-2", 3600, NOW)?;
        let claims = codec().parse_refresh(&token, NOW)?;
        assert_eq!(claims.token_type, TokenType::Refresh);
        assert!(claims.roles.is_empty());
        assert!(claims.permissions.is_empty());

        // Wire form must not carry empty role/permission arrays.
        let payload_b64 = token.split('.').nth(1).expect("claims segment");
        let payload = Base64UrlUnpadded::decode_vec(payload_b64).expect("base64");
        let json = String::from_utf8(payload).expect("utf8");
        assert!(!json.contains("roles"));
        assert!(!json.contains("permissions"));
        Ok(())
    }

    #[test]
    fn keys_are_not_interchangeable() -> Result<(), Error> {
        let refresh = codec().sign_refresh("42", "jti-3", 3600, NOW)?;
        let result = codec().parse_access(&refresh, NOW);
        assert!(matches!(result, Err(Error::InvalidSignature)));
        Ok(())
    }

    #[test]
    fn same_key_wrong_type_is_rejected() -> Result<(), Error> {
        // A codec with one shared key isolates the token_type check.
        let shared = TokenCodec::new("https://gardi.test", "gardi", ACCESS_KEY, ACCESS_KEY);
        let refresh = shared.sign_refresh("42", "jti-4", 3600, NOW)?;
        let result = shared.parse_access(&refresh, NOW);
        assert!(matches!(result, Err(Error::UnexpectedTokenType(t)) if t == "refresh"));
        Ok(())
    }

    #[test]
    fn rejects_expired_token() -> Result<(), Error> {
        let token = codec().sign_access("42", Vec::new(), Vec::new(), "jti-5", 60, NOW)?;
        let result = codec().parse_access(&token, NOW + 61);
        assert!(matches!(result, Err(Error::Expired)));
        // Expiry boundary is exclusive: exp == now is already expired.
        let result = codec().parse_access(&token, NOW + 60);
        assert!(matches!(result, Err(Error::Expired)));
        Ok(())
    }

    #[test]
    fn rejects_wrong_issuer_or_audience() -> Result<(), Error> {
        let token = codec().sign_refresh("42", "jti-6", 3600, NOW)?;

        let other = TokenCodec::new("https://other.test", "gardi", ACCESS_KEY, REFRESH_KEY);
        assert!(matches!(
            other.parse_refresh(&token, NOW),
            Err(Error::InvalidIssuer)
        ));

        let other = TokenCodec::new("https://gardi.test", "other", ACCESS_KEY, REFRESH_KEY);
        assert!(matches!(
            other.parse_refresh(&token, NOW),
            Err(Error::InvalidAudience)
        ));
        Ok(())
    }

    #[test]
    fn rejects_tampered_payload() -> Result<(), Error> {
        let token = codec().sign_access("42", Vec::new(), Vec::new(), "jti-7", 900, NOW)?;
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = b64e_json(&Claims {
            token_type: TokenType::Access,
            iss: "https://gardi.test".to_string(),
            aud: "gardi".to_string(),
            sub: "1".to_string(),
            exp: NOW + 900,
            iat: NOW,
            jti: "jti-7".to_string(),
            roles: vec!["admin".to_string()],
            permissions: Vec::new(),
        })?;
        parts[1] = &forged;
        let tampered = parts.join(".");
        assert!(matches!(
            codec().parse_access(&tampered, NOW),
            Err(Error::InvalidSignature)
        ));
        Ok(())
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let header = Base64UrlUnpadded::encode_string(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = Base64UrlUnpadded::encode_string(b"{}");
        let raw = format!("{header}.{payload}.");
        let result = codec().parse_access(&raw, NOW);
        assert!(matches!(result, Err(Error::UnsupportedAlg(alg)) if alg == "none"));
    }

    #[test]
    fn rejects_malformed_token() {
        assert!(matches!(
            codec().parse_access("not-a-token", NOW),
            Err(Error::TokenFormat)
        ));
        assert!(matches!(
            codec().parse_access("a.b.c.d", NOW),
            Err(Error::TokenFormat)
        ));
    }
}
