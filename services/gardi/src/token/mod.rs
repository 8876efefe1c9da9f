//! Token lifecycle: issuance, rotation, reuse detection, revocation.

mod service;

pub use service::{RotateError, RotatedTokens, TokenPair, TokenService};

use anyhow::{Context, Result};
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use sha2::Sha256;

/// Hash a refresh token with the server pepper.
///
/// Only this hash is ever stored; a database leak alone cannot be replayed
/// into live refresh tokens.
#[must_use]
pub fn hash_refresh_token(pepper: &[u8], token: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(pepper).expect("hmac accepts any key length");
    mac.update(token.as_bytes());
    let digest = mac.finalize().into_bytes();
    hex_encode(&digest)
}

/// Create a CSRF token for the double-submit cookie pair.
/// Random and unrelated to any token id.
///
/// # Errors
/// Returns an error if the system RNG fails.
pub fn generate_csrf_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate csrf token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(
        String::with_capacity(bytes.len() * 2),
        |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        },
    )
}
