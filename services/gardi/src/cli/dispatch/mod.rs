use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{google, tokens};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::time::Duration;

fn seconds_arg(matches: &clap::ArgMatches, name: &str, default: u64) -> Duration {
    Duration::from_secs(matches.get_one::<u64>(name).copied().unwrap_or(default))
}

fn millis_arg(matches: &clap::ArgMatches, name: &str, default: u64) -> Duration {
    Duration::from_millis(matches.get_one::<u64>(name).copied().unwrap_or(default))
}

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    tokens::validate(matches).map_err(anyhow::Error::msg)?;
    google::validate(matches).map_err(anyhow::Error::msg)?;

    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches.get_one::<String>("dsn").cloned();
    let redis_url = matches.get_one::<String>("redis-url").cloned();
    let base_url = matches
        .get_one::<String>("base-url")
        .cloned()
        .unwrap_or_else(|| "http://localhost:8080".to_string());

    let access_token_secret = matches
        .get_one::<String>(tokens::ARG_ACCESS_SECRET)
        .cloned()
        .context("missing required argument: --access-token-secret")?;
    let refresh_token_secret = matches
        .get_one::<String>(tokens::ARG_REFRESH_SECRET)
        .cloned()
        .context("missing required argument: --refresh-token-secret")?;
    let refresh_token_pepper = matches
        .get_one::<String>(tokens::ARG_REFRESH_PEPPER)
        .cloned()
        .context("missing required argument: --refresh-token-pepper")?;

    let token_issuer = matches
        .get_one::<String>("token-issuer")
        .cloned()
        .unwrap_or_else(|| base_url.clone());
    let token_audience = matches
        .get_one::<String>("token-audience")
        .cloned()
        .unwrap_or_else(|| "gardi".to_string());

    let google_client_id = matches.get_one::<String>(google::ARG_CLIENT_ID).cloned();
    let google_client_secret = matches
        .get_one::<String>(google::ARG_CLIENT_SECRET)
        .cloned()
        .map(SecretString::from);
    let google_redirect_url = matches.get_one::<String>(google::ARG_REDIRECT_URL).cloned();

    Ok(Action::Server(Box::new(Args {
        port,
        dsn,
        redis_url,
        base_url,
        token_issuer,
        token_audience,
        access_token_secret: SecretString::from(access_token_secret),
        refresh_token_secret: SecretString::from(refresh_token_secret),
        refresh_token_pepper: SecretString::from(refresh_token_pepper),
        access_ttl: seconds_arg(matches, "access-ttl-seconds", 900),
        refresh_ttl: seconds_arg(matches, "refresh-ttl-seconds", 2_592_000),
        api_rate_limit_rpm: matches
            .get_one::<u32>("api-rate-limit-rpm")
            .copied()
            .unwrap_or(300),
        auth_rate_limit_rpm: matches
            .get_one::<u32>("auth-rate-limit-rpm")
            .copied()
            .unwrap_or(30),
        rate_limit_fail_open: matches.get_flag("rate-limit-fail-open"),
        idempotency_ttl: seconds_arg(matches, "idempotency-ttl-seconds", 60),
        idempotency_completion_ttl: seconds_arg(
            matches,
            "idempotency-completion-ttl-seconds",
            86_400,
        ),
        permission_cache_ttl: seconds_arg(matches, "permission-cache-ttl-seconds", 30),
        abuse_free_attempts: matches
            .get_one::<u32>("abuse-free-attempts")
            .copied()
            .unwrap_or(3),
        abuse_base_delay: millis_arg(matches, "abuse-base-delay-ms", 1_000),
        abuse_multiplier: matches
            .get_one::<f64>("abuse-multiplier")
            .copied()
            .unwrap_or(2.0),
        abuse_max_delay: millis_arg(matches, "abuse-max-delay-ms", 900_000),
        abuse_reset_window: seconds_arg(matches, "abuse-reset-window-seconds", 3_600),
        google_client_id,
        google_client_secret,
        google_redirect_url,
    })))
}
