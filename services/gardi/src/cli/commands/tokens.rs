//! Token signing and hashing arguments.

use clap::{Arg, Command};

pub const ARG_ACCESS_SECRET: &str = "access-token-secret";
pub const ARG_REFRESH_SECRET: &str = "refresh-token-secret";
pub const ARG_REFRESH_PEPPER: &str = "refresh-token-pepper";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCESS_SECRET)
                .long(ARG_ACCESS_SECRET)
                .help("HS256 key for access tokens")
                .env("GARDI_ACCESS_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_REFRESH_SECRET)
                .long(ARG_REFRESH_SECRET)
                .help("HS256 key for refresh tokens; must differ from the access key")
                .env("GARDI_REFRESH_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_REFRESH_PEPPER)
                .long(ARG_REFRESH_PEPPER)
                .help("Pepper for the stored refresh token hashes")
                .env("GARDI_REFRESH_TOKEN_PEPPER")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("token-issuer")
                .long("token-issuer")
                .help("Issuer claim for signed tokens (defaults to the base URL)")
                .env("GARDI_TOKEN_ISSUER"),
        )
        .arg(
            Arg::new("token-audience")
                .long("token-audience")
                .help("Audience claim for signed tokens")
                .default_value("gardi")
                .env("GARDI_TOKEN_AUDIENCE"),
        )
        .arg(
            Arg::new("access-ttl-seconds")
                .long("access-ttl-seconds")
                .help("Access token lifetime")
                .default_value("900")
                .env("GARDI_ACCESS_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("refresh-ttl-seconds")
                .long("refresh-ttl-seconds")
                .help("Refresh token lifetime")
                .default_value("2592000")
                .env("GARDI_REFRESH_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
}

/// Reject weak keys early instead of signing with them.
///
/// # Errors
/// Returns an error string when a secret is shorter than 32 bytes or the two
/// signing keys are identical.
pub fn validate(matches: &clap::ArgMatches) -> Result<(), String> {
    let access = matches.get_one::<String>(ARG_ACCESS_SECRET);
    let refresh = matches.get_one::<String>(ARG_REFRESH_SECRET);
    let pepper = matches.get_one::<String>(ARG_REFRESH_PEPPER);

    for (name, value) in [
        (ARG_ACCESS_SECRET, access),
        (ARG_REFRESH_SECRET, refresh),
        (ARG_REFRESH_PEPPER, pepper),
    ] {
        if let Some(value) = value
            && value.len() < 32
        {
            return Err(format!("--{name} must be at least 32 bytes"));
        }
    }
    if let (Some(access), Some(refresh)) = (access, refresh)
        && access == refresh
    {
        return Err(format!(
            "--{ARG_ACCESS_SECRET} and --{ARG_REFRESH_SECRET} must differ"
        ));
    }
    Ok(())
}
