//! Google federation arguments. All optional; the feature stays off until a
//! client id is configured.

use clap::{Arg, Command};

pub const ARG_CLIENT_ID: &str = "google-client-id";
pub const ARG_CLIENT_SECRET: &str = "google-client-secret";
pub const ARG_REDIRECT_URL: &str = "google-redirect-url";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CLIENT_ID)
                .long(ARG_CLIENT_ID)
                .help("OAuth client id; enables the google login routes")
                .env("GARDI_GOOGLE_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_CLIENT_SECRET)
                .long(ARG_CLIENT_SECRET)
                .help("OAuth client secret")
                .env("GARDI_GOOGLE_CLIENT_SECRET")
                .hide_env_values(true)
                .requires(ARG_CLIENT_ID),
        )
        .arg(
            Arg::new(ARG_REDIRECT_URL)
                .long(ARG_REDIRECT_URL)
                .help("Callback URL registered with the provider")
                .env("GARDI_GOOGLE_REDIRECT_URL")
                .requires(ARG_CLIENT_ID),
        )
}

/// # Errors
/// Returns an error string when the client id is set without its companions.
pub fn validate(matches: &clap::ArgMatches) -> Result<(), String> {
    if matches.contains_id(ARG_CLIENT_ID) {
        if !matches.contains_id(ARG_CLIENT_SECRET) {
            return Err(format!(
                "--{ARG_CLIENT_SECRET} is required when --{ARG_CLIENT_ID} is set"
            ));
        }
        if !matches.contains_id(ARG_REDIRECT_URL) {
            return Err(format!(
                "--{ARG_REDIRECT_URL} is required when --{ARG_CLIENT_ID} is set"
            ));
        }
    }
    Ok(())
}
