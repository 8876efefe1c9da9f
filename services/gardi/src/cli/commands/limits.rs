//! Rate limiting, idempotency, cache, and abuse guard arguments.

use clap::{Arg, ArgAction, Command};

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("api-rate-limit-rpm")
                .long("api-rate-limit-rpm")
                .help("Sustained requests per minute for the general API")
                .default_value("300")
                .env("GARDI_API_RATE_LIMIT_RPM")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("auth-rate-limit-rpm")
                .long("auth-rate-limit-rpm")
                .help("Sustained requests per minute for auth endpoints")
                .default_value("30")
                .env("GARDI_AUTH_RATE_LIMIT_RPM")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("rate-limit-fail-open")
                .long("rate-limit-fail-open")
                .help("Forward requests when the limiter backend is down (default: deny)")
                .env("GARDI_RATE_LIMIT_FAIL_OPEN")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("idempotency-ttl-seconds")
                .long("idempotency-ttl-seconds")
                .help("In-progress idempotency record lifetime")
                .default_value("60")
                .env("GARDI_IDEMPOTENCY_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("idempotency-completion-ttl-seconds")
                .long("idempotency-completion-ttl-seconds")
                .help("Completed idempotency record lifetime (replay window)")
                .default_value("86400")
                .env("GARDI_IDEMPOTENCY_COMPLETION_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("permission-cache-ttl-seconds")
                .long("permission-cache-ttl-seconds")
                .help("TTL for cached permission sets; 0 disables the cache")
                .default_value("30")
                .env("GARDI_PERMISSION_CACHE_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("abuse-free-attempts")
                .long("abuse-free-attempts")
                .help("Failed auth attempts before cooldowns start")
                .default_value("3")
                .env("GARDI_ABUSE_FREE_ATTEMPTS")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("abuse-base-delay-ms")
                .long("abuse-base-delay-ms")
                .help("First cooldown step")
                .default_value("1000")
                .env("GARDI_ABUSE_BASE_DELAY_MS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("abuse-multiplier")
                .long("abuse-multiplier")
                .help("Cooldown growth factor per failure")
                .default_value("2.0")
                .env("GARDI_ABUSE_MULTIPLIER")
                .value_parser(clap::value_parser!(f64)),
        )
        .arg(
            Arg::new("abuse-max-delay-ms")
                .long("abuse-max-delay-ms")
                .help("Cooldown ceiling")
                .default_value("900000")
                .env("GARDI_ABUSE_MAX_DELAY_MS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("abuse-reset-window-seconds")
                .long("abuse-reset-window-seconds")
                .help("Idle time after which abuse state is forgotten")
                .default_value("3600")
                .env("GARDI_ABUSE_RESET_WINDOW_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
}
