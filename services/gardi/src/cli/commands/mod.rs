pub mod google;
pub mod limits;
pub mod logging;
pub mod tokens;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let command = Command::new("gardi")
        .about("Authentication and authorization authority")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("GARDI_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("PostgreSQL connection string")
                .long_help(
                    "PostgreSQL connection string. When omitted, users and sessions live in \
                     process memory; that mode is only for development and tests.",
                )
                .env("GARDI_DSN"),
        )
        .arg(
            Arg::new("redis-url")
                .long("redis-url")
                .help("Redis URL for the distributed limiter, idempotency, cache, and abuse state")
                .long_help(
                    "Redis URL. When omitted, rate limiting, idempotency, the permission cache \
                     and the abuse guard fall back to their in-process variants, which do not \
                     coordinate across instances.",
                )
                .env("GARDI_REDIS_URL"),
        )
        .arg(
            Arg::new("base-url")
                .long("base-url")
                .help("Public base URL of this service; https enables Secure cookies")
                .default_value("http://localhost:8080")
                .env("GARDI_BASE_URL"),
        );

    let command = tokens::with_args(command);
    let command = limits::with_args(command);
    let command = google::with_args(command);
    logging::with_args(command)
}
