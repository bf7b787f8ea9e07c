use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_SESSION_HASHKEY: &str = "session-hashkey";
pub const ARG_URL_PREFIX: &str = "url-prefix";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_CSRF_TTL_SECONDS: &str = "csrf-ttl-seconds";

/// Longest accepted session or CSRF TTL (one year).
pub const MAX_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Options {
    pub session_hashkey: Option<SecretString>,
    pub url_prefix: String,
    pub session_ttl_seconds: i64,
    pub csrf_ttl_seconds: i64,
}

impl Options {
    /// Parse session and CSRF arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a TTL is not positive or exceeds [`MAX_TTL_SECONDS`].
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read_ttl = |id: &str| -> anyhow::Result<i64> {
            matches
                .get_one::<i64>(id)
                .copied()
                .filter(|ttl| (1..=MAX_TTL_SECONDS).contains(ttl))
                .ok_or_else(|| {
                    anyhow::anyhow!("--{id} must be between 1 and {MAX_TTL_SECONDS} seconds")
                })
        };

        Ok(Self {
            session_hashkey: matches
                .get_one::<String>(ARG_SESSION_HASHKEY)
                .filter(|v| !v.trim().is_empty())
                .map(|v| SecretString::from(v.clone())),
            url_prefix: matches
                .get_one::<String>(ARG_URL_PREFIX)
                .cloned()
                .unwrap_or_default(),
            session_ttl_seconds: read_ttl(ARG_SESSION_TTL_SECONDS)?,
            csrf_ttl_seconds: read_ttl(ARG_CSRF_TTL_SECONDS)?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_HASHKEY)
                .long(ARG_SESSION_HASHKEY)
                .help("Hex encoded cookie secret, at least 32 bytes")
                .long_help(
                    "Hex encoded cookie secret, at least 32 bytes. When omitted a random key is generated and sessions do not survive a restart.",
                )
                .env("WARDEN_SESSION_HASHKEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_URL_PREFIX)
                .long(ARG_URL_PREFIX)
                .help("Path prefix the service is mounted under, e.g. /app")
                .env("WARDEN_URL_PREFIX")
                .default_value(""),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session TTL in seconds, extended on every request")
                .env("WARDEN_SESSION_TTL_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_CSRF_TTL_SECONDS)
                .long(ARG_CSRF_TTL_SECONDS)
                .help("CSRF token TTL in seconds")
                .env("WARDEN_CSRF_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64)),
        )
}
