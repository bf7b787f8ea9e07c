//! Log verbosity, output format and audit mirroring.

use clap::{
    Arg, ArgAction, ArgMatches, Command,
    builder::{PossibleValuesParser, TypedValueParser, ValueParser},
};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_FORMAT: &str = "log-format";
pub const ARG_AUDIT_DEBUG: &str = "audit-debug";

/// Levels enabled by one to four `-v`; zero keeps the ERROR default.
const LEVELS: [Level; 4] = [Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Options {
    /// `None` means ERROR only.
    pub level: Option<Level>,
    pub format: LogFormat,
    /// Mirror every audit entry on the `audit` target at DEBUG.
    pub audit_debug: bool,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let verbosity = matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0);
        Self {
            level: level_for(verbosity),
            format: matches
                .get_one::<LogFormat>(ARG_LOG_FORMAT)
                .copied()
                .unwrap_or_default(),
            audit_debug: matches.get_flag(ARG_AUDIT_DEBUG),
        }
    }
}

fn level_for(verbosity: u8) -> Option<Level> {
    let index = usize::from(verbosity.checked_sub(1)?);
    Some(LEVELS[index.min(LEVELS.len() - 1)])
}

/// Accept a count (`0`-`4`) or a level name for `WARDEN_LOG_LEVEL`.
fn parse_verbosity(value: &str) -> Result<u8, String> {
    if let Ok(count) = value.parse::<u8>() {
        return u8::try_from(LEVELS.len())
            .ok()
            .filter(|max| count <= *max)
            .map(|_| count)
            .ok_or_else(|| format!("log level out of range: {value}"));
    }
    let level = value
        .parse::<Level>()
        .map_err(|_| format!("invalid log level: {value}"))?;
    let position = LEVELS.iter().position(|l| *l == level).map_or(0, |p| p + 1);
    u8::try_from(position).map_err(|err| err.to_string())
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity: repeat for WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("WARDEN_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(ValueParser::new(parse_verbosity)),
        )
        .arg(
            Arg::new(ARG_LOG_FORMAT)
                .long(ARG_LOG_FORMAT)
                .help("Log output format")
                .env("WARDEN_LOG_FORMAT")
                .global(true)
                .default_value("pretty")
                .value_parser(PossibleValuesParser::new(["pretty", "json"]).map(|v| {
                    if v == "json" {
                        LogFormat::Json
                    } else {
                        LogFormat::Pretty
                    }
                })),
        )
        .arg(
            Arg::new(ARG_AUDIT_DEBUG)
                .long(ARG_AUDIT_DEBUG)
                .help("Mirror every audit entry to the log at DEBUG, whatever the verbosity")
                .env("WARDEN_AUDIT_DEBUG")
                .global(true)
                .action(ArgAction::SetTrue),
        )
}
