use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const CMD_USER: &str = "user";
pub const CMD_CREATE: &str = "create";
pub const CMD_GRANT: &str = "grant";
pub const CMD_REVOKE: &str = "revoke";
pub const ARG_USERNAME: &str = "username";
pub const ARG_PASSWORD: &str = "password";
pub const ARG_ADMIN: &str = "admin";
pub const ARG_AUTH: &str = "auth";

#[derive(Debug, Clone)]
pub struct Options {
    pub username: String,
    pub password: SecretString,
    pub admin: bool,
}

impl Options {
    /// Parse `user create` arguments.
    ///
    /// # Errors
    /// Returns an error if the username or password is missing or blank.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        Ok(Self {
            username: read_required(matches, ARG_USERNAME)?,
            password: SecretString::from(read_required(matches, ARG_PASSWORD)?),
            admin: matches.get_flag(ARG_ADMIN),
        })
    }
}

/// Arguments shared by `user grant` and `user revoke`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantOptions {
    pub username: String,
    pub auth: String,
}

impl GrantOptions {
    /// Parse `user grant|revoke` arguments.
    ///
    /// # Errors
    /// Returns an error if the username or authorization is missing or blank.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        Ok(Self {
            username: read_required(matches, ARG_USERNAME)?,
            auth: read_required(matches, ARG_AUTH)?,
        })
    }
}

fn read_required(matches: &ArgMatches, id: &str) -> anyhow::Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("missing required argument: {id}"))
}

fn grant_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(Arg::new(ARG_USERNAME).help("Login name").required(true))
        .arg(
            Arg::new(ARG_AUTH)
                .help("Authorization name, matched case-insensitively")
                .required(true),
        )
}

#[must_use]
pub fn subcommand() -> Command {
    Command::new(CMD_USER)
        .about("Manage user accounts")
        .subcommand_required(true)
        .subcommand(
            Command::new(CMD_CREATE)
                .about("Create a user")
                .arg(
                    Arg::new(ARG_USERNAME)
                        .help("Login name")
                        .required(true),
                )
                .arg(
                    Arg::new(ARG_PASSWORD)
                        .long(ARG_PASSWORD)
                        .help("Initial password")
                        .env("WARDEN_USER_PASSWORD")
                        .hide_env_values(true)
                        .required(true),
                )
                .arg(
                    Arg::new(ARG_ADMIN)
                        .long(ARG_ADMIN)
                        .help("Grant administrator rights")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(grant_command(CMD_GRANT, "Grant a named authorization"))
        .subcommand(grant_command(CMD_REVOKE, "Revoke a named authorization"))
}
