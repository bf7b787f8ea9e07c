//! Map parsed CLI arguments to an [`Action`].

use crate::cli::actions::{Action, server, user};
use crate::cli::commands::{self, auth, logging};
use anyhow::{Context, Result};

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    if let Some((commands::user::CMD_USER, user_matches)) = matches.subcommand() {
        return match user_matches.subcommand() {
            Some((commands::user::CMD_CREATE, create_matches)) => {
                let opts = commands::user::Options::parse(create_matches)?;
                Ok(Action::CreateUser(user::Args {
                    dsn,
                    username: opts.username,
                    password: opts.password,
                    admin: opts.admin,
                }))
            }
            Some((name @ (commands::user::CMD_GRANT | commands::user::CMD_REVOKE), grant_matches)) => {
                let opts = commands::user::GrantOptions::parse(grant_matches)?;
                let change = if name == commands::user::CMD_GRANT {
                    user::GrantChange::Grant
                } else {
                    user::GrantChange::Revoke
                };
                Ok(Action::ChangeGrant(user::GrantArgs {
                    dsn,
                    username: opts.username,
                    auth: opts.auth,
                    change,
                }))
            }
            _ => Err(anyhow::anyhow!("missing user subcommand")),
        };
    }

    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let auth_opts = auth::Options::parse(matches)?;
    let log_opts = logging::Options::parse(matches);

    Ok(Action::Server(server::Args {
        port,
        dsn,
        session_hashkey: auth_opts.session_hashkey,
        url_prefix: auth_opts.url_prefix,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        csrf_ttl_seconds: auth_opts.csrf_ttl_seconds,
        audit_debug: log_opts.audit_debug,
    }))
}
