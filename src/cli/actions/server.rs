use crate::{
    api,
    auth::{AuthConfig, SecureCookie},
    urlprefix::UrlPrefix,
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub session_hashkey: Option<SecretString>,
    pub url_prefix: String,
    pub session_ttl_seconds: i64,
    pub csrf_ttl_seconds: i64,
    pub audit_debug: bool,
}

/// Cookie codec from the configured secret, or a random one when absent.
fn cookie_codec(session_hashkey: Option<&SecretString>) -> Result<SecureCookie> {
    match session_hashkey {
        Some(secret) => {
            SecureCookie::from_hex(secret.expose_secret()).context("invalid --session-hashkey")
        }
        None => {
            warn!("No session hash key configured, generated a random key; sessions will not survive a restart");
            Ok(SecureCookie::random())
        }
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the cookie secret is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let cookies = cookie_codec(args.session_hashkey.as_ref())?;

    let url_prefix = UrlPrefix::new(&args.url_prefix);
    debug!("URL prefix: {:?}", url_prefix.get());

    let auth_config = AuthConfig::new(url_prefix)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_csrf_ttl_seconds(args.csrf_ttl_seconds);

    api::new(args.port, args.dsn, auth_config, cookies, args.audit_debug).await
}
