//! Session, CSRF and authorization middleware.
//!
//! Every middleware takes `State<Arc<AuthService>>` and is mounted with
//! `axum::middleware::from_fn_with_state`. Request-scoped results travel as
//! typed extensions: [`Details`] once a session resolves, [`CsrfToken`] once a
//! form token has been issued.

pub mod cookies;
pub mod csrf;
pub mod guards;
pub mod session;

#[cfg(test)]
mod tests;

use axum::{
    http::{Extensions, StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
};
use std::{fmt, sync::Arc};

use crate::{
    audit::{ANONYMOUS_USER, Logger},
    model::{Grant, UsersRepo},
    urlprefix::UrlPrefix,
};

pub use cookies::{CookieError, SecretError, SecureCookie};
pub use csrf::{CsrfToken, csrf_token, require_csrf, set_csrf};
pub use guards::{GrantGuard, require_admin, require_grant};
pub use session::{invalidate_session, require_session, session_user, set_authenticated_session};

pub const SESSION_COOKIE: &str = "JSESSIONID";
pub const CSRF_COOKIE: &str = "_csrf";
pub const CSRF_FIELD: &str = "csrf_token";
pub const LOGIN_PATH: &str = "/login";
pub const UNAUTHORIZED_PATH: &str = "/unauthorized";

const DEFAULT_SESSION_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_CSRF_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_MAX_FORM_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    url_prefix: UrlPrefix,
    session_ttl_seconds: i64,
    csrf_ttl_seconds: i64,
    max_form_bytes: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new(UrlPrefix::default())
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new(url_prefix: UrlPrefix) -> Self {
        Self {
            url_prefix,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            csrf_ttl_seconds: DEFAULT_CSRF_TTL_SECONDS,
            max_form_bytes: DEFAULT_MAX_FORM_BYTES,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_csrf_ttl_seconds(mut self, seconds: i64) -> Self {
        self.csrf_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_form_bytes(mut self, bytes: usize) -> Self {
        self.max_form_bytes = bytes;
        self
    }

    #[must_use]
    pub fn url_prefix(&self) -> &UrlPrefix {
        &self.url_prefix
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn csrf_ttl_seconds(&self) -> i64 {
        self.csrf_ttl_seconds
    }

    pub(crate) fn max_form_bytes(&self) -> usize {
        self.max_form_bytes
    }
}

/// Shared, immutable state behind every auth middleware.
pub struct AuthService {
    config: AuthConfig,
    cookies: SecureCookie,
    repo: Arc<dyn UsersRepo>,
    audit: Logger,
}

impl fmt::Debug for AuthService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        cookies: SecureCookie,
        repo: Arc<dyn UsersRepo>,
        audit: Logger,
    ) -> Self {
        Self {
            config,
            cookies,
            repo,
            audit,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn cookies(&self) -> &SecureCookie {
        &self.cookies
    }

    #[must_use]
    pub fn repo(&self) -> &Arc<dyn UsersRepo> {
        &self.repo
    }

    #[must_use]
    pub fn audit(&self) -> &Logger {
        &self.audit
    }

    /// 302 to `path` below the configured prefix.
    #[must_use]
    pub fn redirect(&self, path: &str) -> Response {
        let location = self.config.url_prefix.apply(path);
        (StatusCode::FOUND, [(LOCATION, location)]).into_response()
    }
}

/// Identity attached to a request after session resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Details {
    pub user_id: i64,
    pub username: String,
    pub admin: bool,
    pub session_key: String,
    pub authorizations: Vec<Grant>,
}

impl Details {
    /// Whether the user holds grant `name`, compared case-insensitively.
    #[must_use]
    pub fn has_auth(&self, name: &str) -> bool {
        self.authorizations
            .iter()
            .any(|grant| grant.auth.eq_ignore_ascii_case(name))
    }
}

/// Username to attribute audit entries to.
pub(crate) fn attribution(extensions: &Extensions) -> String {
    extensions
        .get::<Details>()
        .map_or_else(|| ANONYMOUS_USER.to_string(), |d| d.username.clone())
}
