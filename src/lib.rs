//! # Warden (session & CSRF authentication middleware)
//!
//! `warden` decides, per inbound request, whether the caller is an established
//! identity, issues and validates single-use anti-forgery tokens for
//! state-changing form submissions, and records an audit trail of every
//! security-relevant decision.
//!
//! ## Sessions
//!
//! A session is a server-side record referenced by an opaque key. The key
//! travels in the `JSESSIONID` cookie, sealed with ChaCha20-Poly1305 so the
//! client can neither read nor forge it. Each authenticated request refreshes
//! the session's liveness window and reloads the user's grants, so revocations
//! take effect on the next request.
//!
//! ## CSRF
//!
//! Forms rendered behind [`auth::csrf::set_csrf`] carry a 32-character hex
//! token that is mirrored in the `_csrf` cookie (5 minute TTL). Submissions
//! behind [`auth::csrf::require_csrf`] must echo it byte-for-byte; the cookie
//! is cleared on success so a token validates at most once.
//!
//! ## Audit
//!
//! Every denial and every mutating action is posted to the [`audit::Logger`],
//! attributed to a username or [`audit::ANONYMOUS_USER`]. Audit persistence is
//! best effort: a failed insert is logged and never fails the request.

pub mod api;
pub mod audit;
pub mod auth;
pub mod cli;
pub mod model;
pub mod urlprefix;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
