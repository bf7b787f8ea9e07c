//! Users repository: session, authorization and audit persistence.
//!
//! The middleware only talks to [`UsersRepo`]. Production wiring uses
//! [`PgUsersRepo`]; tests substitute [`MemoryUsersRepo`], which counts calls
//! and can be told to fail individual operations.

mod memory;
mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use memory::{CallCounts, MemoryUsersRepo};
pub use postgres::PgUsersRepo;

/// Default session validity window, extended on every authenticated request.
pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 30 * 60;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    pub user_id: i64,
    pub username: String,
    pub admin: bool,
}

/// Owner of a live session, as returned by [`UsersRepo::get_session_user`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: i64,
    pub username: String,
    pub admin: bool,
}

/// A named capability granted to a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Grant {
    pub id: i64,
    pub auth: String,
    pub granted: DateTime<Utc>,
    pub revoked: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub username: String,
    pub action: String,
    pub event_time: DateTime<Utc>,
}

/// Persistence operations consumed by the auth middleware.
///
/// Every call is a suspension point; dropping the returned future (client
/// disconnect, outer timeout) abandons the operation.
#[async_trait]
pub trait UsersRepo: Send + Sync {
    async fn create_user(&self, username: &str, password: &str) -> Result<()>;

    /// Verify credentials. Unknown users simply do not match.
    async fn check_password(&self, username: &str, password: &str) -> Result<bool>;

    async fn get_user(&self, username: &str) -> Result<Option<User>>;

    async fn elevate_to_admin(&self, username: &str) -> Result<()>;

    /// Create a session for `username` and return its key.
    async fn create_session(&self, username: &str) -> Result<String>;

    /// Resolve a session key. Expired, revoked and unknown keys are all `None`.
    async fn get_session_user(&self, session_key: &str) -> Result<Option<SessionUser>>;

    /// Extend the validity window of a live session.
    async fn update_session_liveness(&self, session_key: &str) -> Result<()>;

    /// Delete a session. Deleting a missing session is not an error.
    async fn invalidate_session(&self, session_key: &str) -> Result<()>;

    /// Active grants for a user, oldest grant first.
    async fn user_authorizations(&self, user_id: i64) -> Result<Vec<Grant>>;

    async fn grant_auth(&self, user_id: i64, auth: &str) -> Result<()>;

    async fn revoke_auth(&self, user_id: i64, auth: &str) -> Result<()>;

    async fn insert_audit_log(&self, username: &str, action: &str) -> Result<()>;

    /// The newest `limit` audit entries, returned oldest first.
    async fn latest_audit_entries(&self, limit: i64) -> Result<Vec<AuditEntry>>;
}
