//! `PostgreSQL` implementation of the users repository.
//!
//! Password hashing, session key generation and session expiry live in the
//! database (`sql/schema.sql`): `gen_passwd`, `check_passwd`,
//! `create_session` and `update_session_ttl`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{Instrument, Span};

use super::{AuditEntry, Grant, SessionUser, User, UsersRepo, DEFAULT_SESSION_TTL_SECONDS};

#[derive(Clone, Debug)]
pub struct PgUsersRepo {
    pool: PgPool,
    session_ttl_seconds: i64,
}

fn query_span(operation: &str, statement: &str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

impl PgUsersRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UsersRepo for PgUsersRepo {
    async fn create_user(&self, username: &str, password: &str) -> Result<()> {
        let query = "INSERT INTO users (username, pass_hash) VALUES ($1, gen_passwd($2))";
        sqlx::query(query)
            .bind(username)
            .bind(password)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to create user")?;
        Ok(())
    }

    async fn check_password(&self, username: &str, password: &str) -> Result<bool> {
        let query = "SELECT check_passwd($1, $2) AS matches";
        let row = sqlx::query(query)
            .bind(username)
            .bind(password)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to check password")?;
        Ok(row.get("matches"))
    }

    async fn get_user(&self, username: &str) -> Result<Option<User>> {
        let query = "SELECT id, username, admin FROM users WHERE username = $1";
        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to get user")?;

        Ok(row.map(|row| User {
            user_id: row.get("id"),
            username: row.get("username"),
            admin: row.get("admin"),
        }))
    }

    async fn elevate_to_admin(&self, username: &str) -> Result<()> {
        let query = "UPDATE users SET admin = true WHERE username = $1";
        let result = sqlx::query(query)
            .bind(username)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to elevate user to admin")?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("no such user: {username}"));
        }
        Ok(())
    }

    async fn create_session(&self, username: &str) -> Result<String> {
        let query = "SELECT create_session($1, $2) AS session_key";
        let row = sqlx::query(query)
            .bind(username)
            .bind(self.session_ttl_seconds)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to create session")?;
        Ok(row.get("session_key"))
    }

    async fn get_session_user(&self, session_key: &str) -> Result<Option<SessionUser>> {
        // Expired sessions are filtered here, so callers cannot tell them
        // apart from unknown keys.
        let query = r"
            SELECT u.id, u.username, u.admin
            FROM session s
            JOIN users u ON s.user_id = u.id
            WHERE s.session_key = $1
              AND s.revoked_at > NOW()
        ";
        let row = sqlx::query(query)
            .bind(session_key)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to get session user")?;

        Ok(row.map(|row| SessionUser {
            user_id: row.get("id"),
            username: row.get("username"),
            admin: row.get("admin"),
        }))
    }

    async fn update_session_liveness(&self, session_key: &str) -> Result<()> {
        let query = "CALL update_session_ttl($1, $2)";
        sqlx::query(query)
            .bind(session_key)
            .bind(self.session_ttl_seconds)
            .execute(&self.pool)
            .instrument(query_span("CALL", query))
            .await
            .context("failed to update session liveness")?;
        Ok(())
    }

    async fn invalidate_session(&self, session_key: &str) -> Result<()> {
        let query = "DELETE FROM session WHERE session_key = $1";
        sqlx::query(query)
            .bind(session_key)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to invalidate session")?;
        Ok(())
    }

    async fn user_authorizations(&self, user_id: i64) -> Result<Vec<Grant>> {
        let query = r"
            SELECT auth_id, auth, granted, revoked
            FROM auth_grants
            WHERE user_id = $1
            ORDER BY granted, auth_id
        ";
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to fetch user authorizations")?;

        Ok(rows
            .into_iter()
            .map(|row| Grant {
                id: row.get("auth_id"),
                auth: row.get("auth"),
                granted: row.get("granted"),
                revoked: row.get("revoked"),
            })
            .collect())
    }

    async fn grant_auth(&self, user_id: i64, auth: &str) -> Result<()> {
        let query = r"
            INSERT INTO user_authz (user_id, auth_id)
            SELECT $1, id FROM authorizations WHERE lower(auth) = lower($2)
            ON CONFLICT (user_id, auth_id) DO UPDATE SET revoked = NULL, granted = NOW()
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(auth)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to grant authorization")?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("no such authorization: {auth}"));
        }
        Ok(())
    }

    async fn revoke_auth(&self, user_id: i64, auth: &str) -> Result<()> {
        let query = r"
            UPDATE user_authz SET revoked = NOW()
            WHERE user_id = $1
              AND auth_id IN (SELECT id FROM authorizations WHERE lower(auth) = lower($2))
              AND revoked IS NULL
        ";
        sqlx::query(query)
            .bind(user_id)
            .bind(auth)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to revoke authorization")?;
        Ok(())
    }

    async fn insert_audit_log(&self, username: &str, action: &str) -> Result<()> {
        let query = "INSERT INTO user_audit (username, action) VALUES ($1, $2)";
        sqlx::query(query)
            .bind(username)
            .bind(action)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert audit log")?;
        Ok(())
    }

    async fn latest_audit_entries(&self, limit: i64) -> Result<Vec<AuditEntry>> {
        let query = r"
            SELECT username, event_time, action
            FROM (
                SELECT id, username, event_time, action
                FROM user_audit
                ORDER BY event_time DESC, id DESC
                LIMIT $1
            ) segment
            ORDER BY event_time, id
        ";
        let rows = sqlx::query(query)
            .bind(limit)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to fetch audit entries")?;

        Ok(rows
            .into_iter()
            .map(|row| AuditEntry {
                username: row.get("username"),
                action: row.get("action"),
                event_time: row.get("event_time"),
            })
            .collect())
    }
}
