//! In-memory users repository.
//!
//! Backs the test suites and local experiments. Besides the repository
//! behavior it records how often the middleware hits each operation and can
//! inject failures, which is what the session and audit properties are
//! asserted against.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AuditEntry, Grant, SessionUser, User, UsersRepo, DEFAULT_SESSION_TTL_SECONDS};

/// Number of calls observed per repository operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create_session: usize,
    pub get_session_user: usize,
    pub update_session_liveness: usize,
    pub invalidate_session: usize,
    pub user_authorizations: usize,
    pub insert_audit_log: usize,
}

#[derive(Clone, Copy, Debug, Default)]
struct Failures {
    get_session_user: bool,
    update_session_liveness: bool,
    user_authorizations: bool,
    insert_audit_log: bool,
}

#[derive(Debug)]
struct StoredUser {
    user_id: i64,
    username: String,
    pass_hash: String,
    admin: bool,
}

#[derive(Debug)]
struct StoredSession {
    user_id: i64,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
struct StoredGrant {
    user_id: i64,
    grant: Grant,
}

#[derive(Debug, Default)]
struct State {
    users: Vec<StoredUser>,
    sessions: HashMap<String, StoredSession>,
    auths: Vec<(i64, String)>,
    grants: Vec<StoredGrant>,
    audit: Vec<AuditEntry>,
    calls: CallCounts,
    failures: Failures,
}

impl State {
    fn user_by_name(&self, username: &str) -> Option<&StoredUser> {
        self.users.iter().find(|user| user.username == username)
    }

    fn user_by_id(&self, user_id: i64) -> Option<&StoredUser> {
        self.users.iter().find(|user| user.user_id == user_id)
    }

    fn insert_user(&mut self, username: &str, password: &str, admin: bool) -> i64 {
        let user_id = i64::try_from(self.users.len()).unwrap_or(i64::MAX - 1) + 1;
        self.users.push(StoredUser {
            user_id,
            username: username.to_string(),
            pass_hash: hash_password(password),
            admin,
        });
        user_id
    }

    fn auth_id(&self, auth: &str) -> Option<i64> {
        self.auths
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(auth))
            .map(|(id, _)| *id)
    }
}

fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

#[derive(Debug)]
pub struct MemoryUsersRepo {
    state: Mutex<State>,
    session_ttl: Duration,
}

impl Default for MemoryUsersRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryUsersRepo {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            session_ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Insert a user and return its id.
    pub async fn add_user(&self, username: &str, password: &str, admin: bool) -> i64 {
        self.state
            .lock()
            .await
            .insert_user(username, password, admin)
    }

    /// Register a named authorization that can later be granted.
    pub async fn add_authorization(&self, auth: &str) -> i64 {
        let mut state = self.state.lock().await;
        let id = i64::try_from(state.auths.len()).unwrap_or(i64::MAX - 1) + 1;
        state.auths.push((id, auth.to_string()));
        id
    }

    /// Insert a live session with a caller-chosen key.
    pub async fn add_session(&self, session_key: &str, user_id: i64) {
        let mut state = self.state.lock().await;
        let expires_at = Utc::now() + self.session_ttl;
        state.sessions.insert(
            session_key.to_string(),
            StoredSession {
                user_id,
                expires_at,
            },
        );
    }

    /// Move a session's expiry into the past.
    pub async fn expire_session(&self, session_key: &str) {
        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.get_mut(session_key) {
            session.expires_at = Utc::now() - Duration::seconds(1);
        }
    }

    pub async fn has_session(&self, session_key: &str) -> bool {
        self.state.lock().await.sessions.contains_key(session_key)
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.lock().await.audit.clone()
    }

    pub async fn calls(&self) -> CallCounts {
        self.state.lock().await.calls
    }

    pub async fn fail_get_session_user(&self, fail: bool) {
        self.state.lock().await.failures.get_session_user = fail;
    }

    pub async fn fail_update_session_liveness(&self, fail: bool) {
        self.state.lock().await.failures.update_session_liveness = fail;
    }

    pub async fn fail_user_authorizations(&self, fail: bool) {
        self.state.lock().await.failures.user_authorizations = fail;
    }

    pub async fn fail_insert_audit_log(&self, fail: bool) {
        self.state.lock().await.failures.insert_audit_log = fail;
    }
}

#[async_trait]
impl UsersRepo for MemoryUsersRepo {
    async fn create_user(&self, username: &str, password: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.user_by_name(username).is_some() {
            return Err(anyhow!("user already exists: {username}"));
        }
        state.insert_user(username, password, false);
        Ok(())
    }

    async fn check_password(&self, username: &str, password: &str) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .user_by_name(username)
            .is_some_and(|user| user.pass_hash == hash_password(password)))
    }

    async fn get_user(&self, username: &str) -> Result<Option<User>> {
        let state = self.state.lock().await;
        Ok(state.user_by_name(username).map(|user| User {
            user_id: user.user_id,
            username: user.username.clone(),
            admin: user.admin,
        }))
    }

    async fn elevate_to_admin(&self, username: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .iter_mut()
            .find(|user| user.username == username)
            .ok_or_else(|| anyhow!("no such user: {username}"))?;
        user.admin = true;
        Ok(())
    }

    async fn create_session(&self, username: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        state.calls.create_session += 1;
        let user_id = state
            .user_by_name(username)
            .map(|user| user.user_id)
            .ok_or_else(|| anyhow!("unknown user {username}"))?;
        let session_key = Uuid::new_v4().simple().to_string();
        state.sessions.insert(
            session_key.clone(),
            StoredSession {
                user_id,
                expires_at: Utc::now() + self.session_ttl,
            },
        );
        Ok(session_key)
    }

    async fn get_session_user(&self, session_key: &str) -> Result<Option<SessionUser>> {
        let mut state = self.state.lock().await;
        state.calls.get_session_user += 1;
        if state.failures.get_session_user {
            return Err(anyhow!("session lookup failed"));
        }
        let Some(session) = state.sessions.get(session_key) else {
            return Ok(None);
        };
        if session.expires_at <= Utc::now() {
            return Ok(None);
        }
        Ok(state.user_by_id(session.user_id).map(|user| SessionUser {
            user_id: user.user_id,
            username: user.username.clone(),
            admin: user.admin,
        }))
    }

    async fn update_session_liveness(&self, session_key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.update_session_liveness += 1;
        if state.failures.update_session_liveness {
            return Err(anyhow!("session liveness update failed"));
        }
        let now = Utc::now();
        let ttl = self.session_ttl;
        if let Some(session) = state.sessions.get_mut(session_key) {
            if session.expires_at > now {
                session.expires_at = now + ttl;
            }
        }
        Ok(())
    }

    async fn invalidate_session(&self, session_key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.invalidate_session += 1;
        state.sessions.remove(session_key);
        Ok(())
    }

    async fn user_authorizations(&self, user_id: i64) -> Result<Vec<Grant>> {
        let mut state = self.state.lock().await;
        state.calls.user_authorizations += 1;
        if state.failures.user_authorizations {
            return Err(anyhow!("authorization lookup failed"));
        }
        let mut grants: Vec<Grant> = state
            .grants
            .iter()
            .filter(|stored| stored.user_id == user_id && stored.grant.revoked.is_none())
            .map(|stored| stored.grant.clone())
            .collect();
        grants.sort_by(|a, b| a.granted.cmp(&b.granted).then(a.id.cmp(&b.id)));
        Ok(grants)
    }

    async fn grant_auth(&self, user_id: i64, auth: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let auth_id = state
            .auth_id(auth)
            .ok_or_else(|| anyhow!("no such authorization: {auth}"))?;
        let auth_name = state
            .auths
            .iter()
            .find(|(id, _)| *id == auth_id)
            .map(|(_, name)| name.clone())
            .unwrap_or_default();
        let now = Utc::now();
        match state
            .grants
            .iter_mut()
            .find(|stored| stored.user_id == user_id && stored.grant.id == auth_id)
        {
            Some(stored) => {
                stored.grant.granted = now;
                stored.grant.revoked = None;
            }
            None => state.grants.push(StoredGrant {
                user_id,
                grant: Grant {
                    id: auth_id,
                    auth: auth_name,
                    granted: now,
                    revoked: None,
                },
            }),
        }
        Ok(())
    }

    async fn revoke_auth(&self, user_id: i64, auth: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(auth_id) = state.auth_id(auth) else {
            return Ok(());
        };
        let now = Utc::now();
        for stored in &mut state.grants {
            if stored.user_id == user_id && stored.grant.id == auth_id {
                stored.grant.revoked.get_or_insert(now);
            }
        }
        Ok(())
    }

    async fn insert_audit_log(&self, username: &str, action: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.insert_audit_log += 1;
        if state.failures.insert_audit_log {
            return Err(anyhow!("audit insert failed"));
        }
        state.audit.push(AuditEntry {
            username: username.to_string(),
            action: action.to_string(),
            event_time: Utc::now(),
        });
        Ok(())
    }

    async fn latest_audit_entries(&self, limit: i64) -> Result<Vec<AuditEntry>> {
        let state = self.state.lock().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let skip = state.audit.len().saturating_sub(limit);
        Ok(state.audit.iter().skip(skip).cloned().collect())
    }
}
