//! Audit trail of security-relevant decisions.
//!
//! Entries are persisted through [`UsersRepo::insert_audit_log`] and mirrored
//! to a [`LogDelegate`]. Persistence is best effort: a failed insert is
//! reported on the delegate's error channel and otherwise ignored.

use std::{fmt, future::Future, sync::Arc};

use crate::model::UsersRepo;

/// Attribution used when no identity is established.
pub const ANONYMOUS_USER: &str = "<anonymous>";

/// Sink for human-readable audit messages.
pub trait LogDelegate: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
    fn debug(&self, message: &str);
}

/// Forwards audit messages to `tracing` under the `audit` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingDelegate {
    debug_enabled: bool,
}

impl TracingDelegate {
    #[must_use]
    pub fn new(debug_enabled: bool) -> Self {
        Self { debug_enabled }
    }
}

impl LogDelegate for TracingDelegate {
    fn info(&self, message: &str) {
        tracing::info!(target: "audit", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "audit", "{message}");
    }

    fn debug(&self, message: &str) {
        if self.debug_enabled {
            tracing::debug!(target: "audit", "{message}");
        }
    }
}

#[derive(Clone)]
pub struct Logger {
    repo: Arc<dyn UsersRepo>,
    delegate: Arc<dyn LogDelegate>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

impl Logger {
    #[must_use]
    pub fn new(repo: Arc<dyn UsersRepo>, delegate: Arc<dyn LogDelegate>) -> Self {
        Self { repo, delegate }
    }

    /// Logger backed by [`TracingDelegate`].
    #[must_use]
    pub fn with_tracing(repo: Arc<dyn UsersRepo>, debug_enabled: bool) -> Self {
        Self::new(repo, Arc::new(TracingDelegate::new(debug_enabled)))
    }

    #[must_use]
    pub fn delegate(&self) -> &dyn LogDelegate {
        self.delegate.as_ref()
    }

    /// Record `action` against `username`. Never fails.
    pub async fn post(&self, username: &str, action: &str) {
        self.delegate.debug(&format!("audit: {username} {action}"));
        if let Err(err) = self.repo.insert_audit_log(username, action).await {
            self.delegate
                .error(&format!("failed to record audit entry for {username}: {err:#}"));
        }
    }

    /// Operational note on the delegate's info channel. Not persisted.
    pub fn info(&self, message: &str) {
        self.delegate.info(message);
    }

    /// Formatted variant of [`Logger::post`].
    ///
    /// ```ignore
    /// logger.postf(ANONYMOUS_USER, format_args!("{} {}", method, path)).await;
    /// ```
    pub fn postf<'a>(
        &'a self,
        username: &'a str,
        args: fmt::Arguments<'_>,
    ) -> impl Future<Output = ()> + Send + 'a {
        let action = args.to_string();
        async move { self.post(username, &action).await }
    }
}
