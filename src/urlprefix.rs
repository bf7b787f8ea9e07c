//! Path prefix applied when the service is mounted below the site root.
//!
//! The prefix is read once at startup (`--url-prefix`) and shared immutably;
//! redirects and router nesting both go through it so a deployment under
//! `/app` never leaks an unprefixed `Location` header.

use axum::Router;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UrlPrefix {
    prefix: String,
}

/// Strip leading and trailing runs of whitespace and slashes.
fn cleanse(value: &str) -> &str {
    value.trim_matches(|c: char| c.is_whitespace() || c == '/')
}

impl UrlPrefix {
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let cleaned = cleanse(raw);
        if cleaned.is_empty() {
            return Self::default();
        }
        Self {
            prefix: format!("/{cleaned}"),
        }
    }

    /// The normalized prefix, empty when the service is mounted at the root.
    #[must_use]
    pub fn get(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefix.is_empty()
    }

    /// Apply the prefix to an application path, e.g. `login` -> `/app/login`.
    #[must_use]
    pub fn apply(&self, path: &str) -> String {
        let path = format!("/{}", cleanse(path));
        if self.prefix.is_empty() || path.starts_with(&self.prefix) {
            return path;
        }
        format!("{}{path}", self.prefix)
    }

    /// Mount `router` below the prefix. Requests outside the prefix fall
    /// through to the default 404.
    pub fn group<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        if self.prefix.is_empty() {
            return router;
        }
        Router::new().nest(&self.prefix, router)
    }
}
