//! Admin and named-grant checks on a resolved identity.
//!
//! Mount these inside [`super::require_session`]; without [`Details`] the
//! caller is sent to the login page. A denial is audited and always ends the
//! request with a redirect to `/unauthorized`.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::{AuthService, Details, LOGIN_PATH, UNAUTHORIZED_PATH};

pub async fn require_admin(
    State(auth): State<Arc<AuthService>>,
    request: Request,
    next: Next,
) -> Response {
    let Some((username, admin)) = request
        .extensions()
        .get::<Details>()
        .map(|d| (d.username.clone(), d.admin))
    else {
        return auth.redirect(LOGIN_PATH);
    };

    if !admin {
        let denied = auth.audit().postf(
            &username,
            format_args!(
                "Attempted to access {} {}, not admin",
                request.method(),
                request.uri().path()
            ),
        );
        denied.await;
        return auth.redirect(UNAUTHORIZED_PATH);
    }

    next.run(request).await
}

/// State for [`require_grant`]: the service plus the grant to demand.
#[derive(Clone, Debug)]
pub struct GrantGuard {
    auth: Arc<AuthService>,
    grant: Arc<str>,
}

impl GrantGuard {
    #[must_use]
    pub fn new(auth: Arc<AuthService>, grant: &str) -> Self {
        Self {
            auth,
            grant: Arc::from(grant),
        }
    }
}

pub async fn require_grant(
    State(guard): State<GrantGuard>,
    request: Request,
    next: Next,
) -> Response {
    let Some((username, granted)) = request
        .extensions()
        .get::<Details>()
        .map(|d| (d.username.clone(), d.has_auth(&guard.grant)))
    else {
        return guard.auth.redirect(LOGIN_PATH);
    };

    if !granted {
        let denied = guard.auth.audit().postf(
            &username,
            format_args!(
                "Attempted to access {} {}, not granted auth {}",
                request.method(),
                request.uri().path(),
                guard.grant
            ),
        );
        denied.await;
        return guard.auth.redirect(UNAUTHORIZED_PATH);
    }

    next.run(request).await
}
