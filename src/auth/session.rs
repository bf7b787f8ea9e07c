//! Session resolution, creation and invalidation.

use anyhow::{Context, Result, anyhow};
use axum::{
    extract::{Request, State},
    http::{Extensions, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{AuthService, Details, LOGIN_PATH, SESSION_COOKIE};
use crate::audit::ANONYMOUS_USER;

/// Resolve the session cookie into [`Details`] or redirect to the login page.
///
/// On success the session's liveness window is extended and the user's
/// grants are reloaded, so a revoked grant stops working on the next request.
pub async fn require_session(
    State(auth): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let cookie = auth
        .cookies()
        .cookie_value::<String>(request.headers(), SESSION_COOKIE);
    let session_key = match cookie {
        Ok(key) => key,
        Err(err) => {
            debug!("No usable session cookie: {err}");
            return auth.redirect(LOGIN_PATH);
        }
    };

    let user = match auth.repo().get_session_user(&session_key).await {
        Ok(Some(user)) if !user.username.is_empty() => user,
        Ok(_) => {
            auth.audit()
                .post(ANONYMOUS_USER, "Failed to get user details for session")
                .await;
            return auth.redirect(LOGIN_PATH);
        }
        Err(err) => {
            warn!("Failed to look up session: {err:#}");
            auth.audit()
                .post(ANONYMOUS_USER, "Failed to get user details for session")
                .await;
            return auth.redirect(LOGIN_PATH);
        }
    };

    if let Err(err) = auth.repo().update_session_liveness(&session_key).await {
        error!("Failed to update session liveness: {err:#}");
        auth.audit()
            .post(&user.username, "Failed to update session liveness")
            .await;
        return (StatusCode::INTERNAL_SERVER_ERROR, "Session management error").into_response();
    }

    let authorizations = match auth.repo().user_authorizations(user.user_id).await {
        Ok(grants) => grants,
        Err(err) => {
            error!("Failed to load authorizations: {err:#}");
            auth.audit()
                .post(&user.username, "Failed to load user authorizations")
                .await;
            return (StatusCode::INTERNAL_SERVER_ERROR, "Session management error")
                .into_response();
        }
    };

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let username = user.username.clone();

    request.extensions_mut().insert(Details {
        user_id: user.user_id,
        username: user.username,
        admin: user.admin,
        session_key,
        authorizations,
    });

    let visit = auth.audit().postf(&username, format_args!("{method} {path}"));
    visit.await;

    next.run(request).await
}

/// Create a session for `username`, attach its [`Details`] to `extensions`
/// and return the `Set-Cookie` header carrying the session key.
///
/// Nothing is attached unless every step succeeds.
///
/// # Errors
/// Returns an error if the session cannot be created, re-read or sealed.
pub async fn set_authenticated_session(
    auth: &AuthService,
    extensions: &mut Extensions,
    username: &str,
) -> Result<HeaderValue> {
    let session_key = auth
        .repo()
        .create_session(username)
        .await
        .context("failed to create session")?;

    let user = auth
        .repo()
        .get_session_user(&session_key)
        .await
        .context("failed to read back session")?
        .ok_or_else(|| anyhow!("session for {username} vanished after creation"))?;

    let authorizations = auth
        .repo()
        .user_authorizations(user.user_id)
        .await
        .context("failed to load authorizations")?;

    let cookie = auth
        .cookies()
        .set_secure_cookie(
            SESSION_COOKIE,
            &session_key,
            auth.config().session_ttl_seconds(),
        )
        .context("failed to build session cookie")?;

    extensions.insert(Details {
        user_id: user.user_id,
        username: user.username,
        admin: user.admin,
        session_key,
        authorizations,
    });

    Ok(cookie)
}

/// Delete the server-side session behind `extensions`, if any.
///
/// # Errors
/// Propagates repository failures.
pub async fn invalidate_session(auth: &AuthService, extensions: &Extensions) -> Result<()> {
    let Some(details) = extensions.get::<Details>() else {
        return Ok(());
    };
    auth.repo()
        .invalidate_session(&details.session_key)
        .await
        .context("failed to invalidate session")
}

#[must_use]
pub fn session_user(extensions: &Extensions) -> Option<&Details> {
    extensions.get::<Details>()
}
