use axum::{
    extract::Extension,
    http::{Extensions, header::SET_COOKIE},
    response::Response,
};
use std::sync::Arc;
use tracing::error;

use crate::auth::{
    AuthService, LOGIN_PATH, SESSION_COOKIE, cookies::clear_cookie, invalidate_session,
    session_user,
};

pub async fn logout(Extension(auth): Extension<Arc<AuthService>>, extensions: Extensions) -> Response {
    // The cookie is cleared even when the server-side record cannot be removed.
    match invalidate_session(&auth, &extensions).await {
        Ok(()) => {
            if let Some(details) = session_user(&extensions) {
                auth.audit()
                    .info(&format!("Session closed for {}", details.username));
            }
        }
        Err(err) => error!("Failed to invalidate session: {err:#}"),
    }

    let mut response = auth.redirect(LOGIN_PATH);
    match clear_cookie(SESSION_COOKIE) {
        Ok(cookie) => {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build session clearing cookie: {err}"),
    }
    response
}
