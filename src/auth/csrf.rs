//! One-time anti-forgery tokens for form submissions.
//!
//! [`set_csrf`] issues a token, mirrors it in the `_csrf` cookie and exposes
//! it to the handler as [`CsrfToken`]. [`require_csrf`] accepts a submission
//! only when the `csrf_token` field equals the cookie value, then clears the
//! cookie so the same token cannot be replayed from that browser.

use axum::{
    body::{Body, Bytes, to_bytes},
    extract::{FromRequest, Multipart, Request, State},
    http::{
        Extensions, HeaderMap, StatusCode,
        header::{CONTENT_TYPE, SET_COOKIE},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use rand::{RngCore, rngs::OsRng};
use std::sync::Arc;
use tracing::error;

use super::{AuthService, CSRF_COOKIE, CSRF_FIELD, attribution, cookies::clear_cookie};

const TOKEN_BYTES: usize = 16;

/// Token issued for the current request, to be embedded in the rendered form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsrfToken(pub String);

impl CsrfToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 32 lowercase hex characters from the OS RNG.
fn generate_token() -> Result<String, rand::Error> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(hex::encode(bytes))
}

pub async fn set_csrf(
    State(auth): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let username = attribution(request.extensions());

    let token = match generate_token() {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to generate CSRF token: {err}");
            auth.audit()
                .post(&username, "Failed to generate CSRF token")
                .await;
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let cookie = match auth.cookies().set_secure_cookie(
        CSRF_COOKIE,
        &token,
        auth.config().csrf_ttl_seconds(),
    ) {
        Ok(cookie) => cookie,
        Err(err) => {
            error!("Failed to build CSRF cookie: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    request.extensions_mut().insert(CsrfToken(token));
    let mut response = next.run(request).await;
    response.headers_mut().append(SET_COOKIE, cookie);
    response
}

pub async fn require_csrf(
    State(auth): State<Arc<AuthService>>,
    request: Request,
    next: Next,
) -> Response {
    let username = attribution(request.extensions());

    let cookie = auth
        .cookies()
        .cookie_value::<String>(request.headers(), CSRF_COOKIE);
    let expected = match cookie {
        Ok(token) => token,
        Err(_) => {
            auth.audit().post(&username, "missing CSRF token").await;
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    // From here on the token has been presented, so every outcome burns it.
    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, auth.config().max_form_bytes()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("Failed to read form body: {err}");
            auth.audit().post(&username, "mismatched CSRF token").await;
            return consumed(StatusCode::UNAUTHORIZED.into_response());
        }
    };

    let submitted = submitted_token(&parts.headers, &bytes, parts.uri.query()).await;
    if submitted.as_deref() != Some(expected.as_str()) {
        auth.audit().post(&username, "mismatched CSRF token").await;
        return consumed(StatusCode::UNAUTHORIZED.into_response());
    }

    auth.audit().post(&username, "Valid CSRF token").await;

    let request = Request::from_parts(parts, Body::from(bytes));
    consumed(next.run(request).await)
}

/// Append the `_csrf` clearing cookie to `response`.
fn consumed(mut response: Response) -> Response {
    match clear_cookie(CSRF_COOKIE) {
        Ok(cookie) => {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build CSRF clearing cookie: {err}"),
    }
    response
}

/// Form body takes precedence over the query string. Urlencoded and
/// multipart bodies are both searched.
async fn submitted_token(headers: &HeaderMap, body: &Bytes, query: Option<&str>) -> Option<String> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let from_body = if content_type.starts_with("application/x-www-form-urlencoded") {
        field_value(body)
    } else if content_type.starts_with("multipart/form-data") {
        multipart_value(content_type, body.clone()).await
    } else {
        None
    };
    from_body.or_else(|| query.and_then(|q| field_value(q.as_bytes())))
}

fn field_value(input: &[u8]) -> Option<String> {
    url::form_urlencoded::parse(input)
        .find(|(key, _)| key == CSRF_FIELD)
        .map(|(_, value)| value.into_owned())
}

async fn multipart_value(content_type: &str, body: Bytes) -> Option<String> {
    let request = axum::http::Request::builder()
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .ok()?;
    let mut multipart = Multipart::from_request(request, &()).await.ok()?;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some(CSRF_FIELD) {
            return field.text().await.ok();
        }
    }
    None
}

#[must_use]
pub fn csrf_token(extensions: &Extensions) -> Option<&CsrfToken> {
    extensions.get::<CsrfToken>()
}
