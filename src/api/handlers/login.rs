use axum::{
    extract::{Extension, Form},
    http::{Extensions, StatusCode, header::SET_COOKIE},
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

use crate::auth::{AuthService, CSRF_FIELD, CsrfToken, LOGIN_PATH, set_authenticated_session};

#[derive(Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

impl std::fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginForm")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

pub async fn login_page(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(token): Extension<CsrfToken>,
) -> Html<String> {
    let action = auth.config().url_prefix().apply(LOGIN_PATH);
    let token = token.as_str();
    Html(format!(
        "<!doctype html><title>Login</title>\
         <form method=\"post\" action=\"{action}\">\
         <input type=\"hidden\" name=\"{CSRF_FIELD}\" value=\"{token}\">\
         <label>Username <input name=\"username\" autocomplete=\"username\"></label>\
         <label>Password <input name=\"password\" type=\"password\" autocomplete=\"current-password\"></label>\
         <button type=\"submit\">Log in</button>\
         </form>"
    ))
}

pub async fn login(
    Extension(auth): Extension<Arc<AuthService>>,
    mut extensions: Extensions,
    Form(form): Form<LoginForm>,
) -> Response {
    match auth
        .repo()
        .check_password(&form.username, &form.password)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            auth.audit()
                .post(&form.username, "failed authentication")
                .await;
            return auth.redirect(LOGIN_PATH);
        }
        Err(err) => {
            error!("Failed to check password: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let cookie = match set_authenticated_session(&auth, &mut extensions, &form.username).await {
        Ok(cookie) => cookie,
        Err(err) => {
            error!("Failed to set authenticated session: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    auth.audit().post(&form.username, "Authenticated").await;

    let mut response = auth.redirect("/");
    response.headers_mut().append(SET_COOKIE, cookie);
    response
}
