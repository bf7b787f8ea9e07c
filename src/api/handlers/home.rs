use axum::{
    extract::Extension,
    http::StatusCode,
    response::{Html, IntoResponse, Json},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::auth::{AuthService, Details};

#[derive(Serialize, Debug)]
pub struct Home {
    username: String,
    admin: bool,
    authorizations: Vec<String>,
}

pub async fn home(Extension(details): Extension<Details>) -> Json<Home> {
    debug!("Found auth details in request, username: {}", details.username);
    Json(Home {
        username: details.username,
        admin: details.admin,
        authorizations: details
            .authorizations
            .into_iter()
            .map(|grant| grant.auth)
            .collect(),
    })
}

pub async fn unauthorized(Extension(auth): Extension<Arc<AuthService>>) -> impl IntoResponse {
    let home = auth.config().url_prefix().apply("/");
    (
        StatusCode::FORBIDDEN,
        Html(format!(
            "<!doctype html><title>Unauthorized</title>\
             <p>You are not allowed to view that page.</p>\
             <p><a href=\"{home}\">Home</a></p>"
        )),
    )
}
