use crate::{
    audit::Logger,
    auth::{AuthConfig, AuthService, SecureCookie, require_admin, require_csrf, require_session, set_csrf},
    model::PgUsersRepo,
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    handler::Handler,
    http::{HeaderName, HeaderValue, Request},
    middleware::from_fn_with_state,
    routing::get,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;

pub mod handlers;

use handlers::{admin, health, home, login, logout};

/// Build the application router.
///
/// `/pool` and `/health` additionally need an `Extension<PgPool>` layered on
/// top; everything else only depends on `auth`.
#[must_use]
pub fn router(auth: Arc<AuthService>) -> Router {
    let session = from_fn_with_state(auth.clone(), require_session);
    let admin_only = from_fn_with_state(auth.clone(), require_admin);

    let administration = Router::new()
        .route("/pool", get(admin::pool))
        .route("/audit", get(admin::audit))
        .route_layer(admin_only)
        .route_layer(session.clone());

    let authenticated = Router::new()
        .route("/", get(home::home))
        .route("/unauthorized", get(home::unauthorized))
        .route("/logout", get(logout::logout).post(logout::logout))
        .route_layer(session);

    Router::new()
        .route(
            "/login",
            get(login::login_page.layer(from_fn_with_state(auth.clone(), set_csrf)))
                .post(login::login.layer(from_fn_with_state(auth.clone(), require_csrf))),
        )
        .route("/health", get(health::health))
        .merge(authenticated)
        .merge(administration)
        .layer(Extension(auth))
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    auth_config: AuthConfig,
    cookies: SecureCookie,
    audit_debug: bool,
) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let repo = Arc::new(
        PgUsersRepo::new(pool.clone()).with_session_ttl_seconds(auth_config.session_ttl_seconds()),
    );
    let audit = Logger::with_tracing(repo.clone(), audit_debug);
    let url_prefix = auth_config.url_prefix().clone();
    let auth = Arc::new(AuthService::new(auth_config, cookies, repo, audit));

    let app = url_prefix
        .group(router(auth))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span)),
        )
        .layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
