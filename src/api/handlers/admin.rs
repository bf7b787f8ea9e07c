use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::auth::{AuthService, Details};

const DEFAULT_AUDIT_LIMIT: i64 = 50;
const MAX_AUDIT_LIMIT: i64 = 500;

#[derive(Serialize, Debug)]
pub struct PoolStats {
    username: String,
    size: u32,
    idle: usize,
    max_connections: u32,
    closed: bool,
}

pub async fn pool(
    Extension(details): Extension<Details>,
    Extension(pool): Extension<PgPool>,
) -> Json<PoolStats> {
    Json(PoolStats {
        username: details.username,
        size: pool.size(),
        idle: pool.num_idle(),
        max_connections: pool.options().get_max_connections(),
        closed: pool.is_closed(),
    })
}

#[derive(Deserialize, Debug, Default)]
pub struct AuditQuery {
    limit: Option<i64>,
}

fn audit_limit(query: &AuditQuery) -> i64 {
    query
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT)
}

pub async fn audit(
    Extension(auth): Extension<Arc<AuthService>>,
    Query(query): Query<AuditQuery>,
) -> Response {
    match auth.repo().latest_audit_entries(audit_limit(&query)).await {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => {
            error!("Failed to fetch audit entries: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
