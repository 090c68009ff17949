use axum::extract::Extension;
use axum::http::StatusCode;
use axum::Json;
use log::error;
use std::sync::Arc;

use crate::db::Database;
use crate::models::{HealthResponse, VersionResponse};

/// Return build info (`GET /version`).
pub async fn get_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        build_date: env!("CELL_BUILD_DATE"),
        rustc_version: env!("CELL_RUSTC_VERSION"),
    })
}

/// Health check that verifies database connectivity (`GET /health`).
pub async fn health_check(
    Extension(database): Extension<Arc<dyn Database>>,
) -> (StatusCode, Json<HealthResponse>) {
    let (status, db_status) = match database.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            error!("health_check: database error: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "error")
        }
    };

    let overall = if status == StatusCode::OK {
        "healthy"
    } else {
        "degraded"
    };

    (
        status,
        Json(HealthResponse {
            status: overall.to_string(),
            database: db_status.to_string(),
            backend: database.backend(),
        }),
    )
}
