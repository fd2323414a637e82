//! File and storage route groups.

use super::health;
use crate::handlers;
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/live", get(health::liveness_check))
        .route("/ready", get(health::readiness_check))
}

/// Public file delivery.
pub fn public_file_routes() -> Router<Arc<AppState>> {
    Router::new().route("/files/{*path}", get(handlers::file_get::get_file))
}

/// Routes under `/api`; callers wrap them with the API key and rate limit layers.
pub fn api_routes(upload_body_limit: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/upload",
            post(handlers::file_upload::upload_file)
                .layer(DefaultBodyLimit::max(upload_body_limit)),
        )
        .route("/api/delete", delete(handlers::file_delete::delete_file))
        .route("/api/exists", get(handlers::file_exists::file_exists))
        .route("/api/status", get(handlers::storage_status::get_status))
        .route(
            "/api/storage/reinitialize",
            post(handlers::storage_status::reinitialize_storage),
        )
}
