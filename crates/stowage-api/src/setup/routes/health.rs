//! Health check handlers and response types.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use stowage_storage::{SelectorState, StorageBackend};

/// Run an async check with timeout; returns status string "healthy", "timeout", or "{prefix}: {error}".
async fn run_check<F, E>(timeout: Duration, f: F, error_prefix: &str) -> String
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    match tokio::time::timeout(timeout, f).await {
        Ok(Ok(())) => "healthy".to_string(),
        Ok(Err(e)) => format!("{}: {}", error_prefix, e),
        Err(_) => "timeout".to_string(),
    }
}

#[derive(serde::Serialize)]
pub(super) struct HealthCheckResponse {
    pub status: String,
    pub storage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<StorageBackend>,
    pub using_remote: bool,
}

/// Liveness probe - process is running.
pub async fn liveness_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "alive" })),
    )
}

/// Readiness probe - a storage backend has been selected.
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.storage.status();
    let ready = status.state == SelectorState::Ready;

    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(serde_json::json!({
            "status": if ready { "ready" } else { "not_ready" },
            "storage": status.state,
            "backend": status.backend,
        })),
    )
}

/// Full health check: probes the active backend.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    const TIMEOUT: Duration = Duration::from_secs(5);

    let status = state.storage.status();
    let storage = if status.state == SelectorState::Ready {
        let selector = state.storage.clone();
        run_check(
            TIMEOUT,
            async move {
                let active = selector.active_backend().await.map_err(|e| e.to_string())?;
                match active.probe().await.reason() {
                    None => Ok(()),
                    Some(reason) => Err(reason.to_string()),
                }
            },
            "unhealthy",
        )
        .await
    } else {
        status.state.to_string()
    };

    let healthy = storage == "healthy";
    let response = HealthCheckResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        storage,
        backend: status.backend,
        using_remote: status.using_remote,
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}
