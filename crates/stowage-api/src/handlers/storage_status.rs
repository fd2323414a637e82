//! Storage status and re-selection endpoints.

use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use stowage_storage::SelectorStatus;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub environment: String,
    pub storage: SelectorStatus,
    pub max_upload_size_bytes: usize,
}

fn status_response(state: &AppState) -> StatusResponse {
    StatusResponse {
        environment: state.config.environment().to_string(),
        storage: state.storage.status(),
        max_upload_size_bytes: state.config.max_upload_size_bytes(),
    }
}

/// Report which backend is active. Never waits for a selection in progress.
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(status_response(&state))
}

/// Re-run backend selection and report the outcome.
#[tracing::instrument(skip(state), fields(operation = "reinitialize_storage"))]
pub async fn reinitialize_storage(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, HttpAppError> {
    let active = state.storage.reinitialize().await?;
    tracing::info!(
        backend = %active.backend(),
        generation = active.generation(),
        "Storage reinitialized on request"
    );
    Ok(Json(status_response(&state)))
}
