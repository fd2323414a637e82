use crate::error::HttpAppError;
use crate::handlers::PathQuery;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

#[tracing::instrument(skip(state, query), fields(operation = "delete_file"))]
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PathQuery>,
) -> Result<impl IntoResponse, HttpAppError> {
    let path = query.required()?;

    let backend = state.storage.active_backend().await?;
    backend.delete(path).await?;

    tracing::info!(path = %path, backend = %backend.backend(), "File deleted");

    Ok(Json(serde_json::json!({
        "success": true,
        "path": path,
    })))
}
