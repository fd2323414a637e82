use crate::error::HttpAppError;
use crate::handlers::PathQuery;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub path: String,
    pub exists: bool,
}

pub async fn file_exists(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PathQuery>,
) -> Result<Json<ExistsResponse>, HttpAppError> {
    let path = query.required()?;

    let backend = state.storage.active_backend().await?;
    let exists = backend.exists(path).await?;

    Ok(Json(ExistsResponse {
        path: path.to_string(),
        exists,
    }))
}
