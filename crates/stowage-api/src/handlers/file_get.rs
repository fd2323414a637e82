//! Public file route: streams a stored file from the active backend (no auth).

use crate::error::HttpAppError;
use crate::state::AppState;
use crate::utils::content_type;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
};
use futures::StreamExt;
use std::sync::Arc;
use stowage_core::AppError;

#[tracing::instrument(skip(state), fields(operation = "get_file"))]
pub async fn get_file(
    Path(path): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, HttpAppError> {
    let backend = state.storage.active_backend().await?;
    let object = backend.retrieve(&path).await?;

    let key = object.key.clone();
    let body_stream = object.stream.map(move |result| {
        result.map_err(|e| std::io::Error::other(format!("Storage stream error: {}", e)))
    });

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type::from_path(&key))
        .header(header::CACHE_CONTROL, "public, max-age=3600");
    if let Some(size) = object.size {
        builder = builder.header(header::CONTENT_LENGTH, size);
    }

    builder.body(Body::from_stream(body_stream)).map_err(|e| {
        tracing::error!(error = %e, key = %key, "Failed to build response");
        HttpAppError::from(AppError::Internal(e.to_string()))
    })
}
