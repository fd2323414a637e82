use crate::error::HttpAppError;
use crate::state::AppState;
use crate::utils::upload::{extract_multipart_file, validate_file_size};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use stowage_storage::keys::join_key;
use stowage_storage::{StorageBackend, StoredLocation};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub key: String,
    pub url: String,
    pub size: usize,
    pub content_type: String,
    pub backend: StorageBackend,
    pub location: StoredLocation,
}

/// Store one multipart `file` under `{path}/{filename}` on the active backend.
#[tracing::instrument(skip(state, multipart), fields(operation = "upload_file"))]
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, HttpAppError> {
    let upload = extract_multipart_file(multipart).await?;
    validate_file_size(upload.data.len(), state.config.max_upload_size_bytes())?;

    let key = join_key(upload.folder.as_deref(), &upload.filename)?;
    let size = upload.data.len();

    let backend = state.storage.active_backend().await?;
    let location = backend
        .store(&key, &upload.content_type, upload.data)
        .await?;

    tracing::info!(
        key = %location.key(),
        size_bytes = size,
        backend = %backend.backend(),
        "File uploaded"
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            success: true,
            key: location.key().to_string(),
            url: location.url().to_string(),
            size,
            content_type: upload.content_type,
            backend: backend.backend(),
            location,
        }),
    ))
}
