//! Multipart upload parsing

use axum::extract::Multipart;
use bytes::Bytes;
use stowage_core::AppError;

/// A file received through `POST /api/upload`.
#[derive(Debug)]
pub struct UploadedFile {
    pub data: Bytes,
    pub filename: String,
    pub content_type: String,
    /// Optional destination folder from the `path` form field.
    pub folder: Option<String>,
}

/// Extract the `file` field and the optional `path` field from a multipart form.
/// Exactly one `file` field is accepted.
pub async fn extract_multipart_file(mut multipart: Multipart) -> Result<UploadedFile, AppError> {
    let mut file: Option<(Bytes, Option<String>, Option<String>)> = None;
    let mut folder: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("Failed to read multipart: {}", e)))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                if file.is_some() {
                    return Err(AppError::InvalidInput(
                        "Multiple file fields are not allowed; send exactly one field named 'file'"
                            .to_string(),
                    ));
                }
                let filename = field.file_name().map(String::from);
                let content_type = field.content_type().map(String::from);
                let data = field.bytes().await.map_err(|e| {
                    AppError::InvalidInput(format!("Failed to read file data: {}", e))
                })?;
                file = Some((data, filename, content_type));
            }
            "path" => {
                let value = field.text().await.map_err(|e| {
                    AppError::InvalidInput(format!("Failed to read path field: {}", e))
                })?;
                folder = Some(value).filter(|v| !v.trim().is_empty());
            }
            _ => {}
        }
    }

    let (data, filename, content_type) =
        file.ok_or_else(|| AppError::InvalidInput("No file provided".to_string()))?;

    let filename = sanitize_filename(filename.as_deref().unwrap_or_default())
        .ok_or_else(|| AppError::InvalidInput("File name is missing or invalid".to_string()))?;
    let content_type = content_type
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| crate::utils::content_type::from_path(&filename).to_string());

    Ok(UploadedFile {
        data,
        filename,
        content_type,
        folder,
    })
}

/// Reduce a client-supplied filename to its last path component, replacing
/// characters outside `[A-Za-z0-9._-]` with `_`.
///
/// Returns `None` when nothing usable is left (empty, `.` or `..`).
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let name = raw.rsplit(|c| c == '/' || c == '\\').next().unwrap_or_default().trim();

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        None
    } else {
        Some(sanitized)
    }
}

/// Validate file size
pub fn validate_file_size(file_size: usize, max_size: usize) -> Result<(), AppError> {
    if file_size > max_size {
        return Err(AppError::PayloadTooLarge(format!(
            "File size exceeds maximum allowed size of {} MB",
            max_size / 1024 / 1024
        )));
    }
    Ok(())
}
