pub mod file_delete;
pub mod file_exists;
pub mod file_get;
pub mod file_upload;
pub mod storage_status;

use serde::Deserialize;
use stowage_core::AppError;

/// `?path=` query used by the delete and exists endpoints.
#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

impl PathQuery {
    pub fn required(&self) -> Result<&str, AppError> {
        self.path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::InvalidInput("Query parameter 'path' is required".to_string()))
    }
}
