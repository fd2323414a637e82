//! Shared key validation for storage backends.
//!
//! Keys are relative, `/`-separated paths. Both backends normalize and validate
//! keys through [`normalize_key`] so a key that is valid for one backend is valid
//! for the other.

use crate::traits::{StorageError, StorageResult};

const MAX_KEY_LEN: usize = 1024;

/// Normalize a caller-supplied key.
///
/// Leading slashes are stripped. Empty keys, `..` or `.` segments, empty
/// segments, backslashes and control characters are rejected.
pub fn normalize_key(raw: &str) -> StorageResult<String> {
    let key = raw.trim_start_matches('/');

    if key.is_empty() {
        return Err(StorageError::InvalidKey("Storage key is empty".to_string()));
    }

    if key.len() > MAX_KEY_LEN {
        return Err(StorageError::InvalidKey(format!(
            "Storage key exceeds {} bytes",
            MAX_KEY_LEN
        )));
    }

    if key.contains('\\') || key.chars().any(char::is_control) {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }

    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StorageError::InvalidKey(
            "Storage key contains an empty or relative path segment".to_string(),
        ));
    }

    Ok(key.to_string())
}

/// Join an optional folder and a filename into a key.
pub fn join_key(folder: Option<&str>, filename: &str) -> StorageResult<String> {
    match folder.map(|f| f.trim_matches('/')).filter(|f| !f.is_empty()) {
        Some(folder) => normalize_key(&format!("{}/{}", folder, filename)),
        None => normalize_key(filename),
    }
}
