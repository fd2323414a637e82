use crate::error::HttpAppError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use stowage_core::AppError;
use subtle::ConstantTimeEq;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct ApiKeyState {
    pub api_key: String,
}

/// Constant-time string comparison to prevent timing attacks on the API key.
fn secure_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Reject requests that do not carry the configured key in `X-API-Key`.
pub async fn api_key_middleware(
    State(auth): State<Arc<ApiKeyState>>,
    request: Request,
    next: Next,
) -> Response {
    let rejection = match request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(key) if secure_compare(key, &auth.api_key) => None,
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "Rejected request with invalid API key");
            Some("Invalid API key")
        }
        None => Some("API key required"),
    };

    match rejection {
        None => next.run(request).await,
        Some(message) => HttpAppError(AppError::Unauthorized(message.to_string())).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_compare() {
        assert!(secure_compare("abc", "abc"));
        assert!(!secure_compare("abc", "abd"));
        assert!(!secure_compare("abc", "abcd"));
    }
}
