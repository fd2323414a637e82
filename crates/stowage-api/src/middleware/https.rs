use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// HTTPS enforcement configuration
#[derive(Clone, Debug)]
pub struct HttpsConfig {
    pub enforce: bool,
}

impl HttpsConfig {
    pub fn new(enforce: bool) -> Self {
        Self { enforce }
    }
}

/// Redirect plain-HTTP requests to HTTPS.
///
/// TLS terminates at the load balancer, so the original scheme is read from
/// `X-Forwarded-Proto`. Requests without it are treated as plain HTTP.
pub async fn https_redirect_middleware(
    State(config): State<Arc<HttpsConfig>>,
    request: Request,
    next: Next,
) -> Response {
    if !config.enforce {
        return next.run(request).await;
    }

    let forwarded_proto = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase());
    if forwarded_proto.as_deref() == Some("https") {
        return next.run(request).await;
    }

    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let location = format!("https://{}{}", host, path_and_query);

    match HeaderValue::from_str(&location) {
        Ok(location) if !host.is_empty() => {
            (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
        }
        _ => {
            tracing::warn!(host = %host, "Cannot build HTTPS redirect, rejecting request");
            (StatusCode::BAD_REQUEST, "HTTPS required").into_response()
        }
    }
}
