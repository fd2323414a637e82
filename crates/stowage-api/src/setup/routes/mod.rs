//! Route configuration and setup.
//!
//! File and storage route groups live in [domains](domains); health checks in [health](health).

mod domains;
mod health;

use crate::middleware::{
    api_key::{api_key_middleware, ApiKeyState, API_KEY_HEADER},
    https::{https_redirect_middleware, HttpsConfig},
    rate_limit::{rate_limit_middleware, HttpRateLimiter},
    security_headers::{security_headers_middleware, SecurityHeadersConfig},
};
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    Router,
};
use std::sync::Arc;
use stowage_core::Config;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Headroom for multipart boundaries and the `path` field on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Setup all application routes
pub async fn setup_routes(
    config: &Config,
    state: Arc<AppState>,
) -> Result<Router<()>, anyhow::Error> {
    let cors = setup_cors(config)?;
    let rate_limiter = setup_rate_limiter(config);
    let api_key_state = Arc::new(ApiKeyState {
        api_key: config.api_key().to_string(),
    });

    let upload_body_limit = config
        .max_upload_size_bytes()
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let api_routes = domains::api_routes(upload_body_limit)
        .layer(axum::middleware::from_fn_with_state(
            api_key_state,
            api_key_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    let security_headers_config = Arc::new(SecurityHeadersConfig::new(config.is_production()));

    let enforce_https = config.is_production() && config.enforce_https();
    if enforce_https {
        tracing::info!("HTTPS enforcement enabled (X-Forwarded-Proto)");
    }
    let https_config = Arc::new(HttpsConfig::new(enforce_https));

    let http_concurrency_limit = std::env::var("HTTP_CONCURRENCY_LIMIT")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(10_000)
        .max(1);
    tracing::info!(
        http_concurrency_limit = http_concurrency_limit,
        "HTTP concurrency limit layer enabled"
    );

    let app = Router::new()
        .merge(domains::health_routes())
        .merge(domains::public_file_routes())
        .merge(api_routes)
        .layer(DefaultBodyLimit::max(config.json_body_limit_bytes()))
        .layer(RequestBodyLimitLayer::new(upload_body_limit))
        .layer(ConcurrencyLimitLayer::new(http_concurrency_limit))
        .layer(cors)
        .layer(axum::middleware::from_fn_with_state(
            security_headers_config,
            security_headers_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(
            https_config,
            https_redirect_middleware,
        ))
        .with_state(state);

    Ok(app)
}

fn setup_cors(config: &Config) -> Result<CorsLayer, anyhow::Error> {
    let methods = [
        Method::GET,
        Method::POST,
        Method::DELETE,
        Method::HEAD,
        Method::OPTIONS,
    ];
    let headers = [header::CONTENT_TYPE, HeaderName::from_static(API_KEY_HEADER)];

    let cors = if config.cors_origins().iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow all origins - not recommended for production");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers)
    } else {
        let origins = config
            .cors_origins()
            .iter()
            .map(|o| {
                o.parse::<HeaderValue>()
                    .map_err(|e| anyhow::anyhow!("Invalid CORS origin '{}': {}", o, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
    };
    Ok(cors)
}

fn setup_rate_limiter(config: &Config) -> Arc<HttpRateLimiter> {
    let shard_count = std::env::var("RATE_LIMITER_SHARD_COUNT")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(16)
        .max(1);
    let trusted_proxy_count = std::env::var("TRUSTED_PROXY_COUNT")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1);

    let rate_limiter = Arc::new(
        HttpRateLimiter::with_shards(
            config.rate_limit_max(),
            config.rate_limit_window(),
            shard_count,
        )
        .with_trusted_proxy_count(trusted_proxy_count),
    );

    let rate_limiter_for_cleanup = rate_limiter.clone();
    let cleanup_every = config.rate_limit_window();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_every);
        loop {
            interval.tick().await;
            rate_limiter_for_cleanup.cleanup_expired_buckets().await;
        }
    });

    tracing::info!(
        rate_limit_max = config.rate_limit_max(),
        rate_limit_window_ms = config.rate_limit_window().as_millis() as u64,
        shard_count = shard_count,
        "HTTP rate limiting enabled on /api routes"
    );
    rate_limiter
}
