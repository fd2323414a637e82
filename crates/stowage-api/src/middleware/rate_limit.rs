use crate::utils::ip_extraction::extract_client_ip;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const RATE_LIMIT_MESSAGE: &str = "Too many requests from this IP, please try again later.";

/// Fixed-window counter for one client.
#[derive(Clone, Debug)]
struct RateLimitBucket {
    count: u32,
    reset_at: Instant,
}

impl RateLimitBucket {
    fn new(window: Duration) -> Self {
        Self {
            count: 0,
            reset_at: Instant::now() + window,
        }
    }

    fn check_and_increment(&mut self, limit: u32, window: Duration) -> Result<u32, Duration> {
        let now = Instant::now();

        if now >= self.reset_at {
            self.count = 0;
            self.reset_at = now + window;
        }

        if self.count < limit {
            self.count += 1;
            Ok(limit.saturating_sub(self.count))
        } else {
            Err(self.reset_at.saturating_duration_since(now))
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32, reset_in: Duration },
    Limited { reset_in: Duration },
}

/// Sharded in-memory rate limiter
///
/// Keys are hashed onto a fixed number of shards so concurrent requests from
/// different clients rarely contend on the same lock.
#[derive(Clone)]
pub struct HttpRateLimiter {
    shards: Vec<Arc<Mutex<HashMap<String, RateLimitBucket>>>>,
    limit: u32,
    window: Duration,
    trusted_proxy_count: usize,
    max_buckets: usize,
}

impl HttpRateLimiter {
    pub fn with_shards(limit: u32, window: Duration, shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Arc::new(Mutex::new(HashMap::new())))
            .collect();
        Self {
            shards,
            limit,
            window,
            trusted_proxy_count: 1,
            max_buckets: 10_000,
        }
    }

    /// Number of reverse proxies in front of the service whose
    /// `X-Forwarded-For` entries are trusted.
    pub fn with_trusted_proxy_count(mut self, count: usize) -> Self {
        self.trusted_proxy_count = count;
        self
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    fn shard_for(&self, key: &str) -> &Mutex<HashMap<String, RateLimitBucket>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Drop buckets whose window has ended.
    pub async fn cleanup_expired_buckets(&self) {
        let now = Instant::now();
        let mut total_cleaned = 0;

        for shard in &self.shards {
            let mut buckets = shard.lock().await;
            let before = buckets.len();
            buckets.retain(|_, bucket| bucket.reset_at > now);
            total_cleaned += before - buckets.len();
        }

        if total_cleaned > 0 {
            tracing::debug!(
                buckets_cleaned = total_cleaned,
                "Cleaned up expired rate limit buckets"
            );
        }
    }

    pub async fn check(&self, key: &str) -> RateLimitDecision {
        let mut buckets = self.shard_for(key).lock().await;

        if buckets.len() >= self.max_buckets {
            let now = Instant::now();
            buckets.retain(|_, bucket| bucket.reset_at > now);

            if buckets.len() >= self.max_buckets {
                let oldest_key = buckets
                    .iter()
                    .min_by_key(|(_, bucket)| bucket.reset_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest_key) = oldest_key {
                    buckets.remove(&oldest_key);
                }
            }
        }

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| RateLimitBucket::new(self.window));

        match bucket.check_and_increment(self.limit, self.window) {
            Ok(remaining) => RateLimitDecision::Allowed {
                remaining,
                reset_in: bucket.reset_at.saturating_duration_since(Instant::now()),
            },
            Err(reset_in) => RateLimitDecision::Limited { reset_in },
        }
    }
}

fn set_header(response: &mut Response, name: &'static str, value: impl ToString) {
    if let Ok(header_value) = HeaderValue::from_str(&value.to_string()) {
        response.headers_mut().insert(name, header_value);
    }
}

/// Per-client-IP rate limiting for the `/api` routes.
///
/// Adds `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`
/// (seconds) to every response and `Retry-After` to `429` responses.
pub async fn rate_limit_middleware(
    State(rate_limiter): State<Arc<HttpRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let socket_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = extract_client_ip(
        request.headers(),
        socket_addr.as_ref(),
        rate_limiter.trusted_proxy_count,
    );
    let key = format!("ip:{}", ip);
    let limit = rate_limiter.limit();

    match rate_limiter.check(&key).await {
        RateLimitDecision::Allowed {
            remaining,
            reset_in,
        } => {
            let mut response = next.run(request).await;
            set_header(&mut response, "X-RateLimit-Limit", limit);
            set_header(&mut response, "X-RateLimit-Remaining", remaining);
            set_header(&mut response, "X-RateLimit-Reset", reset_in.as_secs().max(1));
            response
        }
        RateLimitDecision::Limited { reset_in } => {
            let reset_seconds = reset_in.as_secs().max(1);
            tracing::warn!(
                client_ip = %ip,
                path = %request.uri().path(),
                limit,
                "Rate limit exceeded"
            );

            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                axum::Json(serde_json::json!({
                    "error": RATE_LIMIT_MESSAGE,
                    "code": "RATE_LIMITED",
                    "recoverable": true,
                })),
            )
                .into_response();

            set_header(&mut response, "X-RateLimit-Limit", limit);
            set_header(&mut response, "X-RateLimit-Remaining", 0);
            set_header(&mut response, "X-RateLimit-Reset", reset_seconds);
            set_header(&mut response, "Retry-After", reset_seconds);
            response
        }
    }
}
