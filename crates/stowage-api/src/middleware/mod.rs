pub mod api_key;
pub mod https;
pub mod rate_limit;
pub mod security_headers;
