//! Client IP extraction for rate limiting.
//!
//! Behind a load balancer the socket peer is the proxy, so the client address is
//! taken from `X-Forwarded-For`, skipping the entries appended by trusted proxies.

use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

/// Extract the client IP, or `"unknown"` when none can be determined.
///
/// `trusted_proxy_count` is the number of proxies whose `X-Forwarded-For`
/// entries (at the end of the chain) are trusted. With zero trusted proxies the
/// last entry is used, since earlier entries are client-controlled.
pub fn extract_client_ip(
    headers: &HeaderMap,
    socket_addr: Option<&SocketAddr>,
    trusted_proxy_count: usize,
) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| from_forwarded_for(value, trusted_proxy_count));
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<IpAddr>().ok());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    socket_addr
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn from_forwarded_for(header_value: &str, trusted_proxy_count: usize) -> Option<IpAddr> {
    let ips: Vec<&str> = header_value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let candidate = if trusted_proxy_count == 0 || ips.len() <= trusted_proxy_count {
        ips.last()
    } else {
        ips.get(ips.len() - trusted_proxy_count - 1)
    }?;

    candidate.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_xff(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_client_before_trusted_proxies() {
        let headers = headers_with_xff("192.168.1.1, 10.0.0.1, 10.0.0.2");
        assert_eq!(extract_client_ip(&headers, None, 2), "192.168.1.1");
        assert_eq!(extract_client_ip(&headers, None, 1), "10.0.0.1");
    }

    #[test]
    fn test_no_trusted_proxies_uses_last_entry() {
        let headers = headers_with_xff("1.1.1.1, 10.0.0.1");
        assert_eq!(extract_client_ip(&headers, None, 0), "10.0.0.1");
    }

    #[test]
    fn test_invalid_forwarded_for_falls_back_to_socket() {
        let headers = headers_with_xff("not.an.ip");
        let socket = SocketAddr::from(([127, 0, 0, 1], 8080));
        assert_eq!(extract_client_ip(&headers, Some(&socket), 1), "127.0.0.1");
    }

    #[test]
    fn test_unknown_without_any_source() {
        assert_eq!(extract_client_ip(&HeaderMap::new(), None, 1), "unknown");
    }
}
