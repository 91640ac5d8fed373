//! Client address resolution

use std::net::SocketAddr;

use axum::http::HeaderMap;

const X_CLIENT_IP: &str = "x-client-ip";
const X_REAL_IP: &str = "x-real-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Best guess at the originating client address.
///
/// Proxy headers win over the socket peer, checked in the order
/// `X-Client-IP`, `X-Real-IP`, `X-Forwarded-For` (first hop).
/// IPv6 loopback is reported as `127.0.0.1`.
pub fn remote_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let from_header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let ip = from_header(X_CLIENT_IP)
        .or_else(|| from_header(X_REAL_IP))
        .or_else(|| {
            from_header(X_FORWARDED_FOR)
                .and_then(|v| v.split(',').next())
                .map(str::trim)
        })
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_default();

    if ip == "::1" {
        "127.0.0.1".to_string()
    } else {
        ip
    }
}
