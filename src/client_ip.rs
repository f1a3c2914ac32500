use std::net::IpAddr;

use axum::http::HeaderMap;
use ipnet::IpNet;

/// Resolve the client address for rate limiting.
///
/// `X-Forwarded-For` is only honoured when the direct peer is a trusted proxy.
pub fn resolve(headers: &HeaderMap, peer: IpAddr, trusted_proxies: &[IpNet]) -> IpAddr {
    if trusted_proxies.is_empty() || !trusted_proxies.iter().any(|net| net.contains(&peer)) {
        return peer;
    }

    let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) else {
        return peer;
    };

    // First (leftmost) address that isn't one of our proxies
    xff.split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .find(|ip| !trusted_proxies.iter().any(|net| net.contains(ip)))
        .unwrap_or(peer)
}
