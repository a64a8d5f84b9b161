use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::http::HeaderMap;
use ipnet::IpNet;

/// The address download grants are keyed by.
///
/// The socket peer is authoritative unless it is one of `trusted_proxies`; then the right-most
/// `X-Forwarded-For` hop that is not a trusted proxy wins. Without a peer (requests driven
/// in-process) the left-most forwarded address is used, and failing that the unspecified address.
pub fn client_ip(peer: Option<SocketAddr>, headers: &HeaderMap, trusted_proxies: &[IpNet]) -> IpAddr {
    let is_trusted = |ip: &IpAddr| trusted_proxies.iter().any(|net| net.contains(ip));

    match peer.map(|addr| addr.ip()) {
        Some(ip) if is_trusted(&ip) => forwarded_hops(headers)
            .into_iter()
            .rev()
            .find(|hop| !is_trusted(hop))
            .unwrap_or(ip),
        Some(ip) => ip,
        None => forwarded_hops(headers)
            .into_iter()
            .next()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
    }
}

/// Parsed `X-Forwarded-For` hops, client first. Unparseable entries are skipped.
fn forwarded_hops(headers: &HeaderMap) -> Vec<IpAddr> {
    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|hop| hop.trim().parse().ok())
        .collect()
}
