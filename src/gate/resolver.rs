//! Client key resolution with an explicit proxy trust boundary.

use axum::http::header::HeaderName;
use axum::http::HeaderMap;
use std::collections::HashSet;
use std::net::IpAddr;

use crate::ratelimit::ClientKey;

/// Key used when the peer address is unknown.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Header consulted when a trusted proxy forwards a request.
pub const DEFAULT_FORWARDED_HEADER: &str = "x-forwarded-for";

/// Derives a [`ClientKey`] for a request.
///
/// Forwarded headers are only honoured when trust is enabled and the direct
/// peer is one of the configured proxies. Anyone can send the header, so
/// otherwise the peer address is the only identity that cannot be forged.
#[derive(Debug, Clone)]
pub struct ClientKeyResolver {
    /// Whether forwarded headers are considered at all
    enabled: bool,
    /// Header carrying the forwarding chain
    header: HeaderName,
    /// Peers allowed to set the header
    trusted_peers: HashSet<IpAddr>,
}

impl ClientKeyResolver {
    /// Create a resolver that always keys on the peer address.
    pub fn untrusted() -> Self {
        Self {
            enabled: false,
            header: HeaderName::from_static(DEFAULT_FORWARDED_HEADER),
            trusted_peers: HashSet::new(),
        }
    }

    /// Create a resolver that honours `header` from the given proxies.
    pub fn trusting<I>(header: HeaderName, trusted_peers: I) -> Self
    where
        I: IntoIterator<Item = IpAddr>,
    {
        Self {
            enabled: true,
            header,
            trusted_peers: trusted_peers
                .into_iter()
                .map(|ip| ip.to_canonical())
                .collect(),
        }
    }

    /// Whether the resolver ever reads forwarded headers.
    pub fn trust_enabled(&self) -> bool {
        self.enabled
    }

    /// Resolve the key for a request from `peer` carrying `headers`.
    pub fn resolve(&self, peer: Option<IpAddr>, headers: &HeaderMap) -> ClientKey {
        let Some(peer) = peer.map(|ip| ip.to_canonical()) else {
            return ClientKey::new(UNKNOWN_CLIENT);
        };

        if !self.is_trusted(peer) {
            return ClientKey::from_ip(peer);
        }

        self.forwarded_client(headers)
            .map(ClientKey::from_ip)
            .unwrap_or_else(|| ClientKey::from_ip(peer))
    }

    fn is_trusted(&self, peer: IpAddr) -> bool {
        self.enabled && self.trusted_peers.contains(&peer)
    }

    /// The left-most address of the forwarding chain, if it parses.
    fn forwarded_client(&self, headers: &HeaderMap) -> Option<IpAddr> {
        let value = headers.get(&self.header)?.to_str().ok()?;
        let first = value.split(',').next()?.trim();
        if first.is_empty() {
            return None;
        }
        first.parse().ok()
    }
}

impl Default for ClientKeyResolver {
    fn default() -> Self {
        Self::untrusted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn forwarded(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", HeaderValue::from_str(value).unwrap());
        headers
    }

    fn trusting(peers: &[&str]) -> ClientKeyResolver {
        ClientKeyResolver::trusting(
            HeaderName::from_static(DEFAULT_FORWARDED_HEADER),
            peers.iter().map(|p| ip(p)),
        )
    }

    #[test]
    fn test_untrusted_ignores_header() {
        let resolver = ClientKeyResolver::untrusted();
        let key = resolver.resolve(Some(ip("1.2.3.4")), &forwarded("9.9.9.9"));
        assert_eq!(key.as_str(), "1.2.3.4");
    }

    #[test]
    fn test_empty_trusted_set_ignores_header() {
        let resolver = trusting(&[]);
        let key = resolver.resolve(Some(ip("1.2.3.4")), &forwarded("9.9.9.9"));
        assert_eq!(key.as_str(), "1.2.3.4");
    }

    #[test]
    fn test_untrusted_peer_ignores_header() {
        let resolver = trusting(&["10.0.0.1"]);
        let key = resolver.resolve(Some(ip("1.2.3.4")), &forwarded("9.9.9.9"));
        assert_eq!(key.as_str(), "1.2.3.4");
    }

    #[test]
    fn test_trusted_peer_uses_leftmost_address() {
        let resolver = trusting(&["10.0.0.1"]);
        let key = resolver.resolve(
            Some(ip("10.0.0.1")),
            &forwarded(" 203.0.113.5 , 198.51.100.2, 10.0.0.1"),
        );
        assert_eq!(key.as_str(), "203.0.113.5");
    }

    #[test]
    fn test_trusted_peer_without_header_falls_back() {
        let resolver = trusting(&["10.0.0.1"]);
        let key = resolver.resolve(Some(ip("10.0.0.1")), &HeaderMap::new());
        assert_eq!(key.as_str(), "10.0.0.1");
    }

    #[test]
    fn test_trusted_peer_with_empty_header_falls_back() {
        let resolver = trusting(&["10.0.0.1"]);
        let key = resolver.resolve(Some(ip("10.0.0.1")), &forwarded(""));
        assert_eq!(key.as_str(), "10.0.0.1");
    }

    #[test]
    fn test_trusted_peer_with_malformed_header_falls_back() {
        let resolver = trusting(&["10.0.0.1"]);
        let key = resolver.resolve(Some(ip("10.0.0.1")), &forwarded("not-an-ip, 9.9.9.9"));
        assert_eq!(key.as_str(), "10.0.0.1");
    }

    #[test]
    fn test_custom_header() {
        let resolver = ClientKeyResolver::trusting(
            HeaderName::from_static("x-real-ip"),
            [ip("10.0.0.1")],
        );
        let mut headers = forwarded("9.9.9.9");
        headers.insert("X-Real-IP", HeaderValue::from_static("203.0.113.7"));

        let key = resolver.resolve(Some(ip("10.0.0.1")), &headers);
        assert_eq!(key.as_str(), "203.0.113.7");
    }

    #[test]
    fn test_mapped_peer_matches_trusted_ipv4() {
        let resolver = trusting(&["10.0.0.1"]);
        let key = resolver.resolve(Some(ip("::ffff:10.0.0.1")), &forwarded("9.9.9.9"));
        assert_eq!(key.as_str(), "9.9.9.9");
    }

    #[test]
    fn test_unknown_peer() {
        let resolver = ClientKeyResolver::untrusted();
        let key = resolver.resolve(None, &forwarded("9.9.9.9"));
        assert_eq!(key.as_str(), UNKNOWN_CLIENT);
    }
}
