//! Client IP resolution.
//!
//! Forwarded headers are spoofable, so they are honored only when the
//! immediate peer is inside the configured trusted-proxy set. With no
//! trusted set configured they are ignored entirely.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

use crate::net::cidr::CidrSet;

/// Resolves the client IP for a request.
#[derive(Debug, Clone, Default)]
pub struct IpResolver {
    trusted: Option<CidrSet>,
}

impl IpResolver {
    pub fn new(trusted: Option<CidrSet>) -> Self {
        Self { trusted }
    }

    /// Derive the client IP from the connection peer and forwarded headers.
    ///
    /// X-Forwarded-For is consulted first (leftmost entry is the original
    /// client), then X-Real-Ip.
    pub fn client_ip(&self, remote: SocketAddr, headers: &HeaderMap) -> IpAddr {
        let peer = remote.ip();

        let trusted = match &self.trusted {
            Some(set) if !set.is_empty() && set.contains(peer) => true,
            _ => false,
        };
        if !trusted {
            return peer;
        }

        if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            if let Some(first) = xff.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return ip;
                }
            }
        }

        if let Some(xrip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
            if let Ok(ip) = xrip.trim().parse::<IpAddr>() {
                return ip;
            }
        }

        peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                v.parse().unwrap(),
            );
        }
        h
    }

    fn resolver(cidrs: &[&str]) -> IpResolver {
        IpResolver::new(Some(CidrSet::parse(cidrs).unwrap()))
    }

    #[test]
    fn trusted_proxy_uses_leftmost_xff() {
        let r = resolver(&["10.0.0.0/8"]);
        let remote: SocketAddr = "10.1.2.3:1234".parse().unwrap();
        let h = headers(&[("x-forwarded-for", "203.0.113.9, 10.1.2.3")]);
        assert_eq!(
            r.client_ip(remote, &h),
            "203.0.113.9".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn untrusted_peer_ignores_xff() {
        let r = resolver(&["10.0.0.0/8"]);
        let remote: SocketAddr = "192.168.1.5:1234".parse().unwrap();
        let h = headers(&[("x-forwarded-for", "203.0.113.9")]);
        assert_eq!(
            r.client_ip(remote, &h),
            "192.168.1.5".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn trusted_proxy_falls_back_to_x_real_ip() {
        let r = resolver(&["10.0.0.0/8"]);
        let remote: SocketAddr = "10.1.2.3:1234".parse().unwrap();
        let h = headers(&[("x-real-ip", "198.51.100.4")]);
        assert_eq!(
            r.client_ip(remote, &h),
            "198.51.100.4".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn no_trusted_set_ignores_forwarded_headers() {
        let r = IpResolver::default();
        let remote: SocketAddr = "10.1.2.3:1234".parse().unwrap();
        let h = headers(&[("x-forwarded-for", "203.0.113.9")]);
        assert_eq!(r.client_ip(remote, &h), "10.1.2.3".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn malformed_xff_falls_through_to_peer() {
        let r = resolver(&["10.0.0.0/8"]);
        let remote: SocketAddr = "10.1.2.3:1234".parse().unwrap();
        let h = headers(&[("x-forwarded-for", "not-an-ip")]);
        assert_eq!(r.client_ip(remote, &h), "10.1.2.3".parse::<IpAddr>().unwrap());
    }
}
