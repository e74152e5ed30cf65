//! A set of CIDR blocks with containment checks.

use std::net::IpAddr;

use ipnet::IpNet;

/// An immutable set of CIDR blocks.
///
/// Bare IPs are accepted as shorthand for a /32 (IPv4) or /128 (IPv6) block.
#[derive(Debug, Clone, Default)]
pub struct CidrSet {
    nets: Vec<IpNet>,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid cidr {entry:?}: {reason}")]
pub struct CidrParseError {
    pub entry: String,
    pub reason: String,
}

impl CidrSet {
    /// Parse a list of CIDR strings (or bare IPs) into a set.
    ///
    /// Blank entries are skipped.
    pub fn parse<S: AsRef<str>>(items: &[S]) -> Result<Self, CidrParseError> {
        let mut nets = Vec::new();
        for raw in items {
            let s = raw.as_ref().trim();
            if s.is_empty() {
                continue;
            }
            let net = if s.contains('/') {
                s.parse::<IpNet>().map_err(|e| CidrParseError {
                    entry: s.to_string(),
                    reason: e.to_string(),
                })?
            } else {
                let ip: IpAddr = s.parse().map_err(|e: std::net::AddrParseError| {
                    CidrParseError {
                        entry: s.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                IpNet::from(ip)
            };
            nets.push(net);
        }
        Ok(Self { nets })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.nets.iter().any(|n| n.contains(&ip))
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }

    /// Normalized textual form of the members.
    pub fn members(&self) -> Vec<String> {
        self.nets.iter().map(|n| n.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_matches_blocks_and_bare_ips() {
        let set = CidrSet::parse(&["10.0.0.0/8", "127.0.0.1"]).unwrap();
        assert!(set.contains("10.1.2.3".parse().unwrap()));
        assert!(set.contains("127.0.0.1".parse().unwrap()));
        assert!(!set.contains("192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn bare_ipv6_gets_full_prefix() {
        let set = CidrSet::parse(&["::1"]).unwrap();
        assert!(set.contains("::1".parse().unwrap()));
        assert!(!set.contains("::2".parse().unwrap()));
    }

    #[test]
    fn blank_entries_skipped() {
        let set = CidrSet::parse(&["", "  ", "10.0.0.0/8"]).unwrap();
        assert_eq!(set.members(), vec!["10.0.0.0/8"]);
    }

    #[test]
    fn invalid_entry_rejected() {
        assert!(CidrSet::parse(&["not-a-cidr"]).is_err());
        assert!(CidrSet::parse(&["10.0.0.0/99"]).is_err());
    }

    #[test]
    fn reparse_of_members_is_stable() {
        let set = CidrSet::parse(&["10.0.0.0/8", "192.168.0.1"]).unwrap();
        let reparsed = CidrSet::parse(&set.members()).unwrap();
        assert_eq!(set.members(), reparsed.members());
    }
}
