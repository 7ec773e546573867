//! Reserved address blocks and the per-address classifier.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;

use crate::{Error, Result};

/// Blocks that must never be reachable through the proxy.
pub const PRIVATE_CIDRS: [&str; 8] = [
    "127.0.0.0/8",    // IPv4 loopback
    "10.0.0.0/8",     // RFC 1918
    "172.16.0.0/12",  // RFC 1918
    "192.168.0.0/16", // RFC 1918
    "169.254.0.0/16", // RFC 3927 link-local
    "::1/128",        // IPv6 loopback
    "fe80::/10",      // IPv6 link-local
    "fc00::/7",       // IPv6 unique local
];

/// Immutable table of private address blocks.
///
/// Built once at startup and shared (behind an `Arc`) by every admission
/// check; it is never mutated afterwards.
#[derive(Debug, Clone)]
pub struct PrivateRanges {
    blocks: Vec<IpNet>,
}

impl PrivateRanges {
    /// Parse [`PRIVATE_CIDRS`]. An error here means the table is corrupt and
    /// the process must not start.
    pub fn new() -> Result<Self> {
        Self::from_cidrs(&PRIVATE_CIDRS)
    }

    fn from_cidrs(cidrs: &[&str]) -> Result<Self> {
        let blocks = cidrs
            .iter()
            .map(|cidr| {
                cidr.parse::<IpNet>().map_err(|source| Error::InvalidCidr {
                    cidr: (*cidr).to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { blocks })
    }

    /// The parsed blocks, in table order.
    pub fn blocks(&self) -> &[IpNet] {
        &self.blocks
    }

    /// Returns `true` if `ip` must not be reached through the proxy.
    ///
    /// IPv4-mapped IPv6 addresses are judged by their IPv4 form.
    #[must_use]
    pub fn is_private(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        is_loopback_or_link_local(ip) || self.blocks.iter().any(|block| block.contains(&ip))
    }
}

/// Loopback, link-local unicast, and link-local multicast, independent of
/// the table.
fn is_loopback_or_link_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_link_local() || is_link_local_multicast_v4(v4),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_unicast_link_local() || is_link_local_multicast_v6(v6)
        },
    }
}

/// 224.0.0.0/24 (local network control block).
fn is_link_local_multicast_v4(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    a == 224 && b == 0 && c == 0
}

/// ffx2::/16 (multicast with link-local scope, any flags).
fn is_link_local_multicast_v6(ip: Ipv6Addr) -> bool {
    ip.is_multicast() && (ip.segments()[0] & 0x000F) == 0x0002
}
