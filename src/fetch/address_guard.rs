//! Network address policy for outbound fetches.
//!
//! The resolver filters DNS answers so a hostname that resolves (or later
//! re-resolves) to an internal address can never be connected to.

use std::error::Error as StdError;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tracing::warn;

/// Returns true for addresses that must not be fetched from: loopback,
/// private, link-local, shared, unspecified, broadcast, multicast and
/// documentation ranges, including IPv4-mapped IPv6 forms.
pub fn is_forbidden_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_forbidden_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_forbidden_v4(v4);
            }
            is_forbidden_v6(v6)
        }
    }
}

fn is_forbidden_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || ip.is_documentation()
        // 0.0.0.0/8 "this network"
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (64..=127).contains(&b))
}

fn is_forbidden_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

/// Error raised when every DNS answer for a host is forbidden.
#[derive(Debug, Clone)]
pub struct BlockedAddress {
    pub host: String,
}

impl fmt::Display for BlockedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} resolves only to private or loopback addresses", self.host)
    }
}

impl StdError for BlockedAddress {}

/// Resolve a host and split the answers into allowed addresses.
///
/// Returns `Err(BlockedAddress)` boxed when answers exist but all are forbidden.
pub(crate) async fn resolve_allowed(
    host: &str,
    port: u16,
) -> Result<Vec<SocketAddr>, Box<dyn StdError + Send + Sync>> {
    let answers: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
    if answers.is_empty() {
        return Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no addresses found for {host}"),
        )));
    }

    let allowed: Vec<SocketAddr> = answers
        .into_iter()
        .filter(|addr| !is_forbidden_ip(addr.ip()))
        .collect();

    if allowed.is_empty() {
        warn!(host, "Blocked fetch to internal address");
        return Err(Box::new(BlockedAddress {
            host: host.to_string(),
        }));
    }
    Ok(allowed)
}

/// DNS resolver for reqwest that drops forbidden answers.
#[derive(Debug, Default, Clone)]
pub struct GuardedResolver;

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        Box::pin(async move {
            let allowed = resolve_allowed(&host, 0).await?;
            let addrs: Addrs = Box::new(allowed.into_iter());
            Ok(addrs)
        })
    }
}
