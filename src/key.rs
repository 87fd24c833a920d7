//! Quota key extraction.
//!
//! A [`KeyExtractor`] maps the head of a request to the string the quota is charged against.
//! Extractors are infallible: when the identity signal is missing they return a well-defined
//! fallback key (by default [`DEFAULT_KEY`]) so every such request shares one bucket instead of
//! escaping the quota.

use crate::BuildError;
use http::header::HeaderName;
use http::request::Parts;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Key used when a request carries no usable identity.
pub const DEFAULT_KEY: &str = "unknown";

/// Header carrying the client chain when behind a proxy.
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
/// Header carrying the client address set by some proxies (nginx).
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Maps a request to its quota key.
///
/// Must be deterministic and side-effect free; it runs once per request, before the quota is
/// consulted. Any `Fn(&Parts) -> String` is a key extractor.
pub trait KeyExtractor: Send + Sync {
    /// Derive the quota key for this request.
    fn extract(&self, parts: &Parts) -> String;
}

impl<F> KeyExtractor for F
where
    F: Fn(&Parts) -> String + Send + Sync,
{
    fn extract(&self, parts: &Parts) -> String {
        self(parts)
    }
}

/// Keys requests by client IP address (the default extractor).
///
/// The peer address is read from a [`SocketAddr`] (or bare [`IpAddr`]) in the request
/// extensions; hosts insert it when accepting the connection. With
/// [`trust_forward_header`](Self::trust_forward_header), the first `X-Forwarded-For` hop and then
/// `X-Real-IP` take precedence. Only enable that behind a proxy that overwrites those headers.
///
/// Addresses are masked to a network prefix before becoming a key. The defaults (/32 for IPv4,
/// /64 for IPv6) treat one IPv6 subnet as one client, since a single host usually owns a whole
/// /64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp {
    trust_forward_header: bool,
    ipv4_prefix: u8,
    ipv6_prefix: u8,
}

impl Default for ClientIp {
    fn default() -> Self {
        Self { trust_forward_header: false, ipv4_prefix: 32, ipv6_prefix: 64 }
    }
}

impl ClientIp {
    /// Peer-address extractor with default masks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefer proxy headers over the peer address.
    pub fn trust_forward_header(mut self, trust: bool) -> Self {
        self.trust_forward_header = trust;
        self
    }

    /// Override the network prefixes addresses are masked to.
    pub fn with_masks(mut self, ipv4_prefix: u8, ipv6_prefix: u8) -> Result<Self, BuildError> {
        if ipv4_prefix > 32 {
            return Err(BuildError::InvalidMask { family: "ipv4", max: 32, provided: ipv4_prefix });
        }
        if ipv6_prefix > 128 {
            return Err(BuildError::InvalidMask {
                family: "ipv6",
                max: 128,
                provided: ipv6_prefix,
            });
        }
        self.ipv4_prefix = ipv4_prefix;
        self.ipv6_prefix = ipv6_prefix;
        Ok(self)
    }

    /// Resolve the client address, unmasked.
    pub fn client_ip(&self, parts: &Parts) -> Option<IpAddr> {
        if self.trust_forward_header {
            if let Some(ip) = forwarded_for(parts).or_else(|| real_ip(parts)) {
                return Some(ip);
            }
        }
        parts
            .extensions
            .get::<SocketAddr>()
            .map(SocketAddr::ip)
            .or_else(|| parts.extensions.get::<IpAddr>().copied())
    }

    fn mask(&self, ip: IpAddr) -> IpAddr {
        match ip {
            IpAddr::V4(v4) => {
                let bits = u32::from(v4) & prefix_mask_u32(self.ipv4_prefix);
                IpAddr::V4(Ipv4Addr::from(bits))
            }
            IpAddr::V6(v6) => {
                let bits = u128::from(v6) & prefix_mask_u128(self.ipv6_prefix);
                IpAddr::V6(Ipv6Addr::from(bits))
            }
        }
    }
}

impl KeyExtractor for ClientIp {
    fn extract(&self, parts: &Parts) -> String {
        match self.client_ip(parts) {
            Some(ip) => self.mask(ip).to_string(),
            None => DEFAULT_KEY.to_string(),
        }
    }
}

fn forwarded_for(parts: &Parts) -> Option<IpAddr> {
    let value = parts.headers.get(X_FORWARDED_FOR)?.to_str().ok()?;
    value.split(',').next()?.trim().parse().ok()
}

fn real_ip(parts: &Parts) -> Option<IpAddr> {
    parts.headers.get(X_REAL_IP)?.to_str().ok()?.trim().parse().ok()
}

fn prefix_mask_u32(prefix: u8) -> u32 {
    match prefix {
        0 => 0,
        p => u32::MAX << (32 - u32::from(p.min(32))),
    }
}

fn prefix_mask_u128(prefix: u8) -> u128 {
    match prefix {
        0 => 0,
        p => u128::MAX << (128 - u32::from(p.min(128))),
    }
}

/// Keys requests by the value of a header (API token, tenant id, ...).
#[derive(Debug, Clone)]
pub struct HeaderKey {
    name: HeaderName,
    fallback: String,
}

impl HeaderKey {
    /// Key by `name`, falling back to [`DEFAULT_KEY`] when absent or not visible ASCII.
    pub fn new(name: HeaderName) -> Self {
        Self { name, fallback: DEFAULT_KEY.to_string() }
    }

    /// Override the fallback key.
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }
}

impl KeyExtractor for HeaderKey {
    fn extract(&self, parts: &Parts) -> String {
        parts
            .headers
            .get(&self.name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map_or_else(|| self.fallback.clone(), str::to_string)
    }
}

/// Charges every request against one shared key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalKey(String);

impl GlobalKey {
    /// Share a single quota under `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl KeyExtractor for GlobalKey {
    fn extract(&self, _parts: &Parts) -> String {
        self.0.clone()
    }
}
