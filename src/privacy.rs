//! Network address masking
//!
//! Raw client addresses never go past this module. [`mask_ip`] is the pure
//! string transformation; [`MaskedIp`] is the only address type the storage
//! layer accepts, and it can only be built here.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::models::{bounded, limits};

/// Stored in place of inputs that are not recognisable addresses under
/// [`UnrecognizedAddressPolicy::Sentinel`].
pub const UNRECOGNIZED_SENTINEL: &str = "0.0.0.0";

/// Mask a raw address.
///
/// - IPv4 `a.b.c.d` becomes `a.b.c.0`.
/// - IPv6 keeps the first four groups and zeroes the lowest 64 bits. Groups
///   are written in lowercase hex without leading zeros.
/// - IPv4-mapped IPv6 is unwrapped, masked as IPv4 and re-wrapped.
/// - Anything else (including the empty string) is returned unchanged.
pub fn mask_ip(raw: &str) -> String {
    try_mask(raw).unwrap_or_else(|| raw.to_string())
}

/// Mask a raw address, or `None` if it is not an IPv4/IPv6 literal.
pub fn try_mask(raw: &str) -> Option<String> {
    let raw = raw.trim();

    if let Ok(v4) = raw.parse::<Ipv4Addr>() {
        return Some(mask_v4(v4));
    }

    let v6 = raw.parse::<Ipv6Addr>().ok()?;
    if let Some(v4) = v6.to_ipv4_mapped() {
        return Some(format!("::ffff:{}", mask_v4(v4)));
    }

    let [a, b, c, d, ..] = v6.segments();
    Some(format!("{a:x}:{b:x}:{c:x}:{d:x}:0:0:0:0"))
}

fn mask_v4(addr: Ipv4Addr) -> String {
    let [a, b, c, _] = addr.octets();
    format!("{a}.{b}.{c}.0")
}

/// What to store when the caller's address is not a recognisable literal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnrecognizedAddressPolicy {
    /// Replace it with [`UNRECOGNIZED_SENTINEL`].
    #[default]
    Sentinel,
    /// Keep the input as-is.
    Passthrough,
}

/// An address that has been through the masker. Never longer than
/// [`limits::MASKED_IP`] characters.
#[derive(Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MaskedIp(String);

impl MaskedIp {
    pub fn from_raw(raw: &str, policy: UnrecognizedAddressPolicy) -> Self {
        match try_mask(raw) {
            Some(masked) => Self(masked),
            None => match policy {
                UnrecognizedAddressPolicy::Sentinel => Self(UNRECOGNIZED_SENTINEL.to_string()),
                UnrecognizedAddressPolicy::Passthrough => Self(bounded(raw, limits::MASKED_IP)),
            },
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for MaskedIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MaskedIp").field(&self.0).finish()
    }
}

impl fmt::Display for MaskedIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One-way digest of raw address, raw user agent and the current UTC date.
///
/// Used for ephemeral visitor grouping only; neither the digest nor its
/// inputs are persisted.
pub fn transient_visitor_digest(raw_ip: &str, user_agent: &str) -> String {
    transient_visitor_digest_on(raw_ip, user_agent, Utc::now().date_naive())
}

pub fn transient_visitor_digest_on(raw_ip: &str, user_agent: &str, date: NaiveDate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_ip.as_bytes());
    hasher.update(b"|");
    hasher.update(user_agent.as_bytes());
    hasher.update(b"|");
    hasher.update(date.format("%Y-%m-%d").to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}
