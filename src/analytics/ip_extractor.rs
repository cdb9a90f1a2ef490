//! Client address extraction from HTTP headers with trust validation
//!
//! - `none`: only the socket address is used.
//! - `standard`: RFC 7239 `Forwarded`, then `X-Forwarded-For`, then
//!   `X-Real-IP`. The forwarded chains are walked right to left, skipping
//!   hops that are trusted by count or by CIDR.
//! - `cloudflare`: `CF-Connecting-IP`.
//!
//! The result is the raw address. It goes to the masker and the country
//! lookup and is never logged.

use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{AnalyticsConfig, TrustedProxyMode};

pub fn extract_client_ip(headers: &HeaderMap, socket_addr: IpAddr, config: &AnalyticsConfig) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => header_ip(headers, "cf-connecting-ip").unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => extract_standard_ip(headers, config).unwrap_or(socket_addr),
        TrustedProxyMode::None => socket_addr,
    }
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

fn extract_standard_ip(headers: &HeaderMap, config: &AnalyticsConfig) -> Option<IpAddr> {
    if let Some(chain) = forwarded_chain(headers) {
        if let Some(ip) = pick_from_chain(&chain, config) {
            return Some(ip);
        }
    }

    if let Some(chain) = x_forwarded_for_chain(headers) {
        if let Some(ip) = pick_from_chain(&chain, config) {
            return Some(ip);
        }
    }

    header_ip(headers, "x-real-ip")
}

/// `for=` addresses of an RFC 7239 `Forwarded` header, in hop order.
fn forwarded_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    let chain: Vec<IpAddr> = forwarded
        .split(',')
        .filter_map(|element| {
            element.split(';').find_map(|param| {
                let (key, value) = param.trim().split_once('=')?;
                if !key.eq_ignore_ascii_case("for") {
                    return None;
                }
                parse_forwarded_node(value)
            })
        })
        .collect();

    (!chain.is_empty()).then_some(chain)
}

/// Parse a `for=` node: `192.0.2.60`, `"192.0.2.60:4711"`, `"[2001:db8::1]:4711"`.
fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"');
    if let Some(rest) = value.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }
    // IPv4 with port
    value.rsplit_once(':')?.0.parse().ok()
}

fn x_forwarded_for_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;
    let chain: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();
    (!chain.is_empty()).then_some(chain)
}

/// Choose the client from a hop chain (leftmost = original client).
fn pick_from_chain(chain: &[IpAddr], config: &AnalyticsConfig) -> Option<IpAddr> {
    if let Some(num_trusted) = config.num_trusted_proxies {
        return if chain.len() > num_trusted {
            Some(chain[chain.len() - num_trusted - 1])
        } else {
            chain.first().copied()
        };
    }

    if !config.trusted_proxies.is_empty() {
        let trusted = |ip: &IpAddr| config.trusted_proxies.iter().any(|net: &IpNet| net.contains(ip));
        return chain
            .iter()
            .rev()
            .find(|ip| !trusted(*ip))
            .or_else(|| chain.first())
            .copied();
    }

    chain.last().copied()
}
