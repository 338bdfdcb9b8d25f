//! Origin whitelisting and effective client address extraction.
//!
//! Both decisions are made from the HTTP upgrade request before a connection
//! is handed to the relay.

use crate::config::RelayConfig;
use std::net::SocketAddr;
use tokio_tungstenite::tungstenite::http::HeaderMap;

/// Decides which browser origins may open relay connections.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    enabled: bool,
    hostnames: Vec<String>,
}

impl OriginPolicy {
    pub fn new(enabled: bool, hostnames: &[String]) -> Self {
        Self {
            enabled,
            hostnames: hostnames
                .iter()
                .filter_map(|h| hostname_of(h))
                .map(|h| h.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.origin_whitelist, &config.allowed_hostnames)
    }

    /// Always true when whitelisting is off; otherwise the origin's hostname
    /// must match one of the configured hostnames.
    pub fn is_allowed(&self, origin: &str) -> bool {
        if !self.enabled {
            return true;
        }
        match hostname_of(origin) {
            Some(host) => self
                .hostnames
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(host)),
            None => false,
        }
    }

    /// Decision for an upgrade request; a request without any origin is
    /// only let through when whitelisting is off.
    pub fn allows(&self, origin: Option<&str>) -> bool {
        match origin {
            Some(origin) => self.is_allowed(origin),
            None => !self.enabled,
        }
    }
}

/// Picks the address a connection is accounted under.
#[derive(Debug, Clone)]
pub struct AddressResolver {
    forwarding: bool,
    headers: Vec<String>,
}

impl AddressResolver {
    pub fn new(forwarding: bool, headers: &[String]) -> Self {
        Self {
            forwarding,
            headers: headers.to_vec(),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.ip_forwarding, &config.forward_headers)
    }

    /// The first configured forwarding header present wins (first entry of a
    /// comma-separated list); otherwise the TCP peer's IP.
    pub fn resolve(&self, headers: &HeaderMap, peer: SocketAddr) -> String {
        if self.forwarding {
            for name in &self.headers {
                let value = headers
                    .get(name.as_str())
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.split(',').next())
                    .map(str::trim)
                    .filter(|v| !v.is_empty());
                if let Some(value) = value {
                    return value.to_string();
                }
            }
        }
        peer.ip().to_string()
    }
}

/// The origin a browser sent, falling back to the `Host` header.
pub fn request_origin(headers: &HeaderMap) -> Option<String> {
    headers
        .get("origin")
        .or_else(|| headers.get("host"))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Hostname part of an origin, URL or bare `host[:port]`.
fn hostname_of(input: &str) -> Option<&str> {
    let rest = match input.find("://") {
        Some(i) => &input[i + 3..],
        None => input,
    };
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit('@').next()?;

    let host = if let Some(bracketed) = host_port.strip_prefix('[') {
        bracketed.split(']').next()?
    } else {
        host_port.split(':').next()?
    };

    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}
