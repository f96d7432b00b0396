//! Endpoint validation for provider adapters
//!
//! Provider endpoints carry API credentials, so by default only HTTPS
//! endpoints on public hosts are accepted.

use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Endpoint validation errors
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("URL scheme '{0}' is not allowed, only HTTPS is permitted")]
    InvalidScheme(String),

    #[error("Host '{0}' is blocked: loopback and link-local addresses are not allowed")]
    BlockedHost(String),

    #[error("URL must have a host")]
    MissingHost,
}

/// Hostnames that should never receive provider credentials
const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
    "metadata.google.internal",
    "metadata.goog",
];

/// Validation policy for provider endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct EndpointPolicy {
    /// Allow HTTP scheme (not recommended for production)
    pub allow_http: bool,
    /// Allow localhost/loopback addresses (for development and tests)
    pub allow_localhost: bool,
}

impl EndpointPolicy {
    /// Development policy that allows plain HTTP on localhost
    pub fn development() -> Self {
        Self {
            allow_http: true,
            allow_localhost: true,
        }
    }
}

/// Validate a provider endpoint.
///
/// Checks the scheme, rejects blocked hostnames and loopback addresses unless
/// the policy allows them, and always rejects link-local addresses (cloud
/// metadata services live there).
pub fn validate_endpoint(endpoint: &str, policy: &EndpointPolicy) -> Result<Url, EndpointError> {
    let url = Url::parse(endpoint)?;

    match url.scheme() {
        "https" => {}
        "http" if policy.allow_http => {}
        scheme => return Err(EndpointError::InvalidScheme(scheme.to_string())),
    }

    let host = url.host_str().ok_or(EndpointError::MissingHost)?;

    if !policy.allow_localhost {
        let host_lower = host.to_lowercase();
        for blocked in BLOCKED_HOSTNAMES {
            if host_lower == *blocked || host_lower.ends_with(&format!(".{}", blocked)) {
                return Err(EndpointError::BlockedHost(host.to_string()));
            }
        }
    }

    let bare_host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare_host.parse::<IpAddr>() {
        if !policy.allow_localhost && ip.is_loopback() {
            return Err(EndpointError::BlockedHost(host.to_string()));
        }
        if is_link_local(&ip) {
            return Err(EndpointError::BlockedHost(host.to_string()));
        }
    }

    Ok(url)
}

fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}
