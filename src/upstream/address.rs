//! Upstream address parsing.
//!
//! Accepted forms:
//! - `1.1.1.1` or `[2606:4700::1111]` (UDP, port 53)
//! - `1.1.1.1:5353`
//! - `udp://1.1.1.1`, `dns://1.1.1.1:53`, `tcp://9.9.9.9:53`
//!
//! Hostnames are rejected; upstreams must be IP literals so that no
//! resolution happens on the forwarding path.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use url::{Host, Url};

/// Default DNS port.
pub const DNS_PORT: u16 = 53;

/// Transport protocol used to reach an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for address parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("empty upstream address")]
    Empty,
    #[error("unsupported scheme '{0}' (expected udp, dns or tcp)")]
    UnsupportedScheme(String),
    #[error("upstream '{0}' must be an IP address, not a hostname")]
    Hostname(String),
    #[error("invalid upstream address '{0}'")]
    Invalid(String),
}

/// A parsed upstream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpstreamAddr {
    pub socket_addr: SocketAddr,
    pub protocol: Protocol,
}

impl UpstreamAddr {
    pub fn new(socket_addr: SocketAddr, protocol: Protocol) -> Self {
        Self { socket_addr, protocol }
    }

    pub fn udp(socket_addr: SocketAddr) -> Self {
        Self::new(socket_addr, Protocol::Udp)
    }

    pub fn tcp(socket_addr: SocketAddr) -> Self {
        Self::new(socket_addr, Protocol::Tcp)
    }

    fn parse_url(input: &str) -> Result<Self, AddressError> {
        let url = Url::parse(input).map_err(|_| AddressError::Invalid(input.to_string()))?;
        let protocol = match url.scheme() {
            "udp" | "dns" => Protocol::Udp,
            "tcp" => Protocol::Tcp,
            other => return Err(AddressError::UnsupportedScheme(other.to_string())),
        };

        let ip: IpAddr = match url.host() {
            Some(Host::Ipv4(ip)) => ip.into(),
            Some(Host::Ipv6(ip)) => ip.into(),
            Some(Host::Domain(name)) => {
                // Non-special schemes leave IPv4 literals as opaque hosts
                name.parse()
                    .map_err(|_| AddressError::Hostname(name.to_string()))?
            }
            None => return Err(AddressError::Invalid(input.to_string())),
        };

        let port = url.port().unwrap_or(DNS_PORT);
        Ok(Self::new(SocketAddr::new(ip, port), protocol))
    }

    fn parse_plain(input: &str) -> Result<Self, AddressError> {
        if let Ok(addr) = input.parse::<SocketAddr>() {
            return Ok(Self::udp(addr));
        }
        let bare = input.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return Ok(Self::udp(SocketAddr::new(ip, DNS_PORT)));
        }
        if input.chars().any(|c| c.is_ascii_alphabetic()) && !input.contains(':') {
            return Err(AddressError::Hostname(input.to_string()));
        }
        Err(AddressError::Invalid(input.to_string()))
    }
}

impl FromStr for UpstreamAddr {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err(AddressError::Empty);
        }
        if input.contains("://") {
            Self::parse_url(input)
        } else {
            Self::parse_plain(input)
        }
    }
}

impl fmt::Display for UpstreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.socket_addr)
    }
}
