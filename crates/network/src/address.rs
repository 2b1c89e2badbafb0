// crates/network/src/address.rs
//! Host name resolution

use crate::error::{NetworkError, NetworkResult};
use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

/// Which address families resolution may return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFamily {
    #[default]
    Any,
    V4,
    V6,
}

impl AddressFamily {
    /// Returns true if `addr` belongs to this family
    pub fn accepts(&self, addr: &SocketAddr) -> bool {
        match self {
            AddressFamily::Any => true,
            AddressFamily::V4 => addr.is_ipv4(),
            AddressFamily::V6 => addr.is_ipv6(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressFamily::Any => "any",
            AddressFamily::V4 => "ipv4",
            AddressFamily::V6 => "ipv6",
        }
    }
}

impl FromStr for AddressFamily {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" | "" => Ok(AddressFamily::Any),
            "ipv4" | "v4" | "4" => Ok(AddressFamily::V4),
            "ipv6" | "v6" | "6" => Ok(AddressFamily::V6),
            other => Err(NetworkError::InvalidLocator(format!(
                "unknown address family '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved endpoint, produced by [`resolve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    addr: SocketAddr,
}

impl Address {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn from_ip(ip: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
        }
    }

    pub fn family(&self) -> AddressFamily {
        if self.addr.is_ipv4() {
            AddressFamily::V4
        } else {
            AddressFamily::V6
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Same host, different port
    pub fn with_port(&self, port: u16) -> Self {
        Self::from_ip(self.addr.ip(), port)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.addr.fmt(f)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr)
    }
}

/// Resolves `host:port` to candidates of the requested family, in resolver order
pub fn resolve(host: &str, port: u16, family: AddressFamily) -> NetworkResult<Vec<Address>> {
    let resolve_error = |message: String| NetworkError::Resolve {
        host: host.to_string(),
        port,
        message,
    };

    let candidates: Vec<Address> = (host, port)
        .to_socket_addrs()
        .map_err(|e| resolve_error(e.to_string()))?
        .filter(|addr| family.accepts(addr))
        .map(Address::new)
        .collect();

    if candidates.is_empty() {
        return Err(resolve_error(format!("no {} address found", family)));
    }

    log::debug!("Resolved {}:{} to {} candidate(s)", host, port, candidates.len());
    Ok(candidates)
}
