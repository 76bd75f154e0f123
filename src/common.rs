//! Common types shared by the endpoint modules.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::error::EndpointError;

/// Address family an endpoint is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    /// IPv4
    Ipv4,
    /// IPv6
    Ipv6,
    /// Unix-local (filesystem path) sockets
    #[cfg(unix)]
    Unix,
}

impl AddressFamily {
    /// Family matching a resolved socket address.
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => AddressFamily::Ipv4,
            SocketAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    /// True for the two internet families.
    pub fn is_inet(self) -> bool {
        matches!(self, AddressFamily::Ipv4 | AddressFamily::Ipv6)
    }
}

impl From<AddressFamily> for socket2::Domain {
    fn from(family: AddressFamily) -> Self {
        match family {
            AddressFamily::Ipv4 => socket2::Domain::IPV4,
            AddressFamily::Ipv6 => socket2::Domain::IPV6,
            #[cfg(unix)]
            AddressFamily::Unix => socket2::Domain::UNIX,
        }
    }
}

/// Socket type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocketType {
    /// Stream socket (TCP, unix stream)
    Stream,
    /// Datagram socket (UDP, unix datagram)
    Datagram,
}

impl From<SocketType> for socket2::Type {
    fn from(ty: SocketType) -> Self {
        match ty {
            SocketType::Stream => socket2::Type::STREAM,
            SocketType::Datagram => socket2::Type::DGRAM,
        }
    }
}

/// Transport protocol selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Let the OS pick the protocol for the family/type pair (required for unix sockets).
    Default,
    Tcp,
    Udp,
}

impl From<Protocol> for Option<socket2::Protocol> {
    fn from(proto: Protocol) -> Self {
        match proto {
            Protocol::Default => None,
            Protocol::Tcp => Some(socket2::Protocol::TCP),
            Protocol::Udp => Some(socket2::Protocol::UDP),
        }
    }
}

/// Lifecycle state of an [`Endpoint`](crate::Endpoint).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EndpointState {
    /// No handle is owned: construction failed, or the endpoint was closed or detached
    Closed,
    /// Handle is open but neither connected nor listening
    Open,
    /// Handle is connected to a peer
    Connected,
    /// Handle is in listening mode (server)
    Listening,
}

/// Tuning applied to an endpoint.
///
/// An endpoint records every option that was successfully set in one of these, so the
/// same tuning can be re-applied when the handle has to be reopened during `connect`.
/// Fields left at their default are not touched when the options are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointOptions {
    /// Disable Nagle's algorithm (`TCP_NODELAY`)
    pub nodelay: bool,
    /// Request immediate ACKs (`TCP_QUICKACK`, Linux only)
    pub quickack: bool,
    /// Allow binding to an address in `TIME_WAIT` (`SO_REUSEADDR`)
    pub reuse_address: bool,
    /// Receive timeout in microseconds, 0 blocks indefinitely
    pub rx_timeout_micros: u32,
    /// Send timeout in microseconds, 0 blocks indefinitely
    pub tx_timeout_micros: u32,
    /// Requested kernel send buffer size (`SO_SNDBUF`)
    pub tx_buffer_size: Option<usize>,
    /// Requested kernel receive buffer size (`SO_RCVBUF`)
    pub rx_buffer_size: Option<usize>,
}

impl EndpointOptions {
    /// Options for small request/response exchanges.
    pub fn low_latency() -> Self {
        EndpointOptions {
            nodelay: true,
            quickack: true,
            reuse_address: true,
            rx_timeout_micros: 0,
            tx_timeout_micros: 0,
            tx_buffer_size: Some(64 * 1024),
            rx_buffer_size: Some(64 * 1024),
        }
    }

    /// Options for large one-way transfers.
    pub fn bulk_transfer() -> Self {
        EndpointOptions {
            nodelay: false,
            quickack: false,
            reuse_address: true,
            rx_timeout_micros: 0,
            tx_timeout_micros: 0,
            tx_buffer_size: Some(4 * 1024 * 1024),
            rx_buffer_size: Some(4 * 1024 * 1024),
        }
    }

    /// Parse options from a JSON document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, EndpointError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize these options as JSON.
    pub fn to_json(&self) -> Result<String, EndpointError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
