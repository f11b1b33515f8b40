//! Identity of a session: its connection id and remote address.

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::atomic::{AtomicU64, Ordering},
};

use crate::routing::HopId;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier assigned to a connection.
///
/// Identifiers are allocated from a process-wide counter and are never reused
/// while the process runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Allocate the next unused identifier.
    #[must_use]
    pub fn next() -> Self { Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub const fn as_u64(&self) -> u64 { self.0 }

    /// The hop identifier a proxy pushes for this connection.
    #[must_use]
    pub const fn as_hop(&self) -> HopId { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Remote address of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NetworkAddressInfo {
    /// Remote IP address.
    pub address: IpAddr,
    /// Remote port.
    pub port: u16,
}

impl NetworkAddressInfo {
    /// Placeholder for transports without a network address, such as
    /// in-memory pipes.
    pub const UNSPECIFIED: Self = Self {
        address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        port: 0,
    };
}

impl From<SocketAddr> for NetworkAddressInfo {
    fn from(addr: SocketAddr) -> Self {
        Self {
            address: addr.ip(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for NetworkAddressInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&SocketAddr::new(self.address, self.port), f)
    }
}

/// Immutable facts about one session, fixed when the connection is made.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionDetails {
    connection_id: ConnectionId,
    address: NetworkAddressInfo,
}

impl SessionDetails {
    /// Describe a session.
    #[must_use]
    pub const fn new(connection_id: ConnectionId, address: NetworkAddressInfo) -> Self {
        Self {
            connection_id,
            address,
        }
    }

    /// Identifier of the connection.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId { self.connection_id }

    /// Remote address of the connection.
    #[must_use]
    pub const fn address(&self) -> NetworkAddressInfo { self.address }
}
