//! Peer records and self-descriptions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::error::{KadliteError, KadliteResult};
use crate::identity::NodeId;
use crate::serde_compat::{node_id_lenient, port_lenient};

/// A monotonic tick (milliseconds since the node's clock origin).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Tick(pub u64);

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A peer known to the local routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// The peer's identity.
    pub identity: NodeId,
    /// Reachable IPv4 address.
    pub ip: Ipv4Addr,
    /// Listening port.
    pub port: u16,
    /// Human-readable name (may be empty for peers learned second-hand).
    pub display_name: String,
    /// When the local node last heard about this peer.
    pub last_seen: Tick,
}

impl PeerRecord {
    /// Build a record from an untyped self-description.
    ///
    /// Fails when the description carries no identity or its address is not
    /// a dotted IPv4 literal.
    pub fn from_description(desc: &SelfDescription, last_seen: Tick) -> KadliteResult<Self> {
        let identity = desc.id.ok_or_else(|| {
            KadliteError::InvalidPeer(format!("{}:{} has no identity", desc.ip, desc.port))
        })?;
        let ip = desc.ip.parse::<Ipv4Addr>().map_err(|_| {
            KadliteError::InvalidPeer(format!("{} is not an IPv4 address", desc.ip))
        })?;
        Ok(Self {
            identity,
            ip,
            port: desc.port,
            display_name: desc.name.clone().unwrap_or_default(),
            last_seen,
        })
    }

    /// Socket address to dial this peer on.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl fmt::Display for PeerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.identity, self.ip, self.port)
    }
}

/// A node's own claim about how it can be reached.
///
/// Attached to Hello messages as trailing JSON because the address a socket
/// observes for a peer (ephemeral source port, NAT) is usually not the
/// address that peer listens on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfDescription {
    /// Reachable address, as text.
    pub ip: String,
    /// Listening port (accepted as number or string).
    #[serde(deserialize_with = "port_lenient")]
    pub port: u16,
    /// Identity, if the sender included one.
    #[serde(
        default,
        deserialize_with = "node_id_lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<NodeId>,
    /// Display name, if the sender included one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SelfDescription {
    /// Describe the local node, deriving its identity from `ip:port`.
    pub fn local(ip: Ipv4Addr, port: u16, name: impl Into<String>) -> Self {
        Self {
            ip: ip.to_string(),
            port,
            id: Some(NodeId::derive(ip, port)),
            name: Some(name.into()),
        }
    }

    /// Parse a JSON self-description, returning `None` on any failure.
    pub fn from_json_lossy(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}
