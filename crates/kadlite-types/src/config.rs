//! Node configuration.
//!
//! Every field has a default so a partial `config.toml` (or none at all)
//! yields a runnable node.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{KadliteError, KadliteResult};

/// Default seconds between liveness cycles.
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Default bound on outbound connects and reply waits.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default consecutive unanswered cycles before eviction.
const DEFAULT_MAX_MISSED_HEARTBEATS: u32 = 3;

/// Configuration for one overlay node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address to bind the listener on.
    pub listen_addr: SocketAddr,
    /// IPv4 address other nodes should dial; part of the identity.
    pub advertise_ip: Ipv4Addr,
    /// Human-readable name sent with every message.
    pub display_name: String,
    /// Node to send the initial Hello to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<SocketAddrV4>,
    /// Seconds between liveness cycles.
    pub heartbeat_interval_secs: u64,
    /// Seconds to wait for an outbound connect or a reply.
    pub connect_timeout_secs: u64,
    /// Unanswered cycles before a peer is evicted.
    pub max_missed_heartbeats: u32,
    /// Where to write routing table snapshots, if anywhere.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 5000)),
            advertise_ip: Ipv4Addr::LOCALHOST,
            display_name: "kadlite-node".to_string(),
            bootstrap: None,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            max_missed_heartbeats: DEFAULT_MAX_MISSED_HEARTBEATS,
            snapshot_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Interval between liveness cycles.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Bound on outbound connects and reply waits.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Reject values that would stall or disable the node.
    pub fn validate(&self) -> KadliteResult<()> {
        if self.heartbeat_interval_secs == 0 {
            return Err(KadliteError::Config(
                "heartbeat_interval_secs must be greater than zero".into(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(KadliteError::Config(
                "connect_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.max_missed_heartbeats == 0 {
            return Err(KadliteError::Config(
                "max_missed_heartbeats must be greater than zero".into(),
            ));
        }
        if self.advertise_ip.is_unspecified() {
            return Err(KadliteError::Config(
                "advertise_ip must be a concrete address, not 0.0.0.0".into(),
            ));
        }
        Ok(())
    }
}
