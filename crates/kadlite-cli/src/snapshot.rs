//! On-disk JSON snapshots of the routing table.

use anyhow::Context;
use chrono::{DateTime, Utc};
use kadlite_types::{PeerRecord, SelfDescription};
use kadlite_wire::PeerNode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What a node knew at one moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingSnapshot {
    pub node: SelfDescription,
    pub taken_at: DateTime<Utc>,
    pub peers: Vec<PeerRecord>,
}

impl RoutingSnapshot {
    pub fn capture(node: &PeerNode) -> Self {
        Self {
            node: node.local_peer().clone(),
            taken_at: Utc::now(),
            peers: node.snapshot(),
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `snapshot` as pretty JSON, replacing `path` atomically.
pub fn write_snapshot(path: &Path, snapshot: &RoutingSnapshot) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(snapshot)?;
    let tmp = temp_path(path);
    std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

pub fn read_snapshot(path: &Path) -> anyhow::Result<RoutingSnapshot> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

/// Human-readable rendering for `kadlite snapshot`.
pub fn render(snapshot: &RoutingSnapshot) -> String {
    let node_id = snapshot
        .node
        .id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "????".to_string());
    let mut out = format!(
        "node {} {}:{} ({})\ntaken {}\n",
        node_id,
        snapshot.node.ip,
        snapshot.node.port,
        snapshot.node.name.as_deref().unwrap_or(""),
        snapshot.taken_at.to_rfc3339(),
    );
    if snapshot.peers.is_empty() {
        out.push_str("no peers\n");
        return out;
    }
    out.push_str(&format!(
        "{:<6} {:<22} {:<12} NAME\n",
        "ID", "ADDRESS", "LAST SEEN"
    ));
    for peer in &snapshot.peers {
        out.push_str(&format!(
            "{:<6} {:<22} {:<12} {}\n",
            peer.identity.to_string(),
            peer.socket_addr().to_string(),
            peer.last_seen.to_string(),
            peer.display_name
        ));
    }
    out
}
