//! Node state — the routing table and liveness tracker behind one lock.
//!
//! Every mutation of either structure goes through [`NodeState`], so the two
//! never disagree: a peer that leaves the table for any reason also loses
//! its liveness entry. The state is shared between connection tasks as
//! [`SharedState`]; handlers take the lock, finish their whole update and
//! release it before doing any I/O.

use crate::liveness::LivenessTracker;
use crate::routing::{RoutingTable, UpsertOutcome};
use kadlite_types::{KadliteError, KadliteResult, NodeId, PeerRecord};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Node state shared across tasks.
pub type SharedState = Arc<Mutex<NodeState>>;

/// Lock shared state, recovering from a poisoned mutex.
pub fn lock(state: &SharedState) -> MutexGuard<'_, NodeState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Outcome of one liveness cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Peers still in the table, to be sent a Heartbeat.
    pub to_ping: Vec<PeerRecord>,
    /// Peers removed this cycle.
    pub evicted: Vec<PeerRecord>,
}

/// Routing table plus liveness tracker for one local node.
#[derive(Debug, Clone)]
pub struct NodeState {
    table: RoutingTable,
    liveness: LivenessTracker,
}

impl NodeState {
    /// Empty state for `local_id`, evicting after `max_missed` silent cycles.
    pub fn new(local_id: NodeId, max_missed: u32) -> Self {
        Self {
            table: RoutingTable::new(local_id),
            liveness: LivenessTracker::new(max_missed),
        }
    }

    /// Wrap in the shared handle used by connection tasks.
    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    pub fn local_id(&self) -> NodeId {
        self.table.local_id()
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn liveness(&self) -> &LivenessTracker {
        &self.liveness
    }

    /// Offer a record to the routing table.
    ///
    /// The local identity is refused. A displaced incumbent loses its
    /// liveness entry.
    pub fn upsert(&mut self, record: PeerRecord) -> KadliteResult<UpsertOutcome> {
        if record.identity == self.local_id() {
            return Err(KadliteError::InvalidPeer(format!(
                "{record} carries the local identity"
            )));
        }
        let identity = record.identity;
        let outcome = self.table.upsert(record);
        match &outcome {
            UpsertOutcome::Inserted => {
                info!(peer = %identity, bucket = self.table.bucket_index(identity), "Added peer");
            }
            UpsertOutcome::Replaced(old) if old.identity == identity => {
                debug!(peer = %identity, "Refreshed peer");
            }
            UpsertOutcome::Replaced(old) => {
                self.liveness.forget(old.identity);
                info!(peer = %identity, displaced = %old.identity, "Replaced peer");
            }
            UpsertOutcome::Unchanged => {
                debug!(peer = %identity, "Kept incumbent over candidate");
            }
        }
        Ok(outcome)
    }

    /// Remove a peer from the table and the tracker.
    pub fn remove_peer(&mut self, identity: NodeId) -> Option<PeerRecord> {
        self.liveness.forget(identity);
        let removed = self.table.remove(identity);
        if removed.is_some() {
            info!(peer = %identity, "Removed peer");
        }
        removed
    }

    /// Credit a heartbeat response.
    ///
    /// Only peers in the table are tracked; returns false for strangers.
    pub fn record_response(&mut self, identity: NodeId) -> bool {
        if !self.table.contains(identity) {
            debug!(peer = %identity, "Ignoring response from unknown peer");
            return false;
        }
        self.liveness.on_response(identity);
        debug!(peer = %identity, "Heartbeat response recorded");
        true
    }

    /// Run one liveness cycle over the peers known right now.
    pub fn run_cycle(&mut self) -> CycleReport {
        let peers = self.table.all_peers();
        let ids: Vec<NodeId> = peers.iter().map(|p| p.identity).collect();
        let to_evict = self.liveness.on_cycle(&ids);

        let mut evicted = Vec::with_capacity(to_evict.len());
        for identity in to_evict {
            if let Some(record) = self.table.remove(identity) {
                info!(
                    peer = %identity,
                    addr = %record.socket_addr(),
                    missed = self.liveness.max_missed(),
                    "Removing peer after missed heartbeats"
                );
                evicted.push(record);
            }
        }

        let to_ping = peers
            .into_iter()
            .filter(|p| !evicted.iter().any(|e| e.identity == p.identity))
            .collect();
        CycleReport { to_ping, evicted }
    }

    pub fn contains(&self, identity: NodeId) -> bool {
        self.table.contains(identity)
    }

    /// Copy of every known peer, in bucket order.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.table.all_peers()
    }

    pub fn closest(&self, target: NodeId) -> Option<PeerRecord> {
        self.table.closest(target)
    }

    /// Missed count for a peer, if it has a tracker entry.
    pub fn missed(&self, identity: NodeId) -> Option<u32> {
        self.liveness.missed(identity)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
