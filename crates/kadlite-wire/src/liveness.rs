//! Liveness tracker — three-strikes heartbeat accounting.
//!
//! Each cycle optimistically counts every known peer as having missed,
//! before any heartbeat is even sent; a response at any time clears the count.
//! A peer whose count reaches the threshold is reported for eviction and
//! forgotten:
//!
//! ```text
//! FRESH(0) -> SUSPECT(1) -> SUSPECT(2) -> EVICTED(>= threshold)
//! ```
//!
//! A response from either SUSPECT state returns the peer to FRESH(0).
//! EVICTED is terminal: the peer has to reappear through Hello/Welcome.

use kadlite_types::NodeId;
use std::collections::HashMap;

/// Default number of consecutive missed cycles before eviction.
pub const DEFAULT_MAX_MISSED: u32 = 3;

/// Per-peer missed-heartbeat counters.
#[derive(Debug, Clone)]
pub struct LivenessTracker {
    missed: HashMap<NodeId, u32>,
    max_missed: u32,
}

impl LivenessTracker {
    /// Create a tracker that evicts after `max_missed` silent cycles.
    pub fn new(max_missed: u32) -> Self {
        Self {
            missed: HashMap::new(),
            max_missed: max_missed.max(1),
        }
    }

    pub fn max_missed(&self) -> u32 {
        self.max_missed
    }

    /// Advance one cycle for `peers`.
    ///
    /// Returns the peers that reached the threshold; their entries are
    /// already deleted.
    pub fn on_cycle(&mut self, peers: &[NodeId]) -> Vec<NodeId> {
        let mut evicted = Vec::new();
        for &peer in peers {
            let count = self.missed.entry(peer).or_insert(0);
            *count += 1;
            if *count >= self.max_missed {
                self.missed.remove(&peer);
                evicted.push(peer);
            }
        }
        evicted
    }

    /// A response arrived from `peer`: back to zero.
    pub fn on_response(&mut self, peer: NodeId) {
        self.missed.insert(peer, 0);
    }

    /// Drop the entry for a peer that left the table.
    pub fn forget(&mut self, peer: NodeId) {
        self.missed.remove(&peer);
    }

    /// Current missed count, if the peer has an entry.
    pub fn missed(&self, peer: NodeId) -> Option<u32> {
        self.missed.get(&peer).copied()
    }

    pub fn len(&self) -> usize {
        self.missed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.missed.is_empty()
    }
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MISSED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: NodeId = NodeId::new(0xaaaa);
    const B: NodeId = NodeId::new(0xbbbb);

    #[test]
    fn test_first_cycle_initializes_to_one() {
        let mut tracker = LivenessTracker::default();
        assert_eq!(tracker.missed(A), None);
        assert!(tracker.on_cycle(&[A]).is_empty());
        assert_eq!(tracker.missed(A), Some(1));
    }

    #[test]
    fn test_evicted_on_third_cycle_not_before() {
        let mut tracker = LivenessTracker::default();
        assert!(tracker.on_cycle(&[A]).is_empty());
        assert!(tracker.on_cycle(&[A]).is_empty());
        assert_eq!(tracker.missed(A), Some(2));
        assert_eq!(tracker.on_cycle(&[A]), vec![A]);
        assert_eq!(tracker.missed(A), None);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_response_before_third_increment_resets() {
        let mut tracker = LivenessTracker::default();
        tracker.on_cycle(&[A]);
        tracker.on_cycle(&[A]);
        tracker.on_response(A);
        assert_eq!(tracker.missed(A), Some(0));
        assert!(tracker.on_cycle(&[A]).is_empty());
        assert_eq!(tracker.missed(A), Some(1));
    }

    #[test]
    fn test_response_for_unknown_creates_zero_entry() {
        let mut tracker = LivenessTracker::default();
        tracker.on_response(B);
        assert_eq!(tracker.missed(B), Some(0));
    }

    #[test]
    fn test_peers_tracked_independently() {
        let mut tracker = LivenessTracker::default();
        tracker.on_cycle(&[A, B]);
        tracker.on_response(B);
        tracker.on_cycle(&[A, B]);
        assert_eq!(tracker.on_cycle(&[A, B]), vec![A]);
        assert_eq!(tracker.missed(B), Some(2));
    }

    #[test]
    fn test_forget_removes_entry() {
        let mut tracker = LivenessTracker::default();
        tracker.on_cycle(&[A]);
        tracker.forget(A);
        assert_eq!(tracker.missed(A), None);
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn test_custom_threshold() {
        let mut tracker = LivenessTracker::new(1);
        assert_eq!(tracker.on_cycle(&[A]), vec![A]);

        let tracker = LivenessTracker::new(0);
        assert_eq!(tracker.max_missed(), 1);
    }
}
