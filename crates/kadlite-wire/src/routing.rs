//! XOR-metric routing table.
//!
//! The table has one bucket per identity bit, each holding at most one
//! peer (k = 1). A peer's bucket is the position of the first bit, counting
//! from the most significant, where its identity differs from ours. When two
//! candidates compete for a bucket the XOR-closer one wins; on equal
//! distance the more recently seen one wins.

use kadlite_types::identity::ID_BITS;
use kadlite_types::{NodeId, PeerRecord};

/// Number of buckets in a table.
pub const BUCKET_COUNT: usize = ID_BITS;

/// One routing table slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Bucket {
    #[default]
    Empty,
    Occupied(PeerRecord),
}

impl Bucket {
    /// The occupant, if any.
    pub fn peer(&self) -> Option<&PeerRecord> {
        match self {
            Bucket::Empty => None,
            Bucket::Occupied(record) => Some(record),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Bucket::Empty)
    }
}

/// What an [`RoutingTable::upsert`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The bucket was empty.
    Inserted,
    /// The candidate displaced this incumbent.
    Replaced(PeerRecord),
    /// The incumbent stays.
    Unchanged,
}

/// Bucket index of `peer` relative to `local`: the position of the first
/// differing bit, or 0 when the identities are equal.
pub fn bucket_index(local: NodeId, peer: NodeId) -> usize {
    match local.distance(peer) {
        0 => 0,
        d => d.leading_zeros() as usize,
    }
}

/// Should `candidate` displace `incumbent`?
///
/// Strictly closer wins; at equal distance, strictly more recent wins.
pub fn should_replace(local: NodeId, incumbent: &PeerRecord, candidate: &PeerRecord) -> bool {
    let d1 = local.distance(incumbent.identity);
    let d2 = local.distance(candidate.identity);
    d2 < d1 || (d2 == d1 && candidate.last_seen > incumbent.last_seen)
}

/// The bucketed peer table of one local node.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    local_id: NodeId,
    buckets: [Bucket; BUCKET_COUNT],
}

impl RoutingTable {
    /// Create an empty table for `local_id`.
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            buckets: std::array::from_fn(|_| Bucket::Empty),
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Bucket index for `identity` in this table.
    pub fn bucket_index(&self, identity: NodeId) -> usize {
        bucket_index(self.local_id, identity)
    }

    /// Insert or replace per the tie-break rule.
    pub fn upsert(&mut self, record: PeerRecord) -> UpsertOutcome {
        let local_id = self.local_id;
        let index = self.bucket_index(record.identity);
        if let Bucket::Occupied(incumbent) = &mut self.buckets[index] {
            return if should_replace(local_id, incumbent, &record) {
                UpsertOutcome::Replaced(std::mem::replace(incumbent, record))
            } else {
                UpsertOutcome::Unchanged
            };
        }
        self.buckets[index] = Bucket::Occupied(record);
        UpsertOutcome::Inserted
    }

    /// Remove `identity` if it occupies its bucket.
    pub fn remove(&mut self, identity: NodeId) -> Option<PeerRecord> {
        let index = self.bucket_index(identity);
        let is_occupant = self.buckets[index]
            .peer()
            .is_some_and(|record| record.identity == identity);
        if !is_occupant {
            return None;
        }
        match std::mem::take(&mut self.buckets[index]) {
            Bucket::Occupied(record) => Some(record),
            Bucket::Empty => None,
        }
    }

    pub fn contains(&self, identity: NodeId) -> bool {
        self.get(identity).is_some()
    }

    /// The record for `identity`, if present.
    pub fn get(&self, identity: NodeId) -> Option<&PeerRecord> {
        self.buckets[self.bucket_index(identity)]
            .peer()
            .filter(|record| record.identity == identity)
    }

    /// The known peer nearest to `target` by XOR distance.
    ///
    /// With one peer per bucket this is a plain enumerate-and-sort.
    pub fn closest(&self, target: NodeId) -> Option<PeerRecord> {
        let mut peers = self.all_peers();
        peers.sort_by_key(|p| p.identity.distance(target));
        peers.into_iter().next()
    }

    /// Every occupant, in bucket order.
    pub fn all_peers(&self) -> Vec<PeerRecord> {
        self.buckets.iter().filter_map(Bucket::peer).cloned().collect()
    }

    pub fn buckets(&self) -> &[Bucket; BUCKET_COUNT] {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().filter(|b| !b.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Bucket::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kadlite_types::Tick;
    use std::net::Ipv4Addr;

    fn peer(id: u16, seen: u64) -> PeerRecord {
        PeerRecord {
            identity: NodeId::new(id),
            ip: Ipv4Addr::new(10, 0, 0, 1),
            port: 5000,
            display_name: format!("peer-{id:04x}"),
            last_seen: Tick(seen),
        }
    }

    #[test]
    fn test_bucket_index_first_differing_bit() {
        let local = NodeId::new(0b0000_0000_0000_0000);
        assert_eq!(bucket_index(local, NodeId::new(0x8000)), 0);
        assert_eq!(bucket_index(local, NodeId::new(0x4000)), 1);
        assert_eq!(bucket_index(local, NodeId::new(0x0100)), 7);
        assert_eq!(bucket_index(local, NodeId::new(0x0001)), 15);
        assert_eq!(bucket_index(local, NodeId::new(0x7fff)), 1);

        let local = NodeId::new(0xf0f0);
        assert_eq!(bucket_index(local, NodeId::new(0xf0f1)), 15);
        assert_eq!(bucket_index(local, NodeId::new(0x70f0)), 0);
    }

    #[test]
    fn test_bucket_index_identical_is_zero() {
        for raw in [0u16, 1, 0x8000, 0xffff, 0x1234] {
            assert_eq!(bucket_index(NodeId::new(raw), NodeId::new(raw)), 0);
        }
    }

    #[test]
    fn test_bucket_index_deterministic_and_bounded() {
        for (a, b) in [(0x0000, 0xffff), (0x1234, 0x4321), (0xaaaa, 0x5555)] {
            let first = bucket_index(NodeId::new(a), NodeId::new(b));
            assert_eq!(first, bucket_index(NodeId::new(a), NodeId::new(b)));
            assert!(first < BUCKET_COUNT);
        }
        let local = NodeId::new(0x3c3c);
        for raw in (0..=u16::MAX).step_by(97) {
            assert!(bucket_index(local, NodeId::new(raw)) < BUCKET_COUNT);
        }
    }

    #[test]
    fn test_upsert_into_empty_bucket() {
        let mut table = RoutingTable::new(NodeId::new(0));
        assert!(table.is_empty());
        assert_eq!(table.upsert(peer(0x8001, 1)), UpsertOutcome::Inserted);
        assert!(table.contains(NodeId::new(0x8001)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_tie_break_law() {
        let local = NodeId::new(0);
        // Both land in bucket 0; distance equals the raw id.
        let ids = [0x8000u16, 0x8001, 0x8002];
        for &d1 in &ids {
            for &d2 in &ids {
                for t1 in 0..3u64 {
                    for t2 in 0..3u64 {
                        let mut table = RoutingTable::new(local);
                        table.upsert(peer(d1, t1));
                        let outcome = table.upsert(peer(d2, t2));
                        let expect_replace = d2 < d1 || (d2 == d1 && t2 > t1);
                        let occupant = table.buckets()[0].peer().unwrap().clone();
                        if expect_replace {
                            assert_eq!(outcome, UpsertOutcome::Replaced(peer(d1, t1)));
                            assert_eq!(occupant, peer(d2, t2));
                        } else {
                            assert_eq!(outcome, UpsertOutcome::Unchanged);
                            assert_eq!(occupant, peer(d1, t1));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_equal_distance_equal_time_keeps_incumbent() {
        let mut table = RoutingTable::new(NodeId::new(0x1000));
        let mut first = peer(0x9000, 5);
        first.display_name = "first".into();
        let mut second = peer(0x9000, 5);
        second.display_name = "second".into();
        table.upsert(first);
        assert_eq!(table.upsert(second), UpsertOutcome::Unchanged);
        assert_eq!(table.get(NodeId::new(0x9000)).unwrap().display_name, "first");
    }

    #[test]
    fn test_same_peer_refreshes_last_seen() {
        let mut table = RoutingTable::new(NodeId::new(0));
        table.upsert(peer(0x0400, 1));
        assert!(matches!(
            table.upsert(peer(0x0400, 9)),
            UpsertOutcome::Replaced(_)
        ));
        assert_eq!(table.get(NodeId::new(0x0400)).unwrap().last_seen, Tick(9));
    }

    #[test]
    fn test_no_identity_in_two_buckets() {
        let mut table = RoutingTable::new(NodeId::new(0x00ff));
        for seen in 0..5 {
            table.upsert(peer(0x0f00, seen));
        }
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_only_matching_occupant() {
        let mut table = RoutingTable::new(NodeId::new(0));
        table.upsert(peer(0x8000, 1));
        // 0x8001 shares bucket 0 but is not the occupant.
        assert_eq!(table.remove(NodeId::new(0x8001)), None);
        assert!(table.contains(NodeId::new(0x8000)));
        assert_eq!(table.remove(NodeId::new(0x8000)), Some(peer(0x8000, 1)));
        assert!(table.is_empty());
        assert_eq!(table.remove(NodeId::new(0x8000)), None);
    }

    #[test]
    fn test_closest_by_xor() {
        let mut table = RoutingTable::new(NodeId::new(0));
        assert_eq!(table.closest(NodeId::new(0x1234)), None);
        table.upsert(peer(0x8000, 1));
        table.upsert(peer(0x4000, 1));
        table.upsert(peer(0x0010, 1));
        assert_eq!(
            table.closest(NodeId::new(0x4001)).unwrap().identity,
            NodeId::new(0x4000)
        );
        assert_eq!(
            table.closest(NodeId::new(0x0000)).unwrap().identity,
            NodeId::new(0x0010)
        );
    }

    #[test]
    fn test_all_peers_in_bucket_order() {
        let mut table = RoutingTable::new(NodeId::new(0));
        table.upsert(peer(0x0001, 1)); // bucket 15
        table.upsert(peer(0x8000, 1)); // bucket 0
        table.upsert(peer(0x0100, 1)); // bucket 7
        let ids: Vec<u16> = table.all_peers().iter().map(|p| p.identity.raw()).collect();
        assert_eq!(ids, vec![0x8000, 0x0100, 0x0001]);
    }
}
