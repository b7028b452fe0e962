//! Kademlia routing table.
//!
//! 160 k-buckets indexed by the common-prefix length of (self XOR candidate),
//! each ordered least-recently-seen first. Buckets never contain the local
//! node and never exceed K contacts; contacts are unique by node id.

use std::sync::RwLock;

use zentalk_core::config::{K, MAX_FAILED_PINGS};
use zentalk_core::{Contact, NodeId, ID_BITS};

/// What happened to an `add_contact` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Appended as most-recently-seen
    Added,
    /// Already present; moved to most-recently-seen and refreshed
    Refreshed,
    /// Replaced a stale least-recently-seen contact
    ReplacedStale,
    /// Bucket full of live contacts; newcomer dropped
    BucketFull,
    /// Candidate was the local node
    RejectedSelf,
}

/// Thread-safe routing table with per-bucket locks
pub struct RoutingTable {
    self_id: NodeId,
    buckets: Vec<RwLock<Vec<Contact>>>,
}

impl RoutingTable {
    pub fn new(self_id: NodeId) -> Self {
        let buckets = (0..ID_BITS).map(|_| RwLock::new(Vec::new())).collect();
        Self { self_id, buckets }
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    /// Bucket index for a candidate id (common prefix length, capped at 159)
    fn bucket_index(&self, id: &NodeId) -> usize {
        self.self_id.common_prefix_len(id).min(ID_BITS - 1)
    }

    /// Insert or refresh a contact.
    ///
    /// A full bucket drops the newcomer unless its least-recently-seen
    /// contact has accumulated enough failed pings to count as stale, in
    /// which case the stale contact is evicted. Bucket size never exceeds K.
    pub fn add_contact(&self, contact: Contact) -> AddOutcome {
        if contact.node_id == self.self_id {
            return AddOutcome::RejectedSelf;
        }

        let idx = self.bucket_index(&contact.node_id);
        let mut bucket = self.buckets[idx].write().unwrap();

        if let Some(pos) = bucket.iter().position(|c| c.node_id == contact.node_id) {
            let mut existing = bucket.remove(pos);
            existing.endpoint = contact.endpoint;
            existing.touch();
            bucket.push(existing);
            return AddOutcome::Refreshed;
        }

        if bucket.len() < K {
            bucket.push(contact);
            return AddOutcome::Added;
        }

        // Least-recently-seen lives at the front
        if bucket
            .first()
            .map(|c| c.failed_pings >= MAX_FAILED_PINGS)
            .unwrap_or(false)
        {
            bucket.remove(0);
            bucket.push(contact);
            return AddOutcome::ReplacedStale;
        }

        AddOutcome::BucketFull
    }

    /// Remove a contact by id
    pub fn remove_contact(&self, id: &NodeId) -> bool {
        let idx = self.bucket_index(id);
        let mut bucket = self.buckets[idx].write().unwrap();
        if let Some(pos) = bucket.iter().position(|c| c.node_id == *id) {
            bucket.remove(pos);
            true
        } else {
            false
        }
    }

    /// Record a ping failure against a contact
    pub fn record_failed_ping(&self, id: &NodeId) {
        let idx = self.bucket_index(id);
        let mut bucket = self.buckets[idx].write().unwrap();
        if let Some(c) = bucket.iter_mut().find(|c| c.node_id == *id) {
            c.record_failed_ping();
        }
    }

    /// Up to `count` contacts closest to `target`, sorted by XOR distance
    /// with ties broken by lexicographic id order. Snapshots the table.
    pub fn find_closest(&self, target: &NodeId, count: usize) -> Vec<Contact> {
        let mut all: Vec<Contact> = Vec::new();
        for bucket in &self.buckets {
            all.extend(bucket.read().unwrap().iter().cloned());
        }
        all.sort_by(|a, b| NodeId::cmp_distance(target, &a.node_id, &b.node_id));
        all.truncate(count);
        all
    }

    /// Look up a single contact by id
    pub fn get_contact(&self, id: &NodeId) -> Option<Contact> {
        let idx = self.bucket_index(id);
        self.buckets[idx]
            .read()
            .unwrap()
            .iter()
            .find(|c| c.node_id == *id)
            .cloned()
    }

    /// Total number of contacts across all buckets
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.read().unwrap().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the bucket a candidate id maps to (test and metrics hook)
    pub fn bucket_len(&self, id: &NodeId) -> usize {
        self.buckets[self.bucket_index(id)].read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: NodeId) -> Contact {
        Contact::new(id, "127.0.0.1:4000".parse().unwrap())
    }

    /// Id with a fixed prefix byte so contacts land in one bucket
    fn id_in_bucket_of(self_id: &NodeId, n: u8) -> NodeId {
        let mut bytes = *self_id.as_bytes();
        bytes[0] ^= 0x80; // differ in the first bit: bucket 0
        bytes[19] = n;
        NodeId(bytes)
    }

    #[test]
    fn test_self_rejected() {
        let self_id = NodeId::random();
        let table = RoutingTable::new(self_id);
        assert_eq!(table.add_contact(contact(self_id)), AddOutcome::RejectedSelf);
        assert!(table.is_empty());
    }

    #[test]
    fn test_add_and_find() {
        let table = RoutingTable::new(NodeId::random());
        let id = NodeId::random();
        assert_eq!(table.add_contact(contact(id)), AddOutcome::Added);
        assert_eq!(table.len(), 1);
        assert!(table.get_contact(&id).is_some());
    }

    #[test]
    fn test_readd_refreshes_not_duplicates() {
        let table = RoutingTable::new(NodeId::random());
        let id = NodeId::random();
        table.add_contact(contact(id));
        assert_eq!(table.add_contact(contact(id)), AddOutcome::Refreshed);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_refresh_moves_to_most_recent_end() {
        let self_id = NodeId::ZERO;
        let table = RoutingTable::new(self_id);
        let a = id_in_bucket_of(&self_id, 1);
        let b = id_in_bucket_of(&self_id, 2);
        table.add_contact(contact(a));
        table.add_contact(contact(b));

        // Refresh a: b becomes least-recently-seen
        table.add_contact(contact(a));
        table.record_failed_ping(&b);
        for _ in 0..MAX_FAILED_PINGS {
            table.record_failed_ping(&b);
        }

        // Fill the bucket to force the staleness path at the front
        for n in 3..=(K as u8) {
            table.add_contact(contact(id_in_bucket_of(&self_id, n)));
        }
        assert_eq!(table.bucket_len(&a), K);

        let newcomer = id_in_bucket_of(&self_id, 200);
        assert_eq!(table.add_contact(contact(newcomer)), AddOutcome::ReplacedStale);
        assert!(table.get_contact(&b).is_none());
        assert!(table.get_contact(&a).is_some());
    }

    #[test]
    fn test_bucket_never_exceeds_k() {
        let self_id = NodeId::ZERO;
        let table = RoutingTable::new(self_id);

        for n in 0..100u8 {
            table.add_contact(contact(id_in_bucket_of(&self_id, n)));
        }
        let probe = id_in_bucket_of(&self_id, 0);
        assert_eq!(table.bucket_len(&probe), K);
    }

    #[test]
    fn test_full_bucket_rejects_live_newcomer() {
        let self_id = NodeId::ZERO;
        let table = RoutingTable::new(self_id);
        for n in 0..K as u8 {
            table.add_contact(contact(id_in_bucket_of(&self_id, n)));
        }
        let newcomer = id_in_bucket_of(&self_id, 250);
        assert_eq!(table.add_contact(contact(newcomer)), AddOutcome::BucketFull);
        assert!(table.get_contact(&newcomer).is_none());
    }

    #[test]
    fn test_remove_contact() {
        let table = RoutingTable::new(NodeId::random());
        let id = NodeId::random();
        table.add_contact(contact(id));
        assert!(table.remove_contact(&id));
        assert!(!table.remove_contact(&id));
        assert!(table.is_empty());
    }

    #[test]
    fn test_find_closest_sorted_by_distance() {
        let self_id = NodeId::random();
        let table = RoutingTable::new(self_id);
        for _ in 0..50 {
            table.add_contact(contact(NodeId::random()));
        }

        let target = NodeId::random();
        let closest = table.find_closest(&target, 10);
        assert!(closest.len() <= 10);
        for pair in closest.windows(2) {
            assert_ne!(
                NodeId::cmp_distance(&target, &pair[0].node_id, &pair[1].node_id),
                std::cmp::Ordering::Greater
            );
        }
    }

    #[test]
    fn test_find_closest_returns_all_when_few() {
        let table = RoutingTable::new(NodeId::random());
        let a = NodeId::random();
        let b = NodeId::random();
        table.add_contact(contact(a));
        table.add_contact(contact(b));
        assert_eq!(table.find_closest(&NodeId::random(), 20).len(), 2);
    }
}
