//! Local TTL-bound value storage.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use zentalk_core::{unix_now, NodeId};

/// A value held by this node on behalf of the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub key: NodeId,
    pub value: Vec<u8>,
    /// Unix seconds after which the value is gone
    pub expires_at: u64,
    pub publisher: NodeId,
}

/// Concurrent map from node id to stored value with expiry semantics.
///
/// `get`, `has`, and `len` agree: an expired value is absent everywhere even
/// before the sweeper physically removes it.
pub struct Storage {
    values: RwLock<HashMap<NodeId, StoredValue>>,
}

impl Storage {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
        }
    }

    pub fn put(&self, key: NodeId, value: Vec<u8>, ttl: Duration, publisher: NodeId) {
        let stored = StoredValue {
            key,
            value,
            expires_at: unix_now() + ttl.as_secs(),
            publisher,
        };
        self.values.write().unwrap().insert(key, stored);
    }

    /// `None` if absent or expired
    pub fn get(&self, key: &NodeId) -> Option<StoredValue> {
        let values = self.values.read().unwrap();
        let v = values.get(key)?;
        if v.expires_at <= unix_now() {
            return None;
        }
        Some(v.clone())
    }

    pub fn has(&self, key: &NodeId) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&self, key: &NodeId) -> bool {
        self.values.write().unwrap().remove(key).is_some()
    }

    /// Live (non-expired) value count
    pub fn len(&self) -> usize {
        let now = unix_now();
        self.values
            .read()
            .unwrap()
            .values()
            .filter(|v| v.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Physically remove every value whose TTL has elapsed; returns how many
    pub fn expire_sweep(&self) -> usize {
        let now = unix_now();
        let mut values = self.values.write().unwrap();
        let before = values.len();
        values.retain(|_, v| v.expires_at > now);
        before - values.len()
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let storage = Storage::new();
        let key = NodeId::random();
        storage.put(key, b"value".to_vec(), Duration::from_secs(60), NodeId::random());

        let stored = storage.get(&key).unwrap();
        assert_eq!(stored.value, b"value");
        assert!(storage.has(&key));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_absent_key() {
        let storage = Storage::new();
        assert!(storage.get(&NodeId::random()).is_none());
    }

    #[test]
    fn test_expired_value_is_absent_before_sweep() {
        let storage = Storage::new();
        let key = NodeId::random();
        storage.put(key, b"v".to_vec(), Duration::from_secs(0), NodeId::random());

        assert!(storage.get(&key).is_none());
        assert!(!storage.has(&key));
        assert_eq!(storage.len(), 0);
    }

    #[test]
    fn test_expire_sweep_removes_only_expired() {
        let storage = Storage::new();
        let dead = NodeId::random();
        let live = NodeId::random();
        storage.put(dead, b"dead".to_vec(), Duration::from_secs(0), NodeId::random());
        storage.put(live, b"live".to_vec(), Duration::from_secs(60), NodeId::random());

        assert_eq!(storage.expire_sweep(), 1);
        assert!(storage.has(&live));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_overwrite_same_key() {
        let storage = Storage::new();
        let key = NodeId::random();
        storage.put(key, b"one".to_vec(), Duration::from_secs(60), NodeId::random());
        storage.put(key, b"two".to_vec(), Duration::from_secs(60), NodeId::random());
        assert_eq!(storage.get(&key).unwrap().value, b"two");
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_remove() {
        let storage = Storage::new();
        let key = NodeId::random();
        storage.put(key, b"v".to_vec(), Duration::from_secs(60), NodeId::random());
        assert!(storage.remove(&key));
        assert!(!storage.remove(&key));
        assert!(storage.is_empty());
    }
}
