//! Offline message queue.
//!
//! Subscribers that are not connected get their onion-delivered payloads
//! parked here until they reconnect. Entries carry a TTL; the hourly sweeper
//! silently discards expired ones. The SQLite-backed production queue lives
//! outside the core; this module defines the interface it implements plus a
//! bounded in-memory implementation used by tests and small deployments.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

use zentalk_core::{unix_now, Address, MessageId};

/// One parked message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub recipient: Address,
    pub message_id: MessageId,
    pub payload: Vec<u8>,
    pub timestamp: u64,
    pub expires_at: u64,
    pub attempts: u32,
}

impl QueuedMessage {
    pub fn new(recipient: Address, payload: Vec<u8>, ttl: Duration) -> Self {
        let now = unix_now();
        Self {
            recipient,
            message_id: MessageId::random(),
            payload,
            timestamp: now,
            expires_at: now + ttl.as_secs(),
            attempts: 0,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= unix_now()
    }
}

/// Storage interface the relay requires for offline delivery.
///
/// Entries for one recipient are FIFO ordered. `remove` is called only after
/// a successful write to the reconnected subscriber.
pub trait OfflineQueue: Send + Sync {
    /// Park a message; fails when the queue is at capacity.
    fn enqueue(&self, message: QueuedMessage) -> Result<(), QueueFull>;

    /// Snapshot of pending messages for a recipient, oldest first.
    fn pending_for(&self, recipient: &Address) -> Vec<QueuedMessage>;

    /// Delete one delivered entry.
    fn remove(&self, recipient: &Address, message_id: &MessageId) -> bool;

    /// Record a failed delivery attempt.
    fn record_attempt(&self, recipient: &Address, message_id: &MessageId);

    /// Discard expired entries, returning how many were dropped.
    fn sweep_expired(&self) -> usize;

    /// Total parked messages.
    fn len(&self) -> usize;
}

/// Queue capacity exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

/// Bounded in-memory queue
pub struct MemoryQueue {
    capacity: usize,
    messages: RwLock<HashMap<Address, VecDeque<QueuedMessage>>>,
}

impl MemoryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            messages: RwLock::new(HashMap::new()),
        }
    }
}

impl OfflineQueue for MemoryQueue {
    fn enqueue(&self, message: QueuedMessage) -> Result<(), QueueFull> {
        let mut messages = self.messages.write().unwrap();
        let total: usize = messages.values().map(|q| q.len()).sum();
        if total >= self.capacity {
            return Err(QueueFull);
        }
        messages
            .entry(message.recipient)
            .or_default()
            .push_back(message);
        Ok(())
    }

    fn pending_for(&self, recipient: &Address) -> Vec<QueuedMessage> {
        self.messages
            .read()
            .unwrap()
            .get(recipient)
            .map(|q| q.iter().filter(|m| !m.is_expired()).cloned().collect())
            .unwrap_or_default()
    }

    fn remove(&self, recipient: &Address, message_id: &MessageId) -> bool {
        let mut messages = self.messages.write().unwrap();
        if let Some(queue) = messages.get_mut(recipient) {
            if let Some(pos) = queue.iter().position(|m| m.message_id == *message_id) {
                queue.remove(pos);
                if queue.is_empty() {
                    messages.remove(recipient);
                }
                return true;
            }
        }
        false
    }

    fn record_attempt(&self, recipient: &Address, message_id: &MessageId) {
        let mut messages = self.messages.write().unwrap();
        if let Some(queue) = messages.get_mut(recipient) {
            if let Some(m) = queue.iter_mut().find(|m| m.message_id == *message_id) {
                m.attempts += 1;
            }
        }
    }

    fn sweep_expired(&self) -> usize {
        let mut messages = self.messages.write().unwrap();
        let mut dropped = 0;
        messages.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|m| !m.is_expired());
            dropped += before - queue.len();
            !queue.is_empty()
        });
        dropped
    }

    fn len(&self) -> usize {
        self.messages.read().unwrap().values().map(|q| q.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(recipient: u8, payload: &[u8]) -> QueuedMessage {
        QueuedMessage::new(
            Address([recipient; 20]),
            payload.to_vec(),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_enqueue_and_pending_fifo() {
        let queue = MemoryQueue::new(10);
        queue.enqueue(msg(1, b"first")).unwrap();
        queue.enqueue(msg(1, b"second")).unwrap();
        queue.enqueue(msg(2, b"other")).unwrap();

        let pending = queue.pending_for(&Address([1u8; 20]));
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].payload, b"first");
        assert_eq!(pending[1].payload, b"second");
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_capacity_bound() {
        let queue = MemoryQueue::new(2);
        queue.enqueue(msg(1, b"a")).unwrap();
        queue.enqueue(msg(1, b"b")).unwrap();
        assert_eq!(queue.enqueue(msg(1, b"c")), Err(QueueFull));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_remove_after_delivery() {
        let queue = MemoryQueue::new(10);
        let m = msg(1, b"payload");
        let id = m.message_id;
        queue.enqueue(m).unwrap();

        assert!(queue.remove(&Address([1u8; 20]), &id));
        assert!(!queue.remove(&Address([1u8; 20]), &id));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_sweep_discards_expired_silently() {
        let queue = MemoryQueue::new(10);
        let expired = QueuedMessage::new(Address([1u8; 20]), b"old".to_vec(), Duration::from_secs(0));
        queue.enqueue(expired).unwrap();
        queue.enqueue(msg(1, b"fresh")).unwrap();

        assert_eq!(queue.sweep_expired(), 1);
        let pending = queue.pending_for(&Address([1u8; 20]));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload, b"fresh");
    }

    #[test]
    fn test_expired_entries_hidden_from_pending() {
        let queue = MemoryQueue::new(10);
        let expired = QueuedMessage::new(Address([1u8; 20]), b"old".to_vec(), Duration::from_secs(0));
        queue.enqueue(expired).unwrap();
        assert!(queue.pending_for(&Address([1u8; 20])).is_empty());
    }

    #[test]
    fn test_record_attempt() {
        let queue = MemoryQueue::new(10);
        let m = msg(1, b"p");
        let id = m.message_id;
        queue.enqueue(m).unwrap();

        queue.record_attempt(&Address([1u8; 20]), &id);
        queue.record_attempt(&Address([1u8; 20]), &id);
        assert_eq!(queue.pending_for(&Address([1u8; 20]))[0].attempts, 2);
    }
}
