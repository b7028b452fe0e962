//! Per-peer ordered delivery.
//!
//! Sequence numbers start at 1 and increase by one per sent message. The
//! receiver delivers strictly in order: ahead-of-expected arrivals are
//! buffered, stale or repeated sequence numbers are dropped as duplicates
//! (the caller still acknowledges them), and delivering the expected message
//! drains any consecutive buffered run behind it.

use std::collections::BTreeMap;

use zentalk_wire::DirectMessage;

/// Result of offering a received message to the sequencer
#[derive(Debug, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// Deliver these messages to the application, in order
    Deliver(Vec<DirectMessage>),
    /// Ahead of the expected sequence; parked
    Buffered,
    /// Stale or already seen; drop (but still acknowledge)
    Duplicate,
}

/// Ordering state for one peer
pub struct PeerSequencer {
    next_send: u64,
    expected_recv: u64,
    buffered: BTreeMap<u64, DirectMessage>,
}

impl PeerSequencer {
    pub fn new() -> Self {
        Self {
            next_send: 1,
            expected_recv: 1,
            buffered: BTreeMap::new(),
        }
    }

    /// Allocate the next outgoing sequence number
    pub fn allocate_send(&mut self) -> u64 {
        let seq = self.next_send;
        self.next_send += 1;
        seq
    }

    pub fn expected(&self) -> u64 {
        self.expected_recv
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Offer a received message for ordered delivery
    pub fn offer(&mut self, message: DirectMessage) -> SequenceOutcome {
        let seq = message.sequence;

        if seq < self.expected_recv {
            return SequenceOutcome::Duplicate;
        }

        if seq > self.expected_recv {
            if self.buffered.contains_key(&seq) {
                return SequenceOutcome::Duplicate;
            }
            self.buffered.insert(seq, message);
            return SequenceOutcome::Buffered;
        }

        // seq == expected: deliver it plus any consecutive run behind it
        let mut out = vec![message];
        self.expected_recv += 1;
        while let Some(next) = self.buffered.remove(&self.expected_recv) {
            out.push(next);
            self.expected_recv += 1;
        }
        SequenceOutcome::Deliver(out)
    }
}

impl Default for PeerSequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zentalk_core::{Address, ContentType, MessageId};

    fn msg(seq: u64) -> DirectMessage {
        DirectMessage {
            from: Address([1u8; 20]),
            to: Address([2u8; 20]),
            timestamp_ms: 0,
            sequence: seq,
            content_type: ContentType::Text,
            reply_to: MessageId::ZERO,
            content: format!("m{seq}").into_bytes(),
            signature: vec![],
        }
    }

    fn delivered(outcome: SequenceOutcome) -> Vec<u64> {
        match outcome {
            SequenceOutcome::Deliver(msgs) => msgs.iter().map(|m| m.sequence).collect(),
            _ => vec![],
        }
    }

    #[test]
    fn test_allocate_send_monotonic() {
        let mut seq = PeerSequencer::new();
        assert_eq!(seq.allocate_send(), 1);
        assert_eq!(seq.allocate_send(), 2);
        assert_eq!(seq.allocate_send(), 3);
    }

    #[test]
    fn test_in_order_delivery() {
        let mut seq = PeerSequencer::new();
        assert_eq!(delivered(seq.offer(msg(1))), vec![1]);
        assert_eq!(delivered(seq.offer(msg(2))), vec![2]);
        assert_eq!(seq.expected(), 3);
    }

    #[test]
    fn test_out_of_order_buffers_then_drains() {
        // Arrival order 1, 3, 2, 5, 4 → delivery order 1..=5
        let mut seq = PeerSequencer::new();

        assert_eq!(delivered(seq.offer(msg(1))), vec![1]);
        assert_eq!(seq.offer(msg(3)), SequenceOutcome::Buffered);
        assert_eq!(delivered(seq.offer(msg(2))), vec![2, 3]);
        assert_eq!(seq.offer(msg(5)), SequenceOutcome::Buffered);
        assert_eq!(delivered(seq.offer(msg(4))), vec![4, 5]);
        assert_eq!(seq.expected(), 6);
        assert_eq!(seq.buffered_len(), 0);
    }

    #[test]
    fn test_duplicate_after_delivery_dropped() {
        let mut seq = PeerSequencer::new();
        seq.offer(msg(1));
        seq.offer(msg(2));
        seq.offer(msg(3));
        assert_eq!(seq.offer(msg(3)), SequenceOutcome::Duplicate);
        assert_eq!(seq.offer(msg(1)), SequenceOutcome::Duplicate);
    }

    #[test]
    fn test_duplicate_while_buffered_dropped() {
        let mut seq = PeerSequencer::new();
        assert_eq!(seq.offer(msg(5)), SequenceOutcome::Buffered);
        assert_eq!(seq.offer(msg(5)), SequenceOutcome::Duplicate);
        assert_eq!(seq.buffered_len(), 1);
    }

    #[test]
    fn test_gap_never_delivers_early() {
        let mut seq = PeerSequencer::new();
        assert_eq!(seq.offer(msg(2)), SequenceOutcome::Buffered);
        assert_eq!(seq.offer(msg(3)), SequenceOutcome::Buffered);
        assert_eq!(seq.expected(), 1);
        assert_eq!(delivered(seq.offer(msg(1))), vec![1, 2, 3]);
    }
}
