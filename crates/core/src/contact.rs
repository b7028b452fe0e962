use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::{unix_now, NodeId};

/// A known peer in the DHT: identifier plus reachable network endpoint.
///
/// Owned by the routing table, which tracks recency and ping failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub node_id: NodeId,
    pub endpoint: SocketAddr,
    /// Unix seconds of the last observed activity
    pub last_seen: u64,
    /// Consecutive failed pings since the last successful exchange
    pub failed_pings: u32,
}

impl Contact {
    pub fn new(node_id: NodeId, endpoint: SocketAddr) -> Self {
        Self {
            node_id,
            endpoint,
            last_seen: unix_now(),
            failed_pings: 0,
        }
    }

    /// Mark fresh activity: resets the failure counter
    pub fn touch(&mut self) {
        self.last_seen = unix_now();
        self.failed_pings = 0;
    }

    pub fn record_failed_ping(&mut self) {
        self.failed_pings += 1;
    }
}
