//! Protocol-wide constants.

use std::time::Duration;

/// Bucket capacity and replication factor (Kademlia K)
pub const K: usize = 20;

/// Lookup concurrency (Kademlia alpha)
pub const ALPHA: usize = 3;

/// TCP dial timeout
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-RPC deadline for DHT requests
pub const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle keepalive interval on client connections
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Initial reconnect backoff
pub const BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Reconnect backoff cap
pub const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// TTL for signed DHT entries (descriptors, key bundles)
pub const DHT_ENTRY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Interval between local storage expiry sweeps
pub const STORAGE_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default TTL for offline-queued messages
pub const OFFLINE_QUEUE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Interval between offline queue sweeps
pub const OFFLINE_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Pacing between drained offline messages on reconnect
pub const OFFLINE_DRAIN_PACING: Duration = Duration::from_millis(50);

/// Maximum skipped message keys cached per ratchet chain advance
pub const MAX_SKIPPED_KEYS: usize = 1000;

/// Failed pings after which a routing-table contact is considered stale
pub const MAX_FAILED_PINGS: u32 = 3;

/// Number of long-lived guard relays
pub const GUARD_COUNT: usize = 3;

/// Guard rotation period
pub const GUARD_ROTATION: Duration = Duration::from_secs(60 * 24 * 60 * 60);

/// Minimum apparent uptime before a relay qualifies as a guard
pub const GUARD_MIN_UPTIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Minimum reliability before a relay qualifies as a guard
pub const GUARD_MIN_RELIABILITY: f64 = 0.8;

/// Recorded failures after which a guard is replaced
pub const GUARD_MAX_FAILURES: u32 = 10;

/// Consecutive failures before a relay is blacklisted
pub const BLACKLIST_THRESHOLD: u32 = 3;

/// Blacklist duration after repeated failures
pub const BLACKLIST_DURATION: Duration = Duration::from_secs(10 * 60);

/// Descriptor freshness bound for the "healthy" predicate
pub const HEALTHY_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Minimum reliability for the "healthy" predicate
pub const HEALTHY_MIN_RELIABILITY: f64 = 0.5;

/// Maximum packet loss for the "healthy" predicate
pub const HEALTHY_MAX_PACKET_LOSS: f64 = 0.3;

/// EWMA weight kept from the previous latency estimate
pub const LATENCY_EWMA_KEEP: f64 = 0.9;

/// Target number of inter-relay mesh connections
pub const MESH_TARGET_PEERS: usize = 8;

/// Interval between mesh discovery / descriptor republish rounds
pub const MESH_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(15 * 60);
