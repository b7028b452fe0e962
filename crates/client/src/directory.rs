//! Relay directory: known descriptors, per-relay health, guard relays, and
//! circuit selection.
//!
//! Health is tracked from our own traffic: a success resets the consecutive
//! failure counter and folds the latency sample into an EWMA; three
//! consecutive failures blacklist the relay for ten minutes. Guards are
//! long-lived entry relays rotated on a slow clock and always placed first
//! in a new circuit.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::{debug, info};
use zentalk_core::config::{
    BLACKLIST_DURATION, BLACKLIST_THRESHOLD, GUARD_COUNT, GUARD_MAX_FAILURES,
    GUARD_MIN_RELIABILITY, GUARD_MIN_UPTIME, GUARD_ROTATION, HEALTHY_MAX_AGE,
    HEALTHY_MAX_PACKET_LOSS, HEALTHY_MIN_RELIABILITY, LATENCY_EWMA_KEEP,
};
use zentalk_core::{Address, RelayDescriptor};

/// Health we have observed for one relay
#[derive(Debug, Clone, Default)]
pub struct RelayHealth {
    pub success_count: u32,
    pub failure_count: u32,
    pub consecutive_failures: u32,
    /// EWMA of observed latency; zero until the first sample
    pub latency_ewma_ms: f64,
    blacklisted_until: Option<Instant>,
}

impl RelayHealth {
    pub fn is_blacklisted(&self) -> bool {
        self.blacklisted_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }
}

/// One guard entry with its selection time for rotation
#[derive(Debug, Clone)]
struct GuardEntry {
    address: Address,
    selected_at: Instant,
}

/// In-memory relay directory
pub struct RelayDirectory {
    relays: RwLock<HashMap<Address, RelayDescriptor>>,
    health: RwLock<HashMap<Address, RelayHealth>>,
    guards: RwLock<Vec<GuardEntry>>,
}

impl RelayDirectory {
    pub fn new() -> Self {
        Self {
            relays: RwLock::new(HashMap::new()),
            health: RwLock::new(HashMap::new()),
            guards: RwLock::new(Vec::new()),
        }
    }

    /// Insert or refresh a descriptor
    pub fn upsert(&self, descriptor: RelayDescriptor) {
        self.relays.write().insert(descriptor.address, descriptor);
    }

    pub fn get(&self, address: &Address) -> Option<RelayDescriptor> {
        self.relays.read().get(address).cloned()
    }

    pub fn len(&self) -> usize {
        self.relays.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn health_of(&self, address: &Address) -> RelayHealth {
        self.health.read().get(address).cloned().unwrap_or_default()
    }

    /// Record a successful exchange with a relay
    pub fn record_success(&self, address: &Address, latency_ms: u32) {
        let mut health = self.health.write();
        let h = health.entry(*address).or_default();
        h.success_count += 1;
        h.consecutive_failures = 0;
        h.blacklisted_until = None;
        h.latency_ewma_ms = if h.latency_ewma_ms == 0.0 {
            latency_ms as f64
        } else {
            LATENCY_EWMA_KEEP * h.latency_ewma_ms + (1.0 - LATENCY_EWMA_KEEP) * latency_ms as f64
        };
    }

    /// Record a failed exchange; repeated failures blacklist the relay
    pub fn record_failure(&self, address: &Address) {
        let mut health = self.health.write();
        let h = health.entry(*address).or_default();
        h.failure_count += 1;
        h.consecutive_failures += 1;
        if h.consecutive_failures >= BLACKLIST_THRESHOLD {
            h.blacklisted_until = Some(Instant::now() + BLACKLIST_DURATION);
            debug!(relay = %address, "relay blacklisted");
        }
        drop(health);
        self.maybe_demote_guard(address);
    }

    pub fn is_blacklisted(&self, address: &Address) -> bool {
        self.health
            .read()
            .get(address)
            .map(|h| h.is_blacklisted())
            .unwrap_or(false)
    }

    /// The §"healthy" predicate: fresh, reliable, low-loss
    pub fn is_healthy(descriptor: &RelayDescriptor) -> bool {
        descriptor.age_secs() <= HEALTHY_MAX_AGE.as_secs()
            && descriptor.reliability >= HEALTHY_MIN_RELIABILITY
            && descriptor.packet_loss <= HEALTHY_MAX_PACKET_LOSS
    }

    fn usable(&self, descriptor: &RelayDescriptor) -> bool {
        Self::is_healthy(descriptor) && !self.is_blacklisted(&descriptor.address)
    }

    /// Random selection of up to `n` healthy, non-blacklisted relays
    pub fn discover(&self, n: usize) -> Vec<RelayDescriptor> {
        let relays = self.relays.read();
        let mut eligible: Vec<RelayDescriptor> = relays
            .values()
            .filter(|d| self.usable(d))
            .cloned()
            .collect();
        drop(relays);
        eligible.shuffle(&mut rand::thread_rng());
        eligible.truncate(n);
        eligible
    }

    /// Weighted selection score (higher is better)
    pub fn score(&self, descriptor: &RelayDescriptor) -> f64 {
        let age = descriptor.age_secs() as f64;
        let recency = 30.0 * (1.0 - (age.min(3600.0) / 3600.0));
        let reliability = 30.0 * descriptor.reliability;

        let latency = {
            let observed = self.health_of(&descriptor.address).latency_ewma_ms;
            let ms = if observed > 0.0 {
                observed
            } else {
                descriptor.latency_ms as f64
            };
            20.0 * (1.0 - (ms.min(1000.0) / 1000.0))
        };

        let loss = 10.0 * (1.0 - descriptor.packet_loss);
        let uptime =
            10.0 * (descriptor.uptime_seconds as f64 / GUARD_MIN_UPTIME.as_secs() as f64).min(1.0);

        recency + reliability + latency + loss + uptime
    }

    /// Pick `n` relays for a circuit: score-sorted, greedily preferring
    /// distinct operators and regions, with a guard at the first position.
    pub fn select_optimal_circuit(&self, n: usize) -> Vec<RelayDescriptor> {
        if n == 0 {
            return vec![];
        }

        let mut circuit: Vec<RelayDescriptor> = Vec::with_capacity(n);
        if let Some(guard) = self.current_guard() {
            circuit.push(guard);
        }

        let mut candidates: Vec<RelayDescriptor> = {
            let relays = self.relays.read();
            relays
                .values()
                .filter(|d| self.usable(d))
                .filter(|d| !circuit.iter().any(|c| c.address == d.address))
                .cloned()
                .collect()
        };
        candidates
            .sort_by(|a, b| self.score(b).partial_cmp(&self.score(a)).unwrap_or(std::cmp::Ordering::Equal));

        // First pass: distinct operator and region
        let mut rest: Vec<RelayDescriptor> = Vec::new();
        for candidate in candidates {
            if circuit.len() >= n {
                break;
            }
            let distinct = circuit.iter().all(|c| {
                c.operator != candidate.operator && c.region != candidate.region
            });
            if distinct {
                circuit.push(candidate);
            } else {
                rest.push(candidate);
            }
        }

        // Fill remaining slots from the best of what's left
        for candidate in rest {
            if circuit.len() >= n {
                break;
            }
            circuit.push(candidate);
        }

        circuit.truncate(n);
        circuit
    }

    // ── Guards ──────────────────────────────────────────────────────────

    fn guard_eligible(&self, descriptor: &RelayDescriptor) -> bool {
        self.usable(descriptor)
            && descriptor.uptime_seconds >= GUARD_MIN_UPTIME.as_secs()
            && descriptor.reliability >= GUARD_MIN_RELIABILITY
    }

    /// Top the guard set up to three entries and rotate expired ones.
    /// Returns the current guard addresses.
    pub fn ensure_guards(&self) -> Vec<Address> {
        let mut guards = self.guards.write();

        // Rotate out old guards and ones we no longer know
        let relays = self.relays.read();
        guards.retain(|g| {
            g.selected_at.elapsed() < GUARD_ROTATION && relays.contains_key(&g.address)
        });

        if guards.len() < GUARD_COUNT {
            let mut candidates: Vec<&RelayDescriptor> = relays
                .values()
                .filter(|d| self.guard_eligible(d))
                .filter(|d| !guards.iter().any(|g| g.address == d.address))
                .collect();
            candidates.sort_by(|a, b| {
                self.score(b)
                    .partial_cmp(&self.score(a))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for candidate in candidates.into_iter().take(GUARD_COUNT - guards.len()) {
                info!(guard = %candidate.address, "guard selected");
                guards.push(GuardEntry {
                    address: candidate.address,
                    selected_at: Instant::now(),
                });
            }
        }

        guards.iter().map(|g| g.address).collect()
    }

    /// A healthy guard to lead the next circuit
    fn current_guard(&self) -> Option<RelayDescriptor> {
        let addresses = self.ensure_guards();
        let relays = self.relays.read();
        addresses
            .iter()
            .filter_map(|a| relays.get(a))
            .find(|d| self.usable(d))
            .cloned()
    }

    /// Drop a guard whose recorded failures crossed the persistent-failure
    /// bar; `ensure_guards` selects its replacement.
    fn maybe_demote_guard(&self, address: &Address) {
        let failures = self.health_of(address).failure_count;
        if failures <= GUARD_MAX_FAILURES {
            return;
        }
        let mut guards = self.guards.write();
        let before = guards.len();
        guards.retain(|g| g.address != *address);
        if guards.len() != before {
            info!(guard = %address, failures, "guard removed after persistent failures");
        }
    }

    /// Current guard addresses without forcing selection (test hook)
    pub fn guard_addresses(&self) -> Vec<Address> {
        self.guards.read().iter().map(|g| g.address).collect()
    }
}

impl Default for RelayDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zentalk_core::unix_now;

    fn descriptor(addr_byte: u8, operator: &str, region: &str) -> RelayDescriptor {
        RelayDescriptor {
            address: Address([addr_byte; 20]),
            endpoint: format!("relay{addr_byte}.example.net:9470"),
            public_key: String::new(),
            region: region.to_string(),
            operator: operator.to_string(),
            version: "0.1.0".to_string(),
            max_connections: 512,
            uptime_seconds: 10 * 24 * 60 * 60,
            last_seen: unix_now(),
            latency_ms: 50,
            packet_loss: 0.01,
            reliability: 0.95,
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let dir = RelayDirectory::new();
        dir.upsert(descriptor(1, "op-a", "eu"));
        assert_eq!(dir.len(), 1);
        assert!(dir.get(&Address([1u8; 20])).is_some());
    }

    #[test]
    fn test_healthy_predicate() {
        let good = descriptor(1, "op", "eu");
        assert!(RelayDirectory::is_healthy(&good));

        let mut stale = descriptor(2, "op", "eu");
        stale.last_seen = unix_now() - 2 * 60 * 60;
        assert!(!RelayDirectory::is_healthy(&stale));

        let mut unreliable = descriptor(3, "op", "eu");
        unreliable.reliability = 0.4;
        assert!(!RelayDirectory::is_healthy(&unreliable));

        let mut lossy = descriptor(4, "op", "eu");
        lossy.packet_loss = 0.5;
        assert!(!RelayDirectory::is_healthy(&lossy));
    }

    #[test]
    fn test_blacklist_after_consecutive_failures() {
        let dir = RelayDirectory::new();
        let addr = Address([1u8; 20]);
        dir.upsert(descriptor(1, "op", "eu"));

        dir.record_failure(&addr);
        dir.record_failure(&addr);
        assert!(!dir.is_blacklisted(&addr));
        dir.record_failure(&addr);
        assert!(dir.is_blacklisted(&addr));

        // Blacklisted relays are not discoverable
        assert!(dir.discover(10).is_empty());
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let dir = RelayDirectory::new();
        let addr = Address([1u8; 20]);
        dir.record_failure(&addr);
        dir.record_failure(&addr);
        dir.record_success(&addr, 40);
        dir.record_failure(&addr);
        dir.record_failure(&addr);
        assert!(!dir.is_blacklisted(&addr));
        assert_eq!(dir.health_of(&addr).failure_count, 4);
    }

    #[test]
    fn test_latency_ewma() {
        let dir = RelayDirectory::new();
        let addr = Address([1u8; 20]);
        dir.record_success(&addr, 100);
        assert_eq!(dir.health_of(&addr).latency_ewma_ms, 100.0);
        dir.record_success(&addr, 200);
        // 0.9 * 100 + 0.1 * 200
        assert!((dir.health_of(&addr).latency_ewma_ms - 110.0).abs() < 1e-9);
    }

    #[test]
    fn test_discover_returns_random_healthy_subset() {
        let dir = RelayDirectory::new();
        for i in 1..=10 {
            dir.upsert(descriptor(i, "op", "eu"));
        }
        let picked = dir.discover(4);
        assert_eq!(picked.len(), 4);
        for d in &picked {
            assert!(RelayDirectory::is_healthy(d));
        }
    }

    #[test]
    fn test_circuit_prefers_distinct_operators_and_regions() {
        let dir = RelayDirectory::new();
        dir.upsert(descriptor(1, "op-a", "eu"));
        dir.upsert(descriptor(2, "op-a", "eu"));
        dir.upsert(descriptor(3, "op-b", "us"));
        dir.upsert(descriptor(4, "op-c", "ap"));

        let circuit = dir.select_optimal_circuit(3);
        assert_eq!(circuit.len(), 3);

        let operators: Vec<&str> = circuit.iter().map(|d| d.operator.as_str()).collect();
        let mut unique = operators.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(operators.len(), unique.len());
    }

    #[test]
    fn test_circuit_fills_when_diversity_impossible() {
        let dir = RelayDirectory::new();
        dir.upsert(descriptor(1, "op-a", "eu"));
        dir.upsert(descriptor(2, "op-a", "eu"));
        dir.upsert(descriptor(3, "op-a", "eu"));

        let circuit = dir.select_optimal_circuit(3);
        assert_eq!(circuit.len(), 3);
    }

    #[test]
    fn test_guard_is_first_hop() {
        let dir = RelayDirectory::new();
        for i in 1..=5 {
            dir.upsert(descriptor(i, &format!("op-{i}"), "eu"));
        }

        let guards = dir.ensure_guards();
        assert_eq!(guards.len(), 3);

        let circuit = dir.select_optimal_circuit(3);
        assert!(guards.contains(&circuit[0].address));
    }

    #[test]
    fn test_short_uptime_relay_not_guard_eligible() {
        let dir = RelayDirectory::new();
        let mut young = descriptor(1, "op-a", "eu");
        young.uptime_seconds = 60 * 60; // one hour
        dir.upsert(young);
        dir.upsert(descriptor(2, "op-b", "us"));

        let guards = dir.ensure_guards();
        assert_eq!(guards, vec![Address([2u8; 20])]);
    }

    #[test]
    fn test_guard_demoted_after_persistent_failures() {
        let dir = RelayDirectory::new();
        dir.upsert(descriptor(1, "op-a", "eu"));
        let guards = dir.ensure_guards();
        assert_eq!(guards.len(), 1);
        let guard = guards[0];

        for _ in 0..=GUARD_MAX_FAILURES {
            dir.record_failure(&guard);
        }
        assert!(dir.guard_addresses().is_empty());
    }
}
