use serde::{Deserialize, Serialize};

use crate::{unix_now, Address, NodeId};

/// Self-published description of a relay node, stored in the DHT under
/// `SHA-256(address)` as a signed entry with a 24-hour TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayDescriptor {
    pub address: Address,
    /// host:port the relay accepts peer connections on
    pub endpoint: String,
    /// RSA public key, PEM encoded
    pub public_key: String,
    pub region: String,
    pub operator: String,
    pub version: String,
    pub max_connections: u32,
    pub uptime_seconds: u64,
    /// Unix seconds when the descriptor was produced
    pub last_seen: u64,
    pub latency_ms: u32,
    /// Observed packet loss in [0, 1]
    pub packet_loss: f64,
    /// Observed reliability in [0, 1]
    pub reliability: f64,
}

impl RelayDescriptor {
    /// DHT key the descriptor is published under
    pub fn dht_key(&self) -> NodeId {
        self.address.dht_key()
    }

    /// Age of the descriptor in seconds
    pub fn age_secs(&self) -> u64 {
        unix_now().saturating_sub(self.last_seen)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> RelayDescriptor {
        RelayDescriptor {
            address: Address([9u8; 20]),
            endpoint: "relay.example.net:9470".to_string(),
            public_key: "-----BEGIN PUBLIC KEY-----\n...\n-----END PUBLIC KEY-----\n".to_string(),
            region: "eu".to_string(),
            operator: "op-one".to_string(),
            version: "0.1.0".to_string(),
            max_connections: 512,
            uptime_seconds: 86_400,
            last_seen: unix_now(),
            latency_ms: 40,
            packet_loss: 0.01,
            reliability: 0.99,
        }
    }

    #[test]
    fn test_descriptor_json_roundtrip() {
        let d = descriptor();
        let bytes = d.to_json().unwrap();
        let restored = RelayDescriptor::from_json(&bytes).unwrap();
        assert_eq!(d, restored);
    }

    #[test]
    fn test_dht_key_matches_address_hash() {
        let d = descriptor();
        assert_eq!(d.dht_key(), d.address.dht_key());
    }

    #[test]
    fn test_fresh_descriptor_has_small_age() {
        assert!(descriptor().age_secs() < 5);
    }
}
