//! Connected-peer registry.
//!
//! A peer moves Unregistered → Registered{User|Relay} on a successful
//! handshake and is removed on disconnect. Forwarding is only permitted to
//! registered peers. Writers touch the map only on handshake and disconnect.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;
use zentalk_core::{Address, ClientType};
use zentalk_wire::Frame;

/// Lifecycle of a relay connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Unregistered,
    Registered(ClientType),
}

/// A registered peer: identity plus the channel into its writer task
#[derive(Clone)]
pub struct RegisteredPeer {
    pub address: Address,
    pub client_type: ClientType,
    pub outbox: mpsc::Sender<Frame>,
}

/// Registry of peers currently connected to this relay, keyed by address
pub struct PeerRegistry {
    peers: RwLock<HashMap<Address, RegisteredPeer>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Register after a completed handshake. Replaces any previous
    /// connection from the same address.
    pub fn register(&self, peer: RegisteredPeer) {
        self.peers.write().unwrap().insert(peer.address, peer);
    }

    pub fn remove(&self, address: &Address) -> bool {
        self.peers.write().unwrap().remove(address).is_some()
    }

    pub fn get(&self, address: &Address) -> Option<RegisteredPeer> {
        self.peers.read().unwrap().get(address).cloned()
    }

    pub fn is_connected(&self, address: &Address) -> bool {
        self.peers.read().unwrap().contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Addresses of connected relay peers (the mesh)
    pub fn relay_peers(&self) -> Vec<Address> {
        self.peers
            .read()
            .unwrap()
            .values()
            .filter(|p| p.client_type == ClientType::Relay)
            .map(|p| p.address)
            .collect()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
