//! Inter-relay mesh maintenance.
//!
//! The relay periodically republishes its signed descriptor to the DHT under
//! `SHA-256(address)` with a 24-hour TTL, refreshes descriptors of known peer
//! relays, and keeps outbound connections up to the target fan-out.

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zentalk_core::config::{DHT_ENTRY_TTL, DIAL_TIMEOUT, MESH_MAINTENANCE_INTERVAL, MESH_TARGET_PEERS};
use zentalk_core::{unix_now, Address, ClientType, RelayDescriptor};
use zentalk_wire::{
    read_frame, write_frame, Frame, FrameFlags, Handshake, HandshakeAck, MessageType, VERSION,
};

use crate::{RelayError, RelayNode, RegisteredPeer, Result};

impl RelayNode {
    /// Publish our signed descriptor to the DHT.
    pub async fn publish_descriptor(&self) -> Result<()> {
        let Some(dht) = self.inner.dht.as_ref() else {
            return Ok(());
        };
        let descriptor = self.descriptor()?;
        let value = descriptor
            .to_json()
            .map_err(|e| RelayError::Crypto(e.to_string()))?;
        let acks = dht
            .store(descriptor.dht_key(), value, DHT_ENTRY_TTL)
            .await?;
        debug!(replicas = acks, "descriptor published");
        Ok(())
    }

    /// Fetch a peer relay's descriptor from the DHT.
    pub async fn fetch_descriptor(&self, address: Address) -> Result<RelayDescriptor> {
        let dht = self
            .inner
            .dht
            .as_ref()
            .ok_or_else(|| RelayError::Crypto("no dht configured".to_string()))?;
        let value = dht.lookup(address.dht_key()).await?;
        RelayDescriptor::from_json(&value).map_err(|e| RelayError::Crypto(e.to_string()))
    }

    /// Dial a peer relay and run its connection until it drops.
    ///
    /// The outbound side sends the handshake and expects the ack; after that
    /// the connection behaves exactly like an inbound relay peer.
    pub async fn connect_relay(&self, endpoint: &str) -> Result<Address> {
        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(endpoint))
            .await
            .map_err(|_| RelayError::Handshake("dial timeout".to_string()))??;
        let _ = stream.set_nodelay(true);
        let (mut rd, mut wr) = stream.into_split();

        let pem = self.public_key_pem()?.into_bytes();
        let handshake = Handshake {
            version: VERSION,
            address: self.inner.address,
            public_key: pem,
            client_type: ClientType::Relay,
            timestamp: unix_now(),
            signature: self
                .inner
                .signing
                .sign(self.inner.address.as_bytes())
                .to_vec(),
        };
        write_frame(
            &mut wr,
            &Frame::new(MessageType::Handshake, FrameFlags::empty(), handshake.encode()),
        )
        .await?;

        let frame = tokio::time::timeout(DIAL_TIMEOUT, read_frame(&mut rd))
            .await
            .map_err(|_| RelayError::Handshake("ack timeout".to_string()))??;
        if frame.header.msg_type != MessageType::HandshakeAck {
            return Err(RelayError::Handshake("expected handshake ack".to_string()));
        }
        let ack = HandshakeAck::decode(&frame.payload)?;

        let (tx, rx) = mpsc::channel::<Frame>(64);
        self.inner.peers.register(RegisteredPeer {
            address: ack.address,
            client_type: ClientType::Relay,
            outbox: tx,
        });
        info!(peer = %ack.address, %endpoint, "relay mesh peer connected");

        let node = self.clone();
        let peer_address = ack.address;
        tokio::spawn(async move {
            node.peer_loop(&peer_address, rd, wr, rx).await;
            node.inner.peers.remove(&peer_address);
            info!(peer = %peer_address, "relay mesh peer disconnected");
        });

        Ok(ack.address)
    }

    /// Spawn the periodic mesh maintenance task.
    ///
    /// `known_relays` are (address, endpoint) pairs to keep connections to;
    /// endpoints are refreshed from the DHT when descriptors resolve.
    pub fn start_mesh(&self, known_relays: Vec<(Address, String)>) {
        let node = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MESH_MAINTENANCE_INTERVAL);
            loop {
                ticker.tick().await;
                node.mesh_round(&known_relays).await;
            }
        });
    }

    async fn mesh_round(&self, known_relays: &[(Address, String)]) {
        if let Err(e) = self.publish_descriptor().await {
            warn!(error = %e, "descriptor publication failed");
        }

        for (address, endpoint) in known_relays {
            if self.inner.peers.relay_peers().len() >= MESH_TARGET_PEERS {
                break;
            }
            if *address == self.inner.address || self.inner.peers.is_connected(address) {
                continue;
            }

            // Prefer the freshest endpoint the DHT knows about
            let endpoint = match self.fetch_descriptor(*address).await {
                Ok(descriptor) => descriptor.endpoint,
                Err(_) => endpoint.clone(),
            };

            if let Err(e) = self.connect_relay(&endpoint).await {
                debug!(peer = %address, error = %e, "mesh dial failed");
            }
        }
    }
}
