//! Relay service: connection acceptance, handshake, and forward routing.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zentalk_core::config::{
    DIAL_TIMEOUT, OFFLINE_DRAIN_PACING, OFFLINE_QUEUE_TTL, OFFLINE_SWEEP_INTERVAL,
};
use zentalk_core::{unix_now, Address, ClientType, RelayDescriptor};
use zentalk_crypto::{RsaKeypair, SigningKeypair};
use zentalk_dht::DhtNode;
use zentalk_onion::peel;
use zentalk_wire::{
    read_frame, write_frame, Frame, FrameFlags, Handshake, HandshakeAck, MessageType,
    RelayError as RelayErrorPayload, VERSION,
};

use crate::{MemoryQueue, OfflineQueue, PeerRegistry, QueuedMessage, RegisteredPeer, RelayError, Result};

/// Error codes carried in RelayError payloads
pub const ERR_PEEL_FAILED: u8 = 1;
pub const ERR_QUEUE_FULL: u8 = 2;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    pub region: String,
    pub operator: String,
    pub max_connections: u32,
    pub queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9470".parse().unwrap(),
            region: "unknown".to_string(),
            operator: "unknown".to_string(),
            max_connections: 512,
            queue_capacity: 4096,
        }
    }
}

pub(crate) struct RelayInner {
    pub(crate) config: RelayConfig,
    pub(crate) signing: SigningKeypair,
    pub(crate) rsa: RsaKeypair,
    pub(crate) address: Address,
    pub(crate) peers: PeerRegistry,
    pub(crate) queue: Box<dyn OfflineQueue>,
    pub(crate) dht: Option<DhtNode>,
    pub(crate) started_at: Instant,
    pub(crate) bound_addr: RwLock<Option<SocketAddr>>,
}

/// A relay node. Clones share all state.
#[derive(Clone)]
pub struct RelayNode {
    pub(crate) inner: Arc<RelayInner>,
}

impl RelayNode {
    /// Create a relay from its long-term identity. Pass a DHT node to enable
    /// descriptor publication and mesh discovery.
    pub fn new(
        config: RelayConfig,
        signing: SigningKeypair,
        rsa: RsaKeypair,
        dht: Option<DhtNode>,
    ) -> Self {
        let address = Address::from_identity_key(&signing.public_key_bytes());
        let queue: Box<dyn OfflineQueue> = Box::new(MemoryQueue::new(config.queue_capacity));
        Self {
            inner: Arc::new(RelayInner {
                config,
                signing,
                rsa,
                address,
                peers: PeerRegistry::new(),
                queue,
                dht,
                started_at: Instant::now(),
                bound_addr: RwLock::new(None),
            }),
        }
    }

    pub fn address(&self) -> Address {
        self.inner.address
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.inner.peers
    }

    pub fn queue(&self) -> &dyn OfflineQueue {
        self.inner.queue.as_ref()
    }

    /// Endpoint peers can reach us on once `serve` has bound
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        *self.inner.bound_addr.read().unwrap()
    }

    /// Our RSA public key, PEM encoded
    pub fn public_key_pem(&self) -> Result<String> {
        self.inner
            .rsa
            .public_key_pem()
            .map_err(|e| RelayError::Crypto(e.to_string()))
    }

    /// Self-describing descriptor for DHT publication
    pub fn descriptor(&self) -> Result<RelayDescriptor> {
        let endpoint = self
            .bound_addr()
            .unwrap_or(self.inner.config.listen_addr)
            .to_string();
        Ok(RelayDescriptor {
            address: self.inner.address,
            endpoint,
            public_key: self.public_key_pem()?,
            region: self.inner.config.region.clone(),
            operator: self.inner.config.operator.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            max_connections: self.inner.config.max_connections,
            uptime_seconds: self.inner.started_at.elapsed().as_secs(),
            last_seen: unix_now(),
            latency_ms: 0,
            packet_loss: 0.0,
            reliability: 1.0,
        })
    }

    /// Bind the listener and spawn the accept loop and queue sweeper.
    /// Returns the bound address.
    pub async fn serve(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(self.inner.config.listen_addr).await?;
        let bound = listener.local_addr()?;
        *self.inner.bound_addr.write().unwrap() = Some(bound);
        info!(%bound, address = %self.inner.address, "relay listening");

        let node = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted connection");
                        let node = node.clone();
                        tokio::spawn(async move {
                            node.handle_connection(stream).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        });

        let node = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(OFFLINE_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let dropped = node.inner.queue.sweep_expired();
                if dropped > 0 {
                    debug!(dropped, "offline queue sweep");
                }
            }
        });

        Ok(bound)
    }

    async fn handle_connection(&self, stream: tokio::net::TcpStream) {
        let _ = stream.set_nodelay(true);
        let (mut rd, mut wr) = stream.into_split();

        // Handshake must arrive promptly
        let frame = match tokio::time::timeout(DIAL_TIMEOUT, read_frame(&mut rd)).await {
            Ok(Ok(frame)) => frame,
            _ => return,
        };
        let handshake = match self.accept_handshake(&frame, &mut wr).await {
            Ok(hs) => hs,
            Err(e) => {
                debug!(error = %e, "handshake rejected");
                return;
            }
        };

        let (tx, rx) = mpsc::channel::<Frame>(64);
        self.inner.peers.register(RegisteredPeer {
            address: handshake.address,
            client_type: handshake.client_type,
            outbox: tx,
        });
        info!(peer = %handshake.address, kind = ?handshake.client_type, "peer registered");

        // Reconnected subscribers get their parked messages first, in FIFO
        // order, each deleted only after its write succeeded.
        if handshake.client_type == ClientType::User {
            self.drain_offline(&handshake.address, &mut wr).await;
        }

        self.peer_loop(&handshake.address, rd, wr, rx).await;

        self.inner.peers.remove(&handshake.address);
        info!(peer = %handshake.address, "peer removed");
    }

    async fn accept_handshake(
        &self,
        frame: &Frame,
        wr: &mut OwnedWriteHalf,
    ) -> Result<Handshake> {
        if frame.header.msg_type != MessageType::Handshake {
            return Err(RelayError::Handshake(format!(
                "expected handshake, got {:?}",
                frame.header.msg_type
            )));
        }
        let handshake = Handshake::decode(&frame.payload)?;
        if handshake.version != VERSION {
            return Err(RelayError::Handshake(format!(
                "unsupported version 0x{:04X}",
                handshake.version
            )));
        }
        if handshake.address.is_zero() {
            return Err(RelayError::Handshake("zero address".to_string()));
        }

        let ack = HandshakeAck {
            address: self.inner.address,
            public_key: self.public_key_pem()?.into_bytes(),
            timestamp: unix_now(),
        };
        write_frame(
            wr,
            &Frame::new(MessageType::HandshakeAck, FrameFlags::empty(), ack.encode()),
        )
        .await?;
        Ok(handshake)
    }

    async fn drain_offline(&self, recipient: &Address, wr: &mut OwnedWriteHalf) {
        let pending = self.inner.queue.pending_for(recipient);
        if pending.is_empty() {
            return;
        }
        info!(peer = %recipient, count = pending.len(), "draining offline queue");

        for message in pending {
            let frame = Frame::with_id(
                MessageType::RelayForward,
                FrameFlags::empty(),
                message.message_id,
                message.payload.clone(),
            );
            match write_frame(wr, &frame).await {
                Ok(()) => {
                    self.inner.queue.remove(recipient, &message.message_id);
                }
                Err(e) => {
                    warn!(peer = %recipient, error = %e, "offline drain interrupted");
                    self.inner.queue.record_attempt(recipient, &message.message_id);
                    return;
                }
            }
            tokio::time::sleep(OFFLINE_DRAIN_PACING).await;
        }
    }

    /// Shared frame loop for inbound and outbound peers. Runs until the
    /// peer disconnects or a write fails.
    ///
    /// Reads happen on their own task so a racing write can never cancel a
    /// partially read frame and desync the stream.
    pub(crate) async fn peer_loop(
        &self,
        peer: &Address,
        mut rd: OwnedReadHalf,
        mut wr: OwnedWriteHalf,
        mut rx: mpsc::Receiver<Frame>,
    ) {
        let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(64);
        let reader = tokio::spawn(async move {
            loop {
                match read_frame(&mut rd).await {
                    Ok(frame) => {
                        if frame_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        loop {
            tokio::select! {
                incoming = frame_rx.recv() => {
                    let Some(frame) = incoming else { break };
                    if !self.handle_frame(peer, frame, &mut wr).await {
                        break;
                    }
                }
                outgoing = rx.recv() => {
                    match outgoing {
                        Some(frame) => {
                            if write_frame(&mut wr, &frame).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        reader.abort();
    }

    /// Returns false when the connection should close.
    async fn handle_frame(&self, peer: &Address, frame: Frame, wr: &mut OwnedWriteHalf) -> bool {
        match frame.header.msg_type {
            MessageType::Ping => {
                let pong = Frame::with_id(
                    MessageType::Pong,
                    FrameFlags::empty(),
                    frame.header.message_id,
                    vec![],
                );
                write_frame(wr, &pong).await.is_ok()
            }
            MessageType::Disconnect => false,
            MessageType::RelayForward => {
                if let Err((code, reason)) = self.route_forward(&frame).await {
                    debug!(peer = %peer, code, reason, "forward failed");
                    let err = RelayErrorPayload {
                        message_id: frame.header.message_id,
                        error_code: code,
                        error_message: reason,
                    };
                    let err_frame =
                        Frame::new(MessageType::RelayError, FrameFlags::empty(), err.encode());
                    return write_frame(wr, &err_frame).await.is_ok();
                }
                true
            }
            other => {
                debug!(peer = %peer, msg_type = ?other, "ignoring unexpected frame");
                true
            }
        }
    }

    /// Peel one onion layer and route the inner payload.
    async fn route_forward(&self, frame: &Frame) -> std::result::Result<(), (u8, String)> {
        let peeled = peel(&self.inner.rsa, &frame.payload)
            .map_err(|e| (ERR_PEEL_FAILED, e.to_string()))?;

        if let Some(peer) = self.inner.peers.get(&peeled.next_hop) {
            let forward = Frame::new(
                MessageType::RelayForward,
                FrameFlags::empty(),
                peeled.payload.clone(),
            );
            if peer.outbox.send(forward).await.is_ok() {
                return Ok(());
            }
            // Writer task died between lookup and send; fall through to the
            // offline path.
        }

        let queued = QueuedMessage::new(peeled.next_hop, peeled.payload, OFFLINE_QUEUE_TTL);
        self.inner
            .queue
            .enqueue(queued)
            .map_err(|_| (ERR_QUEUE_FULL, "offline queue full".to_string()))?;
        debug!(recipient = %peeled.next_hop, "queued for offline delivery");
        Ok(())
    }
}
