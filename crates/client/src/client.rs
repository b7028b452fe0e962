//! The client: ties sessions, circuits, the DHT, and the relay connection
//! into a send/receive pipeline with ordered delivery and acknowledgements.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zentalk_core::config::DHT_ENTRY_TTL;
use zentalk_core::{
    unix_now, unix_now_ms, Address, ContentType, MessageId, RelayDescriptor,
};
use zentalk_crypto::{
    public_key_from_pem, sign_payload, verify_payload, IdentityKeyPair, InitialMessage,
    KeyBundle, PreKeyStore, RsaKeypair,
};
use zentalk_dht::DhtNode;
use zentalk_onion::{build, OnionHop};
use zentalk_wire::{
    Ack, DirectMessage, Frame, FrameFlags, GroupMessage, MessageType, ReadReceipt,
    RelayError as RelayErrorPayload, TypingIndicator,
};

use crate::{
    Circuit, ClientError, PeerSequencer, RelayConnection, RelayDirectory, Result,
    SequenceOutcome, SessionManager, SessionStore,
};

/// Default number of onion hops in a circuit
pub const DEFAULT_CIRCUIT_HOPS: usize = 3;

/// Something the network delivered to the application
#[derive(Debug)]
pub enum ClientEvent {
    /// In-order, deduplicated direct message
    Message(DirectMessage),
    Group(GroupMessage),
    Typing(TypingIndicator),
    Receipt(ReadReceipt),
    Ack(Ack),
    /// A relay reported it could not route one of our forwards
    RelayError(RelayErrorPayload),
}

struct ClientInner {
    sessions: SessionManager,
    rsa: RsaKeypair,
    dht: DhtNode,
    directory: RelayDirectory,
    bundles: Mutex<HashMap<Address, KeyBundle>>,
    sequencers: Mutex<HashMap<Address, PeerSequencer>>,
    connection: RwLock<Option<RelayConnection>>,
    entry_relay: RwLock<Option<Address>>,
    circuit: Mutex<Circuit>,
    events: mpsc::Sender<ClientEvent>,
    circuit_hops: usize,
}

/// A ZenTalk client. Clones share all state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Build a client from its identity material. Returns the client and
    /// the stream of delivered events.
    pub fn new(
        identity: IdentityKeyPair,
        prekeys: PreKeyStore,
        rsa: RsaKeypair,
        dht: DhtNode,
        store: Arc<dyn SessionStore>,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let client = Self {
            inner: Arc::new(ClientInner {
                sessions: SessionManager::new(identity, prekeys, store),
                rsa,
                dht,
                directory: RelayDirectory::new(),
                bundles: Mutex::new(HashMap::new()),
                sequencers: Mutex::new(HashMap::new()),
                connection: RwLock::new(None),
                entry_relay: RwLock::new(None),
                circuit: Mutex::new(Circuit::new()),
                events: events_tx,
                circuit_hops: DEFAULT_CIRCUIT_HOPS,
            }),
        };
        (client, events_rx)
    }

    pub fn address(&self) -> Address {
        self.inner.sessions.address()
    }

    pub fn directory(&self) -> &RelayDirectory {
        &self.inner.directory
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    /// Publish our key bundle to the DHT under `SHA-256(address)`.
    pub async fn publish_bundle(&self) -> Result<()> {
        let bundle = self.inner.sessions.bundle();
        let value = bundle
            .to_json()
            .map_err(|e| ClientError::Crypto(e.to_string()))?;
        self.inner
            .dht
            .store(self.address().dht_key(), value, DHT_ENTRY_TTL)
            .await?;
        debug!("key bundle published");
        Ok(())
    }

    /// Resolve a peer's key bundle from cache or the DHT.
    pub async fn fetch_bundle(&self, peer: Address) -> Result<KeyBundle> {
        if let Some(bundle) = self.inner.bundles.lock().unwrap().get(&peer) {
            return Ok(bundle.clone());
        }
        let value = self
            .inner
            .dht
            .lookup(peer.dht_key())
            .await
            .map_err(|_| ClientError::NoBundle(peer))?;
        let bundle =
            KeyBundle::from_json(&value).map_err(|_| ClientError::NoBundle(peer))?;
        bundle
            .verify()
            .map_err(|e| ClientError::Crypto(e.to_string()))?;
        if bundle.address != peer {
            return Err(ClientError::NoBundle(peer));
        }
        self.inner.bundles.lock().unwrap().insert(peer, bundle.clone());
        Ok(bundle)
    }

    /// Refresh relay descriptors from the DHT into the directory.
    pub async fn refresh_relays(&self, relays: &[Address]) {
        for address in relays {
            match self.inner.dht.lookup(address.dht_key()).await {
                Ok(value) => match RelayDescriptor::from_json(&value) {
                    Ok(descriptor) => self.inner.directory.upsert(descriptor),
                    Err(e) => debug!(relay = %address, error = %e, "bad descriptor"),
                },
                Err(e) => debug!(relay = %address, error = %e, "descriptor lookup failed"),
            }
        }
    }

    /// Connect to an entry relay and start the receive pump.
    pub async fn connect(&self, entry: &RelayDescriptor) -> Result<()> {
        self.inner.directory.upsert(entry.clone());

        let pem = self
            .inner
            .rsa
            .public_key_pem()
            .map_err(|e| ClientError::Crypto(e.to_string()))?;
        let signature = self
            .inner
            .sessions
            .identity()
            .signing
            .sign(self.address().as_bytes())
            .to_vec();

        let (connection, mut inbound) =
            RelayConnection::open(entry.endpoint.clone(), self.address(), pem, signature).await?;

        *self.inner.connection.write().unwrap() = Some(connection);
        *self.inner.entry_relay.write().unwrap() = Some(entry.address);
        self.inner.directory.record_success(&entry.address, entry.latency_ms);
        info!(relay = %entry.address, endpoint = %entry.endpoint, "connected to entry relay");

        let client = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                client.handle_frame(frame).await;
            }
        });
        Ok(())
    }

    /// Administratively close the relay connection.
    pub fn disconnect(&self) {
        if let Some(conn) = self.inner.connection.read().unwrap().as_ref() {
            conn.close();
        }
    }

    // ── Send path ───────────────────────────────────────────────────────

    /// Send a direct message. Establishes a session via X3DH (using a cached
    /// or DHT-discovered bundle) on first contact. Returns the sequence
    /// number allocated to the message.
    pub async fn send_message(
        &self,
        to: Address,
        content_type: ContentType,
        content: &[u8],
    ) -> Result<u64> {
        let sequence = {
            let mut sequencers = self.inner.sequencers.lock().unwrap();
            sequencers.entry(to).or_default().allocate_send()
        };

        let mut message = DirectMessage {
            from: self.address(),
            to,
            timestamp_ms: unix_now_ms(),
            sequence,
            content_type,
            reply_to: MessageId::ZERO,
            content: content.to_vec(),
            signature: vec![],
        };
        message.signature = sign_payload(
            &self.inner.sessions.identity().signing,
            &message.signable_data(),
        );
        let plaintext = message.encode();

        let payload = if self.inner.sessions.has_session(&to) {
            self.inner.sessions.encrypt(&to, &plaintext)?
        } else {
            let bundle = self.fetch_bundle(to).await?;
            self.inner.sessions.initiate_session(&to, &bundle, &plaintext)?
        };

        self.send_via_circuit(to, payload).await?;
        Ok(sequence)
    }

    /// Fan a group message out as per-recipient ciphertexts. Recipients
    /// without a session get one established from their bundle. Returns how
    /// many recipients the message was handed off for; individual failures
    /// are logged and skipped.
    pub async fn send_group_message(
        &self,
        group_id: [u8; 32],
        recipients: &[Address],
        content_type: ContentType,
        content: &[u8],
    ) -> Result<usize> {
        let mut message = GroupMessage {
            from: self.address(),
            group_id,
            timestamp_ms: unix_now_ms(),
            content_type,
            content: content.to_vec(),
            signature: vec![],
        };
        message.signature = sign_payload(
            &self.inner.sessions.identity().signing,
            &message.signable_data(),
        );
        let plaintext = message.encode();

        let mut delivered = 0;
        for &to in recipients {
            if to == self.address() {
                continue;
            }
            let result = async {
                let payload = if self.inner.sessions.has_session(&to) {
                    self.inner.sessions.encrypt(&to, &plaintext)?
                } else {
                    let bundle = self.fetch_bundle(to).await?;
                    self.inner.sessions.initiate_session(&to, &bundle, &plaintext)?
                };
                self.send_via_circuit(to, payload).await
            }
            .await;

            match result {
                Ok(()) => delivered += 1,
                Err(e) => warn!(recipient = %to, error = %e, "group fan-out failed"),
            }
        }
        Ok(delivered)
    }

    /// Send a typing indicator (unsequenced, fire-and-forget).
    pub async fn send_typing(&self, to: Address, is_typing: bool) -> Result<()> {
        let indicator = TypingIndicator {
            from: self.address(),
            to,
            timestamp: unix_now(),
            is_typing,
        };
        let payload = self.inner.sessions.encrypt(&to, &indicator.encode())?;
        self.send_via_circuit(to, payload).await
    }

    /// Send a read receipt for a delivered message.
    pub async fn send_read_receipt(
        &self,
        to: Address,
        message_id: MessageId,
        status: zentalk_wire::ReceiptStatus,
    ) -> Result<()> {
        let receipt = ReadReceipt {
            from: self.address(),
            to,
            message_id,
            timestamp: unix_now(),
            status,
        };
        let payload = self.inner.sessions.encrypt(&to, &receipt.encode())?;
        self.send_via_circuit(to, payload).await
    }

    /// Onion-wrap a payload across the current circuit and hand it to the
    /// entry relay.
    async fn send_via_circuit(&self, to: Address, payload: Vec<u8>) -> Result<()> {
        let hops = self.build_circuit()?;
        let onion = build(&hops, to, payload)?;

        let frame = Frame::new(MessageType::RelayForward, FrameFlags::empty(), onion);
        let connection = self.inner.connection.read().unwrap().clone();
        match connection {
            Some(conn) => {
                conn.send(frame).await?;
                self.inner.circuit.lock().unwrap().activate();
                Ok(())
            }
            None => Err(ClientError::NotConnected),
        }
    }

    /// Hop list for the next send: reuse the tracked circuit while it is
    /// usable, otherwise select a fresh one.
    fn build_circuit(&self) -> Result<Vec<OnionHop>> {
        let mut tracked = self.inner.circuit.lock().unwrap();

        let descriptors = if tracked.is_usable() {
            let resolved: Option<Vec<RelayDescriptor>> = tracked
                .hops()
                .iter()
                .map(|a| self.inner.directory.get(a))
                .collect();
            match resolved {
                Some(descriptors) => descriptors,
                None => {
                    tracked.fail();
                    self.select_descriptors()?
                }
            }
        } else {
            self.select_descriptors()?
        };

        if !tracked.is_usable() {
            let mut fresh =
                Circuit::discovered(descriptors.iter().map(|d| d.address).collect());
            fresh.select();
            *tracked = fresh;
        }

        descriptors
            .into_iter()
            .map(|d| {
                Ok(OnionHop {
                    address: d.address,
                    public_key: public_key_from_pem(&d.public_key)
                        .map_err(|e| ClientError::Crypto(e.to_string()))?,
                })
            })
            .collect()
    }

    /// The connected entry relay first, then the best-scoring diverse
    /// relays from the directory.
    fn select_descriptors(&self) -> Result<Vec<RelayDescriptor>> {
        let entry_address = self
            .inner
            .entry_relay
            .read()
            .unwrap()
            .ok_or(ClientError::NotConnected)?;
        let entry = self
            .inner
            .directory
            .get(&entry_address)
            .ok_or(ClientError::Exhausted)?;

        let mut descriptors = vec![entry];
        for descriptor in self.inner.directory.select_optimal_circuit(self.inner.circuit_hops) {
            if descriptors.len() >= self.inner.circuit_hops {
                break;
            }
            if descriptors.iter().all(|d| d.address != descriptor.address) {
                descriptors.push(descriptor);
            }
        }
        Ok(descriptors)
    }

    // ── Receive path ────────────────────────────────────────────────────

    async fn handle_frame(&self, frame: Frame) {
        match frame.header.msg_type {
            MessageType::RelayForward => self.handle_delivery(frame.payload).await,
            MessageType::RelayError => {
                if let Ok(error) = RelayErrorPayload::decode(&frame.payload) {
                    warn!(code = error.error_code, reason = %error.error_message, "relay error");
                    self.inner.circuit.lock().unwrap().fail();
                    if let Some(entry) = *self.inner.entry_relay.read().unwrap() {
                        self.inner.directory.record_failure(&entry);
                    }
                    let _ = self.inner.events.send(ClientEvent::RelayError(error)).await;
                }
            }
            other => debug!(msg_type = ?other, "ignoring frame"),
        }
    }

    /// Process one delivered ciphertext: optional RSA peel, X3DH-init
    /// detection, ratchet decryption, then structural dispatch.
    async fn handle_delivery(&self, payload: Vec<u8>) {
        // Peel the RSA wrapper if the sender applied one
        let data = match self.inner.rsa.decrypt(&payload) {
            Ok(inner) => inner,
            Err(_) => payload,
        };

        if let Some(parsed) = InitialMessage::decode_marked(&data) {
            match parsed {
                Ok(initial) => match self.inner.sessions.respond_to_initial(&initial) {
                    Ok((peer, plaintext)) => self.dispatch_plaintext(peer, plaintext).await,
                    Err(e) => warn!(error = %e, "X3DH initiation rejected"),
                },
                Err(e) => warn!(error = %e, "malformed initial message"),
            }
            return;
        }

        match self.inner.sessions.decrypt_any(&data) {
            Ok((peer, plaintext)) => self.dispatch_plaintext(peer, plaintext).await,
            Err(e) => debug!(error = %e, "undecryptable delivery dropped"),
        }
    }

    /// Route a decrypted payload to the right decoder by structure.
    async fn dispatch_plaintext(&self, peer: Address, plaintext: Vec<u8>) {
        if let Ok(typing) = TypingIndicator::decode(&plaintext) {
            let _ = self.inner.events.send(ClientEvent::Typing(typing)).await;
            return;
        }
        if let Ok(receipt) = ReadReceipt::decode(&plaintext) {
            let _ = self.inner.events.send(ClientEvent::Receipt(receipt)).await;
            return;
        }
        if let Ok(ack) = Ack::decode(&plaintext) {
            let _ = self.inner.events.send(ClientEvent::Ack(ack)).await;
            return;
        }
        if let Ok(message) = DirectMessage::decode(&plaintext) {
            self.accept_direct_message(peer, message).await;
            return;
        }
        if let Ok(group) = GroupMessage::decode(&plaintext) {
            let _ = self.inner.events.send(ClientEvent::Group(group)).await;
            return;
        }
        debug!(peer = %peer, len = plaintext.len(), "no decoder matched; dropped");
    }

    /// Ordered delivery with deduplication; every arrival is acknowledged.
    async fn accept_direct_message(&self, peer: Address, message: DirectMessage) {
        if message.from != peer {
            warn!(claimed = %message.from, session = %peer, "sender mismatch; dropped");
            return;
        }

        // Verify the sender's signature when we know their identity key
        if let Some(bundle) = self.inner.bundles.lock().unwrap().get(&peer) {
            if verify_payload(
                &bundle.identity_signing,
                &message.signable_data(),
                &message.signature,
            )
            .is_err()
            {
                warn!(peer = %peer, "bad message signature; dropped");
                return;
            }
        }

        let ack_id = derive_message_id(&message);
        let ack_seq = message.sequence;

        let outcome = {
            let mut sequencers = self.inner.sequencers.lock().unwrap();
            sequencers.entry(peer).or_default().offer(message)
        };

        match outcome {
            SequenceOutcome::Deliver(messages) => {
                for delivered in messages {
                    let _ = self
                        .inner
                        .events
                        .send(ClientEvent::Message(delivered))
                        .await;
                }
            }
            SequenceOutcome::Buffered => debug!(peer = %peer, "buffered out-of-order message"),
            SequenceOutcome::Duplicate => debug!(peer = %peer, "duplicate dropped"),
        }

        // Acks are best-effort; duplicates produce duplicate acks
        if let Err(e) = self.send_ack(peer, ack_id, ack_seq).await {
            debug!(peer = %peer, error = %e, "ack send failed");
        }
    }

    async fn send_ack(&self, to: Address, message_id: MessageId, sequence: u64) -> Result<()> {
        let ack = Ack {
            from: self.address(),
            to,
            message_id,
            sequence,
            timestamp: unix_now(),
        };
        let payload = self.inner.sessions.encrypt(&to, &ack.encode())?;
        self.send_via_circuit(to, payload).await
    }
}

/// Deterministic message id both ends can derive: the first 16 bytes of
/// SHA-256 over the message's signable bytes.
pub fn derive_message_id(message: &DirectMessage) -> MessageId {
    let digest = Sha256::digest(message.signable_data());
    let mut id = [0u8; 16];
    id.copy_from_slice(&digest[..16]);
    MessageId(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(seq: u64, content: &[u8]) -> DirectMessage {
        DirectMessage {
            from: Address([1u8; 20]),
            to: Address([2u8; 20]),
            timestamp_ms: 1234,
            sequence: seq,
            content_type: ContentType::Text,
            reply_to: MessageId::ZERO,
            content: content.to_vec(),
            signature: vec![0u8; 64],
        }
    }

    #[test]
    fn test_derive_message_id_deterministic() {
        let m = message(1, b"hello");
        assert_eq!(derive_message_id(&m), derive_message_id(&m));
    }

    #[test]
    fn test_derive_message_id_ignores_signature() {
        let mut a = message(1, b"hello");
        let mut b = message(1, b"hello");
        a.signature = vec![1u8; 64];
        b.signature = vec![2u8; 64];
        assert_eq!(derive_message_id(&a), derive_message_id(&b));
    }

    #[test]
    fn test_derive_message_id_differs_by_content() {
        assert_ne!(
            derive_message_id(&message(1, b"hello")),
            derive_message_id(&message(1, b"world"))
        );
        assert_ne!(
            derive_message_id(&message(1, b"hello")),
            derive_message_id(&message(2, b"hello"))
        );
    }
}
