//! The DHT node: UDP transport, request correlation, RPC handlers, and the
//! iterative lookup machinery.
//!
//! Every accepted datagram refreshes the sender in the routing table.
//! Outstanding requests live in a correlator map of one-shot completion
//! slots; entries are removed on completion or deadline.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use zentalk_core::config::{ALPHA, K, RPC_TIMEOUT, STORAGE_SWEEP_INTERVAL};
use zentalk_core::{Contact, NodeId};
use zentalk_crypto::SigningKeypair;

use crate::{
    decode_body, encode_body, DhtError, Envelope, FindNodePayload, FindNodeResponsePayload,
    FindValuePayload, FindValueResponsePayload, Result, RoutingTable, RpcType, SignedEntry,
    Storage, StoreAckPayload, StorePayload,
};

/// Maximum UDP datagram we accept
const MAX_DATAGRAM: usize = 64 * 1024;

struct NodeInner {
    node_id: NodeId,
    socket: UdpSocket,
    local_addr: SocketAddr,
    routing: RoutingTable,
    storage: Storage,
    signing: SigningKeypair,
    pending: Mutex<HashMap<String, oneshot::Sender<Envelope>>>,
}

/// A running DHT node. Cheap to clone; all clones share one socket and state.
#[derive(Clone)]
pub struct DhtNode {
    inner: Arc<NodeInner>,
}

impl DhtNode {
    /// Bind a node to `addr` (port 0 picks a free port). The node id is
    /// derived from the signing key.
    pub async fn bind(addr: SocketAddr, signing: SigningKeypair) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        let node_id = NodeId::from_key_material(&signing.public_key_bytes());

        Ok(Self {
            inner: Arc::new(NodeInner {
                node_id,
                socket,
                local_addr,
                routing: RoutingTable::new(node_id),
                storage: Storage::new(),
                signing,
                pending: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Spawn the receive loop and the storage expiry sweeper.
    pub fn start(&self) {
        let node = self.clone();
        tokio::spawn(async move {
            node.recv_loop().await;
        });

        let node = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STORAGE_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let removed = node.inner.storage.expire_sweep();
                if removed > 0 {
                    debug!(removed, "storage expiry sweep");
                }
            }
        });
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.node_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// This node as a contact other nodes can reach
    pub fn local_contact(&self) -> Contact {
        Contact::new(self.inner.node_id, self.inner.local_addr)
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.inner.routing
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    /// Seed the routing table with a known peer
    pub fn add_peer(&self, contact: Contact) {
        self.inner.routing.add_contact(contact);
    }

    /// Join the network through a bootstrap endpoint: learn its id from the
    /// reply, then walk toward our own id to populate nearby buckets.
    pub async fn bootstrap(&self, endpoint: SocketAddr) -> Result<()> {
        // The peer's real id arrives with its reply envelope
        let probe = Contact::new(NodeId::ZERO, endpoint);
        self.ping(&probe).await?;
        self.iterative_find_node(self.inner.node_id).await;
        Ok(())
    }

    // ── RPC client side ─────────────────────────────────────────────────

    async fn send_request(
        &self,
        to: &Contact,
        msg_type: RpcType,
        payload: Vec<u8>,
    ) -> Result<Envelope> {
        let request_id = Envelope::fresh_request_id();
        let envelope = Envelope::new(msg_type, request_id.clone(), self.local_contact(), payload);

        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .unwrap()
            .insert(request_id.clone(), tx);

        let bytes = envelope.to_json()?;
        if let Err(e) = self.inner.socket.send_to(&bytes, to.endpoint).await {
            self.inner.pending.lock().unwrap().remove(&request_id);
            return Err(e.into());
        }

        match tokio::time::timeout(RPC_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            _ => {
                self.inner.pending.lock().unwrap().remove(&request_id);
                self.inner.routing.record_failed_ping(&to.node_id);
                Err(DhtError::Timeout)
            }
        }
    }

    /// PING a peer. The reply envelope carries the peer's identity, which
    /// the receive path folds into the routing table.
    pub async fn ping(&self, to: &Contact) -> Result<()> {
        let reply = self.send_request(to, RpcType::Ping, vec![]).await?;
        if reply.msg_type != RpcType::Pong {
            return Err(DhtError::Transport("unexpected reply to ping".to_string()));
        }
        Ok(())
    }

    async fn send_find_node(&self, to: &Contact, target: NodeId) -> Result<Vec<Contact>> {
        let payload = encode_body(&FindNodePayload { target })?;
        let reply = self.send_request(to, RpcType::FindNode, payload).await?;
        let body: FindNodeResponsePayload = decode_body(&reply.payload)?;
        Ok(body.contacts)
    }

    async fn send_find_value(&self, to: &Contact, key: NodeId) -> Result<FindValueResponsePayload> {
        let payload = encode_body(&FindValuePayload { key })?;
        let reply = self.send_request(to, RpcType::FindValue, payload).await?;
        decode_body(&reply.payload)
    }

    async fn send_store(&self, to: &Contact, entry: &SignedEntry) -> Result<StoreAckPayload> {
        let payload = encode_body(&StorePayload {
            entry: entry.clone(),
        })?;
        let reply = self.send_request(to, RpcType::Store, payload).await?;
        decode_body(&reply.payload)
    }

    // ── Iterative lookups ───────────────────────────────────────────────

    /// Iterative FIND_NODE: α-parallel probes, converging on the K contacts
    /// closest to `target`.
    pub async fn iterative_find_node(&self, target: NodeId) -> Vec<Contact> {
        let mut shortlist = self.inner.routing.find_closest(&target, K);
        let mut queried: HashSet<NodeId> = HashSet::new();
        queried.insert(self.inner.node_id);

        loop {
            let batch: Vec<Contact> = shortlist
                .iter()
                .filter(|c| !queried.contains(&c.node_id))
                .take(ALPHA)
                .cloned()
                .collect();
            if batch.is_empty() {
                break;
            }
            let prev_head = shortlist.first().map(|c| c.node_id);

            let results =
                futures::future::join_all(batch.iter().map(|c| self.send_find_node(c, target)))
                    .await;

            for (contact, result) in batch.iter().zip(results) {
                queried.insert(contact.node_id);
                match result {
                    Ok(contacts) => {
                        self.inner.routing.add_contact(contact.clone());
                        for found in contacts {
                            if found.node_id == self.inner.node_id {
                                continue;
                            }
                            self.inner.routing.add_contact(found.clone());
                            if !shortlist.iter().any(|s| s.node_id == found.node_id) {
                                shortlist.push(found);
                            }
                        }
                    }
                    Err(e) => {
                        trace!(peer = %contact.node_id, error = %e, "probe failed");
                        self.inner.routing.record_failed_ping(&contact.node_id);
                    }
                }
            }

            shortlist.sort_by(|a, b| NodeId::cmp_distance(&target, &a.node_id, &b.node_id));
            shortlist.truncate(K);

            // Converged: the head did not move strictly closer this round
            let head = shortlist.first().map(|c| c.node_id);
            match (prev_head, head) {
                (Some(prev), Some(now)) if !now.is_closer_to(&target, &prev) => break,
                _ => {}
            }
        }

        shortlist
    }

    /// Iterative FIND_VALUE: same walk, but the first positive reply wins.
    pub async fn iterative_find_value(&self, key: NodeId) -> Result<Vec<u8>> {
        let mut shortlist = self.inner.routing.find_closest(&key, K);
        let mut queried: HashSet<NodeId> = HashSet::new();
        queried.insert(self.inner.node_id);

        loop {
            let batch: Vec<Contact> = shortlist
                .iter()
                .filter(|c| !queried.contains(&c.node_id))
                .take(ALPHA)
                .cloned()
                .collect();
            if batch.is_empty() {
                break;
            }
            let prev_head = shortlist.first().map(|c| c.node_id);

            let results =
                futures::future::join_all(batch.iter().map(|c| self.send_find_value(c, key)))
                    .await;

            for (contact, result) in batch.iter().zip(results) {
                queried.insert(contact.node_id);
                match result {
                    Ok(body) if body.found => {
                        if let Some(value) = body.value {
                            self.inner.routing.add_contact(contact.clone());
                            return Ok(value);
                        }
                    }
                    Ok(body) => {
                        self.inner.routing.add_contact(contact.clone());
                        for found in body.contacts {
                            if found.node_id == self.inner.node_id {
                                continue;
                            }
                            self.inner.routing.add_contact(found.clone());
                            if !shortlist.iter().any(|s| s.node_id == found.node_id) {
                                shortlist.push(found);
                            }
                        }
                    }
                    Err(e) => {
                        trace!(peer = %contact.node_id, error = %e, "probe failed");
                        self.inner.routing.record_failed_ping(&contact.node_id);
                    }
                }
            }

            shortlist.sort_by(|a, b| NodeId::cmp_distance(&key, &a.node_id, &b.node_id));
            shortlist.truncate(K);

            let head = shortlist.first().map(|c| c.node_id);
            match (prev_head, head) {
                (Some(prev), Some(now)) if !now.is_closer_to(&key, &prev) => break,
                _ => {}
            }
        }

        Err(DhtError::NotFound)
    }

    // ── High-level operations ───────────────────────────────────────────

    /// Sign and replicate a value to the K closest nodes. Succeeds when at
    /// least one replica acknowledges.
    pub async fn store(&self, key: NodeId, value: Vec<u8>, ttl: Duration) -> Result<usize> {
        let entry = SignedEntry::sign(&self.inner.signing, key, value, ttl.as_secs());
        self.store_entry(entry).await
    }

    /// Replicate an already-signed entry (used for periodic republish).
    pub async fn store_entry(&self, entry: SignedEntry) -> Result<usize> {
        entry.verify()?;
        let targets = self.iterative_find_node(entry.key).await;

        if targets.is_empty() {
            // Lone node: hold the value ourselves
            self.store_local(&entry);
            return Ok(1);
        }

        let results =
            futures::future::join_all(targets.iter().map(|c| self.send_store(c, &entry))).await;
        let acks = results
            .into_iter()
            .filter(|r| matches!(r, Ok(ack) if ack.success))
            .count();

        if acks == 0 {
            return Err(DhtError::StoreFailed);
        }
        Ok(acks)
    }

    fn store_local(&self, entry: &SignedEntry) {
        if let Ok(json) = entry.to_json() {
            self.inner.storage.put(
                entry.key,
                json,
                Duration::from_secs(entry.remaining_ttl()),
                entry.publisher_id(),
            );
        }
    }

    /// Resolve a key to its application value, checking local storage first
    /// and verifying the signed entry before returning it.
    pub async fn lookup(&self, key: NodeId) -> Result<Vec<u8>> {
        if let Some(stored) = self.inner.storage.get(&key) {
            let entry = SignedEntry::from_json(&stored.value)?;
            entry.verify()?;
            return Ok(entry.value);
        }

        let raw = self.iterative_find_value(key).await?;
        let entry = SignedEntry::from_json(&raw)?;
        entry.verify()?;
        if entry.key != key {
            return Err(DhtError::InvalidEntry("key mismatch"));
        }
        Ok(entry.value)
    }

    // ── Server side ─────────────────────────────────────────────────────

    async fn recv_loop(&self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, from) = match self.inner.socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "udp receive failed");
                    continue;
                }
            };

            let envelope = match Envelope::from_json(&buf[..len]) {
                Ok(env) => env,
                Err(e) => {
                    trace!(%from, error = %e, "dropping malformed datagram");
                    continue;
                }
            };

            self.handle_message(envelope, from).await;
        }
    }

    async fn handle_message(&self, envelope: Envelope, from: SocketAddr) {
        // Learn the sender, trusting the observed source address over the
        // claimed one.
        if envelope.sender.node_id != self.inner.node_id {
            let mut sender = envelope.sender.clone();
            sender.endpoint = from;
            sender.touch();
            self.inner.routing.add_contact(sender);
        }

        if envelope.msg_type.is_response() {
            if let Some(tx) = self
                .inner
                .pending
                .lock()
                .unwrap()
                .remove(&envelope.request_id)
            {
                let _ = tx.send(envelope);
            }
            return;
        }

        let reply = match envelope.msg_type {
            RpcType::Ping => Some((RpcType::Pong, vec![])),
            RpcType::Store => self.handle_store(&envelope),
            RpcType::FindNode => self.handle_find_node(&envelope),
            RpcType::FindValue => self.handle_find_value(&envelope),
            _ => None,
        };

        if let Some((msg_type, payload)) = reply {
            let out = Envelope::new(
                msg_type,
                envelope.request_id.clone(),
                self.local_contact(),
                payload,
            );
            if let Ok(bytes) = out.to_json() {
                if let Err(e) = self.inner.socket.send_to(&bytes, from).await {
                    warn!(%from, error = %e, "failed to send reply");
                }
            }
        }
    }

    fn handle_store(&self, envelope: &Envelope) -> Option<(RpcType, Vec<u8>)> {
        let ack = match decode_body::<StorePayload>(&envelope.payload) {
            Ok(body) => match body.entry.verify() {
                Ok(()) => {
                    self.store_local(&body.entry);
                    StoreAckPayload {
                        success: true,
                        reason: None,
                    }
                }
                Err(e) => {
                    debug!(error = %e, "rejecting unverifiable store");
                    StoreAckPayload {
                        success: false,
                        reason: Some(e.to_string()),
                    }
                }
            },
            Err(e) => StoreAckPayload {
                success: false,
                reason: Some(e.to_string()),
            },
        };
        Some((RpcType::StoreAck, encode_body(&ack).ok()?))
    }

    fn handle_find_node(&self, envelope: &Envelope) -> Option<(RpcType, Vec<u8>)> {
        let body: FindNodePayload = decode_body(&envelope.payload).ok()?;
        let contacts = self.inner.routing.find_closest(&body.target, K);
        let reply = FindNodeResponsePayload { contacts };
        Some((RpcType::FindNodeResponse, encode_body(&reply).ok()?))
    }

    fn handle_find_value(&self, envelope: &Envelope) -> Option<(RpcType, Vec<u8>)> {
        let body: FindValuePayload = decode_body(&envelope.payload).ok()?;
        let reply = match self.inner.storage.get(&body.key) {
            Some(stored) => FindValueResponsePayload {
                found: true,
                value: Some(stored.value),
                contacts: vec![],
            },
            None => FindValueResponsePayload {
                found: false,
                value: None,
                contacts: self.inner.routing.find_closest(&body.key, K),
            },
        };
        Some((RpcType::FindValueResponse, encode_body(&reply).ok()?))
    }
}
