//! Pairwise session management.
//!
//! The client owns the in-memory session map; persistence is a write-through
//! sink over opaque blobs keyed by peer address, so the storage layer never
//! sees ratchet internals. Sessions are saved after every advance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use zentalk_core::Address;
use zentalk_crypto::{
    initiate, respond, IdentityKeyPair, InitialMessage, KeyBundle, PreKeyStore, RatchetState,
};

use crate::{ClientError, Result};

/// Maximum sessions tried against an unattributed ratchet frame
const MAX_SESSION_TRIALS: usize = 32;

/// Plausible ratchet-frame header lengths on receive
const HEADER_LEN_RANGE: std::ops::RangeInclusive<usize> = 40..=200;

/// Write-through persistence for ratchet sessions, keyed by peer address.
/// Implementations must round-trip blobs byte-exactly.
pub trait SessionStore: Send + Sync {
    fn save(&self, peer: &Address, blob: &[u8]) -> Result<()>;
    fn load(&self, peer: &Address) -> Result<Option<Vec<u8>>>;
    fn delete(&self, peer: &Address) -> Result<()>;
    /// Peers with a persisted session
    fn list(&self) -> Result<Vec<Address>>;
}

/// In-memory store for tests and ephemeral clients
pub struct MemorySessionStore {
    blobs: Mutex<HashMap<Address, Vec<u8>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, peer: &Address, blob: &[u8]) -> Result<()> {
        self.blobs.lock().unwrap().insert(*peer, blob.to_vec());
        Ok(())
    }

    fn load(&self, peer: &Address) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().unwrap().get(peer).cloned())
    }

    fn delete(&self, peer: &Address) -> Result<()> {
        self.blobs.lock().unwrap().remove(peer);
        Ok(())
    }

    fn list(&self) -> Result<Vec<Address>> {
        Ok(self.blobs.lock().unwrap().keys().copied().collect())
    }
}

/// Manages X3DH establishment and per-peer ratchet state
pub struct SessionManager {
    identity: IdentityKeyPair,
    prekeys: Mutex<PreKeyStore>,
    sessions: Mutex<HashMap<Address, RatchetState>>,
    store: Arc<dyn SessionStore>,
}

impl SessionManager {
    pub fn new(
        identity: IdentityKeyPair,
        prekeys: PreKeyStore,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let manager = Self {
            identity,
            prekeys: Mutex::new(prekeys),
            sessions: Mutex::new(HashMap::new()),
            store,
        };
        manager.preload_sessions();
        manager
    }

    /// Bring persisted sessions back into memory so unattributed frames can
    /// be tried against them after a restart.
    fn preload_sessions(&self) {
        let peers = match self.store.list() {
            Ok(peers) => peers,
            Err(e) => {
                warn!(error = %e, "session enumeration failed");
                return;
            }
        };
        let mut sessions = self.sessions.lock().unwrap();
        for peer in peers {
            match self.load_session(&peer) {
                Ok(Some(state)) => {
                    sessions.insert(peer, state);
                }
                Ok(None) => {}
                Err(e) => warn!(peer = %peer, error = %e, "unreadable session blob"),
            }
        }
    }

    pub fn identity(&self) -> &IdentityKeyPair {
        &self.identity
    }

    pub fn address(&self) -> Address {
        self.identity.address()
    }

    /// Publishable key bundle for the current prekey pool
    pub fn bundle(&self) -> KeyBundle {
        self.prekeys.lock().unwrap().bundle(&self.identity)
    }

    /// Remaining one-time prekeys (for replenish decisions)
    pub fn one_time_prekey_count(&self) -> usize {
        self.prekeys.lock().unwrap().one_time_count()
    }

    /// Top the one-time pool back up; the caller republishes the bundle.
    pub fn replenish_prekeys(&self, target: usize) {
        self.prekeys.lock().unwrap().replenish(target);
    }

    pub fn has_session(&self, peer: &Address) -> bool {
        if self.sessions.lock().unwrap().contains_key(peer) {
            return true;
        }
        self.load_session(peer).map(|s| s.is_some()).unwrap_or(false)
    }

    fn load_session(&self, peer: &Address) -> Result<Option<RatchetState>> {
        match self.store.load(peer)? {
            Some(blob) => {
                let state = RatchetState::from_bytes(&blob)
                    .map_err(|e| ClientError::Session(e.to_string()))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    fn persist(&self, peer: &Address, state: &RatchetState) -> Result<()> {
        let blob = state
            .to_bytes()
            .map_err(|e| ClientError::Session(e.to_string()))?;
        self.store.save(peer, &blob)
    }

    /// Run a closure against the peer's session, persisting after it
    /// advances. Loads from the store when the session is not resident.
    fn with_session<T>(
        &self,
        peer: &Address,
        f: impl FnOnce(&mut RatchetState) -> Result<T>,
    ) -> Result<T> {
        let mut sessions = self.sessions.lock().unwrap();
        if !sessions.contains_key(peer) {
            match self.load_session(peer)? {
                Some(state) => {
                    sessions.insert(*peer, state);
                }
                None => return Err(ClientError::NoSession),
            }
        }
        let state = sessions.get_mut(peer).unwrap();
        let out = f(state)?;
        self.persist(peer, state)?;
        Ok(out)
    }

    /// Establish a session as initiator and produce the marked initial
    /// message whose ciphertext is the first ratchet frame over `plaintext`.
    pub fn initiate_session(
        &self,
        peer: &Address,
        bundle: &KeyBundle,
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        let agreement =
            initiate(&self.identity, bundle).map_err(|e| ClientError::Crypto(e.to_string()))?;

        let mut state = RatchetState::init_initiator(
            agreement.shared_secret,
            agreement.ephemeral.clone(),
            agreement.remote_signed_prekey,
        )
        .map_err(|e| ClientError::Session(e.to_string()))?;

        let frame = state
            .encrypt(plaintext)
            .map_err(|e| ClientError::Session(e.to_string()))?;

        self.persist(peer, &state)?;
        self.sessions.lock().unwrap().insert(*peer, state);
        debug!(peer = %peer, "initiated session");

        let message = InitialMessage {
            sender_address: self.address(),
            identity_pub: self.identity.dh.public_key_bytes(),
            ephemeral_pub: agreement.ephemeral.public_key_bytes(),
            signed_prekey_id: agreement.signed_prekey_id,
            one_time_prekey_id: agreement.one_time_prekey_id,
            ciphertext: frame,
        };
        Ok(message.encode_marked())
    }

    /// Accept an initial message as responder: mirror the X3DH, consume the
    /// referenced one-time prekey, and decrypt the embedded first frame.
    pub fn respond_to_initial(&self, message: &InitialMessage) -> Result<(Address, Vec<u8>)> {
        let peer = message.sender_address;

        let (shared, spk_keypair) = {
            let mut prekeys = self.prekeys.lock().unwrap();
            if prekeys.signed.key_id != message.signed_prekey_id {
                return Err(ClientError::Session(format!(
                    "unknown signed prekey id {}",
                    message.signed_prekey_id
                )));
            }
            let one_time = if message.one_time_prekey_id != 0 {
                // Consumed here; it is never handed out again
                Some(
                    prekeys
                        .take_one_time(message.one_time_prekey_id)
                        .map_err(|e| ClientError::Session(e.to_string()))?,
                )
            } else {
                None
            };
            let shared = respond(
                &self.identity,
                &prekeys.signed,
                one_time.as_ref(),
                message,
            )
            .map_err(|e| ClientError::Crypto(e.to_string()))?;
            (shared, prekeys.signed.keypair.clone())
        };

        let mut state = RatchetState::init_responder(shared, spk_keypair, message.ephemeral_pub)
            .map_err(|e| ClientError::Session(e.to_string()))?;

        let plaintext = state
            .decrypt(&message.ciphertext)
            .map_err(|e| ClientError::Session(e.to_string()))?;

        self.persist(&peer, &state)?;
        self.sessions.lock().unwrap().insert(peer, state);
        debug!(peer = %peer, "responded to session initiation");

        Ok((peer, plaintext))
    }

    /// Encrypt a plaintext for a peer with an established session
    pub fn encrypt(&self, peer: &Address, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.with_session(peer, |state| {
            state
                .encrypt(plaintext)
                .map_err(|e| ClientError::Session(e.to_string()))
        })
    }

    /// Decrypt a ratchet frame from a known peer
    pub fn decrypt(&self, peer: &Address, frame: &[u8]) -> Result<Vec<u8>> {
        self.with_session(peer, |state| match state.decrypt(frame) {
            Ok(plaintext) => Ok(plaintext),
            Err(e) if e.is_fatal() => {
                warn!(peer = %peer, error = %e, "fatal ratchet error, dropping session");
                Err(ClientError::Session(e.to_string()))
            }
            Err(e) => Err(ClientError::Session(e.to_string())),
        })
        .map_err(|e| {
            // Fatal errors require a fresh X3DH; forget the session
            if let ClientError::Session(ref msg) = e {
                if msg.contains("Skipped-key limit") {
                    self.drop_session(peer);
                }
            }
            e
        })
    }

    /// Try the frame against every known session (bounded). Used when the
    /// outer envelope does not identify the sender.
    pub fn decrypt_any(&self, frame: &[u8]) -> Result<(Address, Vec<u8>)> {
        if frame.len() < 2 {
            return Err(ClientError::NoSession);
        }
        let header_len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
        if !HEADER_LEN_RANGE.contains(&header_len) {
            return Err(ClientError::NoSession);
        }

        let peers: Vec<Address> = {
            let sessions = self.sessions.lock().unwrap();
            sessions.keys().take(MAX_SESSION_TRIALS).copied().collect()
        };

        for peer in peers {
            if let Ok(plaintext) = self.decrypt(&peer, frame) {
                return Ok((peer, plaintext));
            }
        }
        Err(ClientError::NoSession)
    }

    /// Forget a session (fatal ratchet failure or peer reset)
    pub fn drop_session(&self, peer: &Address) {
        self.sessions.lock().unwrap().remove(peer);
        let _ = self.store.delete(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        let identity = IdentityKeyPair::generate();
        let prekeys = PreKeyStore::generate(&identity, 4);
        SessionManager::new(identity, prekeys, Arc::new(MemorySessionStore::new()))
    }

    #[test]
    fn test_initiate_and_respond() {
        let alice = manager();
        let bob = manager();
        let bob_addr = bob.address();

        let marked = alice
            .initiate_session(&bob_addr, &bob.bundle(), b"hi")
            .unwrap();
        let initial = InitialMessage::decode_marked(&marked).unwrap().unwrap();

        let before = bob.one_time_prekey_count();
        let (peer, plaintext) = bob.respond_to_initial(&initial).unwrap();
        assert_eq!(peer, alice.address());
        assert_eq!(plaintext, b"hi");
        // The referenced one-time prekey is gone
        assert_eq!(bob.one_time_prekey_count(), before - 1);

        assert!(alice.has_session(&bob_addr));
        assert!(bob.has_session(&alice.address()));
    }

    #[test]
    fn test_conversation_after_establishment() {
        let alice = manager();
        let bob = manager();

        let marked = alice
            .initiate_session(&bob.address(), &bob.bundle(), b"m1")
            .unwrap();
        let initial = InitialMessage::decode_marked(&marked).unwrap().unwrap();
        bob.respond_to_initial(&initial).unwrap();

        let frame = alice.encrypt(&bob.address(), b"m2").unwrap();
        let plaintext = bob.decrypt(&alice.address(), &frame).unwrap();
        assert_eq!(plaintext, b"m2");

        let frame = bob.encrypt(&alice.address(), b"m3").unwrap();
        let plaintext = alice.decrypt(&bob.address(), &frame).unwrap();
        assert_eq!(plaintext, b"m3");
    }

    #[test]
    fn test_decrypt_any_finds_the_right_session() {
        let alice = manager();
        let bob = manager();
        let carol = manager();

        for peer in [&bob, &carol] {
            let marked = alice
                .initiate_session(&peer.address(), &peer.bundle(), b"hello")
                .unwrap();
            let initial = InitialMessage::decode_marked(&marked).unwrap().unwrap();
            peer.respond_to_initial(&initial).unwrap();
        }

        let frame = bob.encrypt(&alice.address(), b"from bob").unwrap();
        let (peer, plaintext) = alice.decrypt_any(&frame).unwrap();
        assert_eq!(peer, bob.address());
        assert_eq!(plaintext, b"from bob");
    }

    #[test]
    fn test_decrypt_any_rejects_implausible_header() {
        let alice = manager();
        assert!(alice.decrypt_any(&[0xFF, 0xFF, 1, 2, 3]).is_err());
        assert!(alice.decrypt_any(&[]).is_err());
    }

    #[test]
    fn test_no_session_error() {
        let alice = manager();
        let stranger = Address([9u8; 20]);
        assert!(matches!(
            alice.encrypt(&stranger, b"x"),
            Err(ClientError::NoSession)
        ));
    }

    #[test]
    fn test_sessions_survive_via_store() {
        let identity = IdentityKeyPair::generate();
        let prekeys = PreKeyStore::generate(&identity, 2);
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());

        let bob = manager();
        let alice = SessionManager::new(identity.clone(), prekeys, store.clone());
        let marked = alice
            .initiate_session(&bob.address(), &bob.bundle(), b"first")
            .unwrap();
        let initial = InitialMessage::decode_marked(&marked).unwrap().unwrap();
        bob.respond_to_initial(&initial).unwrap();

        // Restart: a fresh manager over the same store picks the session up
        let prekeys2 = PreKeyStore::generate(&identity, 2);
        let alice2 = SessionManager::new(identity, prekeys2, store);
        let frame = bob.encrypt(&alice2.address(), b"after restart").unwrap();
        let plaintext = alice2.decrypt(&bob.address(), &frame).unwrap();
        assert_eq!(plaintext, b"after restart");
    }

    #[test]
    fn test_unknown_prekey_id_rejected() {
        let alice = manager();
        let bob = manager();

        let marked = alice
            .initiate_session(&bob.address(), &bob.bundle(), b"x")
            .unwrap();
        let mut initial = InitialMessage::decode_marked(&marked).unwrap().unwrap();
        initial.signed_prekey_id = 999;
        assert!(bob.respond_to_initial(&initial).is_err());
    }
}
