//! ZenTalk Onion Routing
//!
//! Source-routed layered encryption across an ordered hop list. The sender
//! wraps the payload innermost-out, encrypting each layer to one relay's RSA
//! key; every relay peels exactly one layer to learn only its next hop. An
//! integrity hash rides inside each layer so tampering is caught at the hop
//! that would otherwise forward garbage.

use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zentalk_core::{Address, ADDRESS_BYTES};
use zentalk_crypto::{encrypt_for, RsaKeypair};

#[derive(Error, Debug)]
pub enum OnionError {
    #[error("Empty relay path")]
    EmptyPath,
    #[error("Layer encryption failed")]
    EncryptionFailed,
    #[error("Layer decryption failed")]
    DecryptionFailed,
    #[error("Malformed onion layer")]
    MalformedLayer,
    #[error("Layer integrity hash mismatch")]
    IntegrityMismatch,
    #[error("Zero next-hop address")]
    ZeroNextHop,
}

/// One relay hop: where to reach it and the key to encrypt its layer to
#[derive(Clone)]
pub struct OnionHop {
    pub address: Address,
    pub public_key: RsaPublicKey,
}

/// Plaintext content of one onion layer.
///
/// Wire layout: next_hop(20) ‖ ttl(u8) ‖ payload(u32 len + bytes) ‖ hash(32)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionLayer {
    pub next_hop: Address,
    pub ttl: u8,
    pub payload: Vec<u8>,
    pub hash: [u8; 32],
}

impl OnionLayer {
    fn new(next_hop: Address, ttl: u8, payload: Vec<u8>) -> Self {
        let hash = Sha256::digest(&payload).into();
        Self {
            next_hop,
            ttl,
            payload,
            hash,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ADDRESS_BYTES + 1 + 4 + self.payload.len() + 32);
        out.extend_from_slice(self.next_hop.as_bytes());
        out.push(self.ttl);
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.hash);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, OnionError> {
        if buf.len() < ADDRESS_BYTES + 1 + 4 + 32 {
            return Err(OnionError::MalformedLayer);
        }
        let mut next_hop = [0u8; ADDRESS_BYTES];
        next_hop.copy_from_slice(&buf[..ADDRESS_BYTES]);
        let ttl = buf[ADDRESS_BYTES];
        let len_start = ADDRESS_BYTES + 1;
        let payload_len =
            u32::from_be_bytes(buf[len_start..len_start + 4].try_into().unwrap()) as usize;
        let payload_start = len_start + 4;
        if buf.len() != payload_start + payload_len + 32 {
            return Err(OnionError::MalformedLayer);
        }
        let payload = buf[payload_start..payload_start + payload_len].to_vec();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&buf[payload_start + payload_len..]);
        Ok(Self {
            next_hop: Address(next_hop),
            ttl,
            payload,
            hash,
        })
    }

    /// Check the integrity hash against the carried payload
    pub fn verify_hash(&self) -> bool {
        let computed: [u8; 32] = Sha256::digest(&self.payload).into();
        computed == self.hash
    }
}

/// Result of peeling one layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeeledLayer {
    pub next_hop: Address,
    pub ttl: u8,
    pub payload: Vec<u8>,
}

/// Wrap `payload` for delivery to `recipient` across the ordered relay path.
///
/// The innermost layer addresses the recipient with ttl 0; each outer layer
/// addresses the following relay. The returned bytes go to the first relay.
pub fn build(
    path: &[OnionHop],
    recipient: Address,
    payload: Vec<u8>,
) -> Result<Vec<u8>, OnionError> {
    if path.is_empty() {
        return Err(OnionError::EmptyPath);
    }

    // Innermost layer: the final relay forwards to the recipient
    let last = path.len() - 1;
    let inner = OnionLayer::new(recipient, 0, payload);
    let mut wrapped = encrypt_for(&path[last].public_key, &inner.encode())
        .map_err(|_| OnionError::EncryptionFailed)?;

    // Wrap outward: each relay learns only the next relay's address
    for i in (0..last).rev() {
        let ttl = (path.len() - 1 - i) as u8;
        let layer = OnionLayer::new(path[i + 1].address, ttl, wrapped);
        wrapped = encrypt_for(&path[i].public_key, &layer.encode())
            .map_err(|_| OnionError::EncryptionFailed)?;
    }

    Ok(wrapped)
}

/// Peel one layer with this relay's private key.
///
/// Validates the integrity hash and rejects the reserved zero next-hop.
pub fn peel(keypair: &RsaKeypair, data: &[u8]) -> Result<PeeledLayer, OnionError> {
    let plaintext = keypair
        .decrypt(data)
        .map_err(|_| OnionError::DecryptionFailed)?;
    let layer = OnionLayer::decode(&plaintext)?;

    if !layer.verify_hash() {
        return Err(OnionError::IntegrityMismatch);
    }
    if layer.next_hop.is_zero() {
        return Err(OnionError::ZeroNextHop);
    }

    Ok(PeeledLayer {
        next_hop: layer.next_hop,
        ttl: layer.ttl,
        payload: layer.payload,
    })
}
