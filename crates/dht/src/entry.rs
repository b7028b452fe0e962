//! Signed, TTL-bound DHT value records.
//!
//! Every STORE carries one of these; a node persists a value only after the
//! signature verifies and the TTL has not elapsed, which keeps unauthenticated
//! writers from poisoning the table. The random nonce makes each publication
//! unique so a captured record cannot be replayed as a fresh one.

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use zentalk_core::{random_bytes, unix_now, NodeId, PublicKeyBytes, SignatureBytes};
use zentalk_crypto::{verify_signature, SigningKeypair};

use crate::{DhtError, Result};

/// Signed value record as stored and replicated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedEntry {
    pub key: NodeId,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
    pub public_key: PublicKeyBytes,
    #[serde(with = "BigArray")]
    pub signature: SignatureBytes,
    /// Unix seconds at signing time
    pub timestamp: u64,
    /// Lifetime in seconds from `timestamp`
    pub ttl: u64,
    pub nonce: [u8; 16],
}

impl SignedEntry {
    /// Sign a fresh entry under the publisher's key
    pub fn sign(signing: &SigningKeypair, key: NodeId, value: Vec<u8>, ttl_secs: u64) -> Self {
        let timestamp = unix_now();
        let nonce: [u8; 16] = random_bytes();
        let public_key = signing.public_key_bytes();
        let signature = signing.sign(&signable(
            &key, &value, &public_key, timestamp, ttl_secs, &nonce,
        ));
        Self {
            key,
            value,
            public_key,
            signature,
            timestamp,
            ttl: ttl_secs,
            nonce,
        }
    }

    /// Verify signature and freshness.
    ///
    /// Accepts exactly the entries produced by [`SignedEntry::sign`] under
    /// the embedded key whose `timestamp + ttl` has not passed.
    pub fn verify(&self) -> Result<()> {
        if self.is_expired() {
            return Err(DhtError::Expired);
        }
        verify_signature(
            &self.public_key,
            &signable(
                &self.key,
                &self.value,
                &self.public_key,
                self.timestamp,
                self.ttl,
                &self.nonce,
            ),
            &self.signature,
        )
        .map_err(|_| DhtError::BadSignature)
    }

    pub fn is_expired(&self) -> bool {
        unix_now() > self.timestamp + self.ttl
    }

    /// Seconds of life left, zero when expired
    pub fn remaining_ttl(&self) -> u64 {
        (self.timestamp + self.ttl).saturating_sub(unix_now())
    }

    /// Publisher node id, derived from the signing key
    pub fn publisher_id(&self) -> NodeId {
        NodeId::from_key_material(&self.public_key)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DhtError::Serialization(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| DhtError::Serialization(e.to_string()))
    }
}

/// Bytes covered by the signature:
/// key ‖ value ‖ public_key ‖ timestamp(8 BE) ‖ ttl(8 BE) ‖ nonce
fn signable(
    key: &NodeId,
    value: &[u8],
    public_key: &PublicKeyBytes,
    timestamp: u64,
    ttl: u64,
    nonce: &[u8; 16],
) -> Vec<u8> {
    let mut data = Vec::with_capacity(20 + value.len() + 32 + 8 + 8 + 16);
    data.extend_from_slice(key.as_bytes());
    data.extend_from_slice(value);
    data.extend_from_slice(public_key);
    data.extend_from_slice(&timestamp.to_be_bytes());
    data.extend_from_slice(&ttl.to_be_bytes());
    data.extend_from_slice(nonce);
    data
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
