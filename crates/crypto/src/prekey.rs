//! Medium-term signed prekeys, single-use one-time prekeys, and the public
//! key bundle published to the DHT.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use thiserror::Error;
use zentalk_core::{Address, PublicKeyBytes, SignatureBytes, unix_now};

use crate::{verify_signature, DhKeypair, IdentityKeyPair, SigningKeypair};

#[derive(Error, Debug)]
pub enum PrekeyError {
    #[error("Signed prekey signature verification failed")]
    BadSignature,
    #[error("One-time prekey {0} not found")]
    MissingOneTimePrekey(u32),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Bytes covered by the signed-prekey signature:
/// key_id(4 BE) ‖ public(32) ‖ timestamp(8 BE)
fn signed_prekey_signable(key_id: u32, public: &PublicKeyBytes, timestamp: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 32 + 8);
    data.extend_from_slice(&key_id.to_be_bytes());
    data.extend_from_slice(public);
    data.extend_from_slice(&timestamp.to_be_bytes());
    data
}

/// Medium-term signed prekey (local, holds the private half)
pub struct SignedPreKey {
    pub key_id: u32,
    pub keypair: DhKeypair,
    pub signature: SignatureBytes,
    pub timestamp: u64,
}

impl Clone for SignedPreKey {
    fn clone(&self) -> Self {
        Self {
            key_id: self.key_id,
            keypair: self.keypair.clone(),
            signature: self.signature,
            timestamp: self.timestamp,
        }
    }
}

impl SignedPreKey {
    /// Generate and sign a fresh prekey under the owner's identity signing key
    pub fn generate(signing: &SigningKeypair, key_id: u32) -> Self {
        let keypair = DhKeypair::generate();
        let timestamp = unix_now();
        let signature = signing.sign(&signed_prekey_signable(
            key_id,
            &keypair.public_key_bytes(),
            timestamp,
        ));
        Self {
            key_id,
            keypair,
            signature,
            timestamp,
        }
    }

    pub fn to_public(&self) -> SignedPreKeyPublic {
        SignedPreKeyPublic {
            key_id: self.key_id,
            public: self.keypair.public_key_bytes(),
            signature: self.signature,
            timestamp: self.timestamp,
        }
    }
}

/// Public half of a signed prekey, as published in a key bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedPreKeyPublic {
    pub key_id: u32,
    pub public: PublicKeyBytes,
    #[serde(with = "BigArray")]
    pub signature: SignatureBytes,
    pub timestamp: u64,
}

impl SignedPreKeyPublic {
    /// Verify the signature under the owner's identity signing key
    pub fn verify(&self, identity_signing_pub: &PublicKeyBytes) -> Result<(), PrekeyError> {
        verify_signature(
            identity_signing_pub,
            &signed_prekey_signable(self.key_id, &self.public, self.timestamp),
            &self.signature,
        )
        .map_err(|_| PrekeyError::BadSignature)
    }
}

/// Single-use one-time prekey (local, holds the private half)
pub struct OneTimePreKey {
    pub key_id: u32,
    pub keypair: DhKeypair,
}

impl OneTimePreKey {
    pub fn generate(key_id: u32) -> Self {
        Self {
            key_id,
            keypair: DhKeypair::generate(),
        }
    }

    pub fn to_public(&self) -> OneTimePreKeyPublic {
        OneTimePreKeyPublic {
            key_id: self.key_id,
            public: self.keypair.public_key_bytes(),
        }
    }
}

/// Public half of a one-time prekey
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimePreKeyPublic {
    pub key_id: u32,
    pub public: PublicKeyBytes,
}

/// Local prekey pool: one signed prekey plus one-time prekeys keyed by id.
///
/// One-time prekeys are consumed on first use and never handed out twice.
pub struct PreKeyStore {
    pub signed: SignedPreKey,
    one_time: HashMap<u32, OneTimePreKey>,
    next_one_time_id: u32,
}

impl PreKeyStore {
    /// Build a pool with `count` one-time prekeys
    pub fn generate(identity: &IdentityKeyPair, count: u32) -> Self {
        let signed = SignedPreKey::generate(&identity.signing, 1);
        let mut one_time = HashMap::new();
        for id in 1..=count {
            one_time.insert(id, OneTimePreKey::generate(id));
        }
        Self {
            signed,
            one_time,
            next_one_time_id: count + 1,
        }
    }

    pub fn one_time_count(&self) -> usize {
        self.one_time.len()
    }

    pub fn has_one_time(&self, key_id: u32) -> bool {
        self.one_time.contains_key(&key_id)
    }

    /// Consume a one-time prekey. It is removed from the pool permanently.
    pub fn take_one_time(&mut self, key_id: u32) -> Result<OneTimePreKey, PrekeyError> {
        self.one_time
            .remove(&key_id)
            .ok_or(PrekeyError::MissingOneTimePrekey(key_id))
    }

    /// Top the pool back up to `target` one-time prekeys; the owner republishes
    /// its bundle afterwards.
    pub fn replenish(&mut self, target: usize) {
        while self.one_time.len() < target {
            let id = self.next_one_time_id;
            self.next_one_time_id += 1;
            self.one_time.insert(id, OneTimePreKey::generate(id));
        }
    }

    /// Rotate the signed prekey, bumping its id
    pub fn rotate_signed(&mut self, identity: &IdentityKeyPair) {
        let next_id = self.signed.key_id + 1;
        self.signed = SignedPreKey::generate(&identity.signing, next_id);
    }

    /// Serializable secret form for keystore persistence
    pub fn to_data(&self) -> PreKeyStoreData {
        let mut one_time: Vec<OneTimePreKeyData> = self
            .one_time
            .values()
            .map(|k| OneTimePreKeyData {
                key_id: k.key_id,
                secret: k.keypair.secret_key_bytes(),
            })
            .collect();
        one_time.sort_by_key(|k| k.key_id);
        PreKeyStoreData {
            signed_key_id: self.signed.key_id,
            signed_secret: self.signed.keypair.secret_key_bytes(),
            signed_signature: self.signed.signature,
            signed_timestamp: self.signed.timestamp,
            one_time,
            next_one_time_id: self.next_one_time_id,
        }
    }

    pub fn from_data(data: &PreKeyStoreData) -> Self {
        let signed = SignedPreKey {
            key_id: data.signed_key_id,
            keypair: DhKeypair::from_secret_bytes(&data.signed_secret),
            signature: data.signed_signature,
            timestamp: data.signed_timestamp,
        };
        let one_time = data
            .one_time
            .iter()
            .map(|k| {
                (
                    k.key_id,
                    OneTimePreKey {
                        key_id: k.key_id,
                        keypair: DhKeypair::from_secret_bytes(&k.secret),
                    },
                )
            })
            .collect();
        Self {
            signed,
            one_time,
            next_one_time_id: data.next_one_time_id,
        }
    }

    /// Assemble the public key bundle for DHT publication
    pub fn bundle(&self, identity: &IdentityKeyPair) -> KeyBundle {
        let mut one_time: Vec<OneTimePreKeyPublic> =
            self.one_time.values().map(|k| k.to_public()).collect();
        one_time.sort_by_key(|k| k.key_id);
        KeyBundle {
            address: identity.address(),
            identity_dh: identity.dh.public_key_bytes(),
            identity_signing: identity.signing.public_key_bytes(),
            signed_prekey: self.signed.to_public(),
            one_time_prekeys: one_time,
            registration_id: identity.registration_id,
        }
    }
}

/// Serializable secret form of the prekey pool
#[derive(Serialize, Deserialize)]
pub struct PreKeyStoreData {
    pub signed_key_id: u32,
    pub signed_secret: [u8; 32],
    #[serde(with = "BigArray")]
    pub signed_signature: SignatureBytes,
    pub signed_timestamp: u64,
    pub one_time: Vec<OneTimePreKeyData>,
    pub next_one_time_id: u32,
}

/// Secret half of one one-time prekey, as persisted
#[derive(Serialize, Deserialize)]
pub struct OneTimePreKeyData {
    pub key_id: u32,
    pub secret: [u8; 32],
}

/// Public key bundle published to the DHT under `SHA-256(address)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyBundle {
    pub address: Address,
    pub identity_dh: PublicKeyBytes,
    pub identity_signing: PublicKeyBytes,
    pub signed_prekey: SignedPreKeyPublic,
    pub one_time_prekeys: Vec<OneTimePreKeyPublic>,
    pub registration_id: u32,
}

impl KeyBundle {
    /// Verify the signed-prekey signature against the bundle's identity key
    pub fn verify(&self) -> Result<(), PrekeyError> {
        self.signed_prekey.verify(&self.identity_signing)
    }

    /// First available one-time prekey, if any
    pub fn first_one_time(&self) -> Option<&OneTimePreKeyPublic> {
        self.one_time_prekeys.first()
    }

    pub fn to_json(&self) -> Result<Vec<u8>, PrekeyError> {
        serde_json::to_vec(self).map_err(|e| PrekeyError::Serialization(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, PrekeyError> {
        serde_json::from_slice(bytes).map_err(|e| PrekeyError::Serialization(e.to_string()))
    }
}
