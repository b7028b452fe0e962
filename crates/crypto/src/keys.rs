use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zentalk_core::{Address, PublicKeyBytes, SignatureBytes};

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid secret key")]
    InvalidSecretKey,
    #[error("Signature verification failed")]
    BadSignature,
}

/// Keypair for signing (Ed25519)
pub struct SigningKeypair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl Clone for SigningKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
            verifying_key: self.verifying_key,
        }
    }
}

impl SigningKeypair {
    /// Generate a new random signing keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    pub fn public_key_bytes(&self) -> PublicKeyBytes {
        self.verifying_key.to_bytes()
    }

    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Keypair for Diffie-Hellman (X25519)
pub struct DhKeypair {
    pub secret: StaticSecret,
    pub public: X25519PublicKey,
}

impl Clone for DhKeypair {
    fn clone(&self) -> Self {
        let secret = StaticSecret::from(*self.secret.as_bytes());
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }
}

impl DhKeypair {
    /// Generate a new random DH keypair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key_bytes(&self) -> PublicKeyBytes {
        self.public.to_bytes()
    }

    pub fn secret_key_bytes(&self) -> [u8; 32] {
        *self.secret.as_bytes()
    }

    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let secret = StaticSecret::from(*secret);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Perform Diffie-Hellman key exchange
    pub fn diffie_hellman(&self, their_public: &PublicKeyBytes) -> [u8; 32] {
        let their_public = X25519PublicKey::from(*their_public);
        let shared = self.secret.diffie_hellman(&their_public);
        *shared.as_bytes()
    }
}

/// Long-term identity: X25519 DH keypair plus Ed25519 signing keypair.
///
/// The two keypairs are generated independently; the signed-prekey signature
/// verifies against the Ed25519 key.
pub struct IdentityKeyPair {
    pub dh: DhKeypair,
    pub signing: SigningKeypair,
    pub registration_id: u32,
}

impl Clone for IdentityKeyPair {
    fn clone(&self) -> Self {
        Self {
            dh: self.dh.clone(),
            signing: self.signing.clone(),
            registration_id: self.registration_id,
        }
    }
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        Self {
            dh: DhKeypair::generate(),
            signing: SigningKeypair::generate(),
            registration_id: rand::Rng::gen_range(&mut OsRng, 1..=0x3FFF),
        }
    }

    /// Subscriber address derived from the signing key
    pub fn address(&self) -> Address {
        Address::from_identity_key(&self.signing.public_key_bytes())
    }

    pub fn to_data(&self) -> IdentityKeyData {
        IdentityKeyData {
            dh_secret: self.dh.secret_key_bytes(),
            signing_secret: self.signing.secret_key_bytes(),
            registration_id: self.registration_id,
        }
    }

    pub fn from_data(data: &IdentityKeyData) -> Self {
        Self {
            dh: DhKeypair::from_secret_bytes(&data.dh_secret),
            signing: SigningKeypair::from_secret_bytes(&data.signing_secret),
            registration_id: data.registration_id,
        }
    }
}

/// Serializable secret form of an identity, persisted via the keystore
#[derive(Serialize, Deserialize)]
pub struct IdentityKeyData {
    pub dh_secret: [u8; 32],
    pub signing_secret: [u8; 32],
    pub registration_id: u32,
}

/// Verify a detached Ed25519 signature
pub fn verify_signature(
    public_key: &PublicKeyBytes,
    message: &[u8],
    signature: &SignatureBytes,
) -> Result<(), KeyError> {
    let key = VerifyingKey::from_bytes(public_key).map_err(|_| KeyError::InvalidPublicKey)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    key.verify(message, &sig).map_err(|_| KeyError::BadSignature)
}

/// Hash data using SHA-256
pub fn hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
