//! RSA key exchange at the onion boundary.
//!
//! Small plaintexts are encrypted directly with RSA-OAEP(SHA-256); anything
//! larger than one OAEP block goes hybrid: a fresh AES-256 key is RSA-wrapped
//! and the body sealed with AES-256-GCM. A one-byte scheme tag lets the
//! decryptor dispatch without trial decryption.
//!
//! Hybrid layout: 0x02 ‖ wrapped-key(u32 len + bytes) ‖ AES-GCM body.
//! Direct layout: 0x01 ‖ RSA block.

use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;

use crate::aead;

/// RSA modulus size in bits
pub const RSA_BITS: usize = 2048;

const SCHEME_DIRECT: u8 = 0x01;
const SCHEME_HYBRID: u8 = 0x02;

#[derive(Error, Debug)]
pub enum RsaError {
    #[error("Key generation failed")]
    KeyGeneration,
    #[error("Invalid PEM key: {0}")]
    InvalidPem(String),
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Malformed ciphertext")]
    MalformedCiphertext,
}

/// RSA keypair for onion-layer key exchange
pub struct RsaKeypair {
    pub private: RsaPrivateKey,
    pub public: RsaPublicKey,
}

impl Clone for RsaKeypair {
    fn clone(&self) -> Self {
        Self {
            private: self.private.clone(),
            public: self.public.clone(),
        }
    }
}

impl RsaKeypair {
    /// Generate a new 2048-bit keypair
    pub fn generate() -> Result<Self, RsaError> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_BITS).map_err(|_| RsaError::KeyGeneration)?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// PEM-encode the public key (PKCS#8 SPKI)
    pub fn public_key_pem(&self) -> Result<String, RsaError> {
        self.public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| RsaError::InvalidPem(e.to_string()))
    }

    /// PEM-encode the private key (PKCS#8)
    pub fn private_key_pem(&self) -> Result<String, RsaError> {
        Ok(self
            .private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| RsaError::InvalidPem(e.to_string()))?
            .to_string())
    }

    /// Restore a keypair from a PKCS#8 private key PEM
    pub fn from_private_pem(pem: &str) -> Result<Self, RsaError> {
        let private =
            RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| RsaError::InvalidPem(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Decrypt a buffer produced by [`encrypt_for`]
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, RsaError> {
        let (scheme, body) = data.split_first().ok_or(RsaError::MalformedCiphertext)?;
        match *scheme {
            SCHEME_DIRECT => self
                .private
                .decrypt(Oaep::new::<Sha256>(), body)
                .map_err(|_| RsaError::DecryptionFailed),
            SCHEME_HYBRID => {
                if body.len() < 4 {
                    return Err(RsaError::MalformedCiphertext);
                }
                let wrapped_len =
                    u32::from_be_bytes(body[..4].try_into().unwrap()) as usize;
                if body.len() < 4 + wrapped_len {
                    return Err(RsaError::MalformedCiphertext);
                }
                let wrapped = &body[4..4 + wrapped_len];
                let sealed = &body[4 + wrapped_len..];

                let key_bytes = self
                    .private
                    .decrypt(Oaep::new::<Sha256>(), wrapped)
                    .map_err(|_| RsaError::DecryptionFailed)?;
                let key: [u8; 32] = key_bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| RsaError::MalformedCiphertext)?;

                aead::open(&key, sealed).map_err(|_| RsaError::DecryptionFailed)
            }
            _ => Err(RsaError::MalformedCiphertext),
        }
    }
}

/// Parse a PEM public key (PKCS#8 SPKI)
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey, RsaError> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|e| RsaError::InvalidPem(e.to_string()))
}

/// Largest plaintext a single OAEP(SHA-256) block holds for our modulus
fn max_direct_len() -> usize {
    RSA_BITS / 8 - 2 * 32 - 2
}

/// Encrypt for a recipient public key, choosing direct or hybrid by size.
pub fn encrypt_for(public: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, RsaError> {
    if plaintext.len() <= max_direct_len() {
        let block = public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|_| RsaError::EncryptionFailed)?;
        let mut out = Vec::with_capacity(1 + block.len());
        out.push(SCHEME_DIRECT);
        out.extend_from_slice(&block);
        Ok(out)
    } else {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);

        let wrapped = public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &key)
            .map_err(|_| RsaError::EncryptionFailed)?;
        let sealed = aead::seal(&key, plaintext).map_err(|_| RsaError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(1 + 4 + wrapped.len() + sealed.len());
        out.push(SCHEME_HYBRID);
        out.extend_from_slice(&(wrapped.len() as u32).to_be_bytes());
        out.extend_from_slice(&wrapped);
        out.extend_from_slice(&sealed);
        Ok(out)
    }
}

/// Encrypt for a PEM-encoded recipient key
pub fn encrypt_for_pem(pem: &str, plaintext: &[u8]) -> Result<Vec<u8>, RsaError> {
    encrypt_for(&public_key_from_pem(pem)?, plaintext)
}
