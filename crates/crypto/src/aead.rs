//! AES-256-GCM message encryption.
//!
//! The 12-byte random nonce is prepended to the GCM output, so a sealed
//! buffer is `nonce(12) ‖ ciphertext ‖ tag(16)`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AeadError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Invalid key")]
    InvalidKey,
    #[error("Ciphertext too short")]
    CiphertextTooShort,
}

/// Nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// Encrypt with AES-256-GCM, prepending a fresh random nonce.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, AeadError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AeadError::InvalidKey)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| AeadError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a nonce-prefixed AES-256-GCM buffer.
pub fn open(key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>, AeadError> {
    if sealed.len() < NONCE_LEN {
        return Err(AeadError::CiphertextTooShort);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AeadError::InvalidKey)?;
    let nonce = Nonce::from_slice(&sealed[..NONCE_LEN]);

    cipher
        .decrypt(nonce, &sealed[NONCE_LEN..])
        .map_err(|_| AeadError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = [42u8; 32];
        let sealed = seal(&key, b"Hello, ZenTalk!").unwrap();
        assert_eq!(open(&key, &sealed).unwrap(), b"Hello, ZenTalk!");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&[1u8; 32], b"secret").unwrap();
        assert_eq!(open(&[2u8; 32], &sealed), Err(AeadError::DecryptionFailed));
    }

    #[test]
    fn test_nonce_is_fresh() {
        let key = [7u8; 32];
        let a = seal(&key, b"same input").unwrap();
        let b = seal(&key, b"same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_ciphertext_overhead() {
        let key = [7u8; 32];
        let sealed = seal(&key, b"test").unwrap();
        // nonce(12) + plaintext(4) + tag(16)
        assert_eq!(sealed.len(), 12 + 4 + 16);
    }

    #[test]
    fn test_short_input_rejected() {
        assert_eq!(open(&[0u8; 32], &[1, 2, 3]), Err(AeadError::CiphertextTooShort));
    }

    #[test]
    fn test_corrupted_ciphertext_rejected() {
        let key = [9u8; 32];
        let mut sealed = seal(&key, b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert_eq!(open(&key, &sealed), Err(AeadError::DecryptionFailed));
    }

    #[test]
    fn test_empty_plaintext() {
        let key = [5u8; 32];
        let sealed = seal(&key, b"").unwrap();
        assert!(open(&key, &sealed).unwrap().is_empty());
    }
}
