//! ZenTalk Keystore
//!
//! Passphrase-protected at-rest storage for identity and session secrets.
//! Every record is one file: `"ZTKS" ‖ version(1) ‖ salt(16) ‖ sealed blob`,
//! where the blob is ChaCha20-Poly1305 under an Argon2id key derived from
//! the passphrase and the per-file salt. Files are created with 0600
//! permissions (and the keystore directory with 0700) on unix.

use std::path::{Path, PathBuf};

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;
use zentalk_crypto::{IdentityKeyData, PreKeyStoreData};

const MAGIC: &[u8; 4] = b"ZTKS";
const VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a keystore file")]
    BadMagic,

    #[error("Unsupported keystore version {0}")]
    BadVersion(u8),

    #[error("Wrong passphrase or corrupted file")]
    DecryptionFailed,

    #[error("Key derivation failed")]
    KeyDerivation,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, KeystoreError>;

/// A directory of passphrase-encrypted records
pub struct Keystore {
    dir: PathBuf,
    passphrase: Vec<u8>,
}

impl Drop for Keystore {
    fn drop(&mut self) {
        self.passphrase.zeroize();
    }
}

impl Keystore {
    /// Open (creating if needed) a keystore directory
    pub fn open(dir: impl AsRef<Path>, passphrase: &str) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        restrict_dir(&dir)?;
        Ok(Self {
            dir,
            passphrase: passphrase.as_bytes().to_vec(),
        })
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.zk"))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.record_path(name).exists()
    }

    /// Encrypt and write one record
    pub fn save(&self, name: &str, plaintext: &[u8]) -> Result<()> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let key = self.derive_key(&salt)?;

        let cipher =
            ChaCha20Poly1305::new_from_slice(&key).map_err(|_| KeystoreError::KeyDerivation)?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| KeystoreError::DecryptionFailed)?;

        let mut out = Vec::with_capacity(4 + 1 + SALT_LEN + NONCE_LEN + sealed.len());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);

        let path = self.record_path(name);
        std::fs::write(&path, &out)?;
        restrict_file(&path)?;
        Ok(())
    }

    /// Read and decrypt one record
    pub fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.record_path(name);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if data.len() < 4 + 1 + SALT_LEN + NONCE_LEN || &data[..4] != MAGIC {
            return Err(KeystoreError::BadMagic);
        }
        if data[4] != VERSION {
            return Err(KeystoreError::BadVersion(data[4]));
        }
        let salt = &data[5..5 + SALT_LEN];
        let nonce = &data[5 + SALT_LEN..5 + SALT_LEN + NONCE_LEN];
        let sealed = &data[5 + SALT_LEN + NONCE_LEN..];

        let key = self.derive_key(salt)?;
        let cipher =
            ChaCha20Poly1305::new_from_slice(&key).map_err(|_| KeystoreError::KeyDerivation)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| KeystoreError::DecryptionFailed)?;
        Ok(Some(plaintext))
    }

    pub fn delete(&self, name: &str) -> Result<bool> {
        let path = self.record_path(name);
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn derive_key(&self, salt: &[u8]) -> Result<[u8; 32]> {
        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(&self.passphrase, salt, &mut key)
            .map_err(|_| KeystoreError::KeyDerivation)?;
        Ok(key)
    }

    // ── Typed records ───────────────────────────────────────────────────

    pub fn save_identity(&self, identity: &IdentityKeyData) -> Result<()> {
        let blob = bincode::serialize(identity)
            .map_err(|e| KeystoreError::Serialization(e.to_string()))?;
        self.save("identity", &blob)
    }

    pub fn load_identity(&self) -> Result<Option<IdentityKeyData>> {
        match self.load("identity")? {
            Some(blob) => {
                let data = bincode::deserialize(&blob)
                    .map_err(|e| KeystoreError::Serialization(e.to_string()))?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    pub fn save_prekeys(&self, prekeys: &PreKeyStoreData) -> Result<()> {
        let blob = bincode::serialize(prekeys)
            .map_err(|e| KeystoreError::Serialization(e.to_string()))?;
        self.save("prekeys", &blob)
    }

    pub fn load_prekeys(&self) -> Result<Option<PreKeyStoreData>> {
        match self.load("prekeys")? {
            Some(blob) => {
                let data = bincode::deserialize(&blob)
                    .map_err(|e| KeystoreError::Serialization(e.to_string()))?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    /// Cached peer key bundle (JSON), keyed by peer address (hex)
    pub fn save_bundle(&self, peer_hex: &str, json: &[u8]) -> Result<()> {
        self.save(&format!("bundle_{peer_hex}"), json)
    }

    pub fn load_bundle(&self, peer_hex: &str) -> Result<Option<Vec<u8>>> {
        self.load(&format!("bundle_{peer_hex}"))
    }

    /// PKCS#8 private key PEM for the onion RSA keypair
    pub fn save_rsa_pem(&self, pem: &str) -> Result<()> {
        self.save("onion_rsa", pem.as_bytes())
    }

    pub fn load_rsa_pem(&self) -> Result<Option<String>> {
        match self.load("onion_rsa")? {
            Some(blob) => Ok(Some(
                String::from_utf8(blob)
                    .map_err(|e| KeystoreError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Opaque ratchet session blob keyed by peer address (hex)
    pub fn save_session(&self, peer_hex: &str, blob: &[u8]) -> Result<()> {
        self.save(&format!("session_{peer_hex}"), blob)
    }

    pub fn load_session(&self, peer_hex: &str) -> Result<Option<Vec<u8>>> {
        self.load(&format!("session_{peer_hex}"))
    }

    pub fn delete_session(&self, peer_hex: &str) -> Result<bool> {
        self.delete(&format!("session_{peer_hex}"))
    }
}

#[cfg(unix)]
fn restrict_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_file(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn restrict_dir(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_dir(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zentalk_crypto::IdentityKeyPair;

    fn keystore(passphrase: &str) -> (Keystore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ks = Keystore::open(dir.path().join("keys"), passphrase).unwrap();
        (ks, dir)
    }

    #[test]
    fn test_save_load_roundtrip() {
        let (ks, _dir) = keystore("correct horse");
        ks.save("record", b"secret bytes").unwrap();
        assert!(ks.contains("record"));
        assert_eq!(ks.load("record").unwrap().unwrap(), b"secret bytes");
    }

    #[test]
    fn test_missing_record() {
        let (ks, _dir) = keystore("pw");
        assert!(ks.load("nope").unwrap().is_none());
    }

    #[test]
    fn test_wrong_passphrase_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys");
        Keystore::open(&path, "right")
            .unwrap()
            .save("record", b"secret")
            .unwrap();

        let wrong = Keystore::open(&path, "wrong").unwrap();
        assert!(matches!(
            wrong.load("record"),
            Err(KeystoreError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_corrupted_file_rejected() {
        let (ks, _dir) = keystore("pw");
        ks.save("record", b"secret").unwrap();

        let path = ks.record_path("record");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            ks.load("record"),
            Err(KeystoreError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_not_a_keystore_file() {
        let (ks, _dir) = keystore("pw");
        std::fs::write(ks.record_path("record"), b"garbage").unwrap();
        assert!(matches!(ks.load("record"), Err(KeystoreError::BadMagic)));
    }

    #[test]
    fn test_delete() {
        let (ks, _dir) = keystore("pw");
        ks.save("record", b"x").unwrap();
        assert!(ks.delete("record").unwrap());
        assert!(!ks.delete("record").unwrap());
        assert!(!ks.contains("record"));
    }

    #[test]
    fn test_identity_roundtrip() {
        let (ks, _dir) = keystore("pw");
        let identity = IdentityKeyPair::generate();
        ks.save_identity(&identity.to_data()).unwrap();

        let restored = IdentityKeyPair::from_data(&ks.load_identity().unwrap().unwrap());
        assert_eq!(restored.address(), identity.address());
    }

    #[test]
    fn test_prekeys_roundtrip() {
        use zentalk_crypto::PreKeyStore;

        let (ks, _dir) = keystore("pw");
        let identity = IdentityKeyPair::generate();
        let prekeys = PreKeyStore::generate(&identity, 5);
        ks.save_prekeys(&prekeys.to_data()).unwrap();

        let restored = PreKeyStore::from_data(&ks.load_prekeys().unwrap().unwrap());
        assert_eq!(restored.one_time_count(), 5);
        assert_eq!(restored.signed.key_id, prekeys.signed.key_id);
    }

    #[test]
    fn test_bundle_cache_records() {
        let (ks, _dir) = keystore("pw");
        ks.save_bundle("ffee", b"{\"address\":\"ffee\"}").unwrap();
        assert_eq!(
            ks.load_bundle("ffee").unwrap().unwrap(),
            b"{\"address\":\"ffee\"}"
        );
        assert!(ks.load_bundle("0000").unwrap().is_none());
    }

    #[test]
    fn test_session_records() {
        let (ks, _dir) = keystore("pw");
        ks.save_session("aabb", b"ratchet state").unwrap();
        assert_eq!(ks.load_session("aabb").unwrap().unwrap(), b"ratchet state");
        assert!(ks.delete_session("aabb").unwrap());
        assert!(ks.load_session("aabb").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;
        let (ks, _dir) = keystore("pw");
        ks.save("record", b"x").unwrap();
        let mode = std::fs::metadata(ks.record_path("record"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
