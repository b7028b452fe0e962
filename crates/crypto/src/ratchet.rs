//! Double Ratchet with per-direction symmetric chains and a DH ratchet step
//! on every new remote ratchet key.
//!
//! State separation:
//!   root_key: updated on every DH ratchet step
//!   send_ck:  sending chain key, advanced per message
//!   recv_ck:  receiving chain key, advanced per message
//!   message keys: derived from a chain key, used once, never stored except
//!   in the bounded skipped-key cache for out-of-order arrivals
//!
//! A failed decryption never advances state: the work happens on a scratch
//! copy that is committed only on success.
//!
//! See the Signal Double Ratchet specification:
//! <https://signal.org/docs/specifications/doubleratchet/>

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;
use zentalk_core::config::MAX_SKIPPED_KEYS;
use zentalk_core::PublicKeyBytes;

use crate::{aead, DhKeypair};

/// HKDF info string for the root-key derivation
pub const RATCHET_INFO: &[u8] = b"ZenTalk Double Ratchet Root";

/// Fixed ratchet header length: dh_pub(32) ‖ prev_chain_len(4) ‖ msg_num(4)
pub const HEADER_LEN: usize = 40;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RatchetError {
    #[error("Malformed ratchet frame")]
    MalformedFrame,
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("No receiving chain established for this message")]
    NoReceivingChain,
    #[error("No remote ratchet key known")]
    NoRemoteKey,
    #[error("Skipped-key limit exceeded ({0} > {MAX_SKIPPED_KEYS})")]
    SkippedKeyLimit(usize),
    #[error("Key derivation failed")]
    KeyDerivation,
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RatchetError {
    /// Fatal errors terminate the session; the peers must run X3DH again.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RatchetError::SkippedKeyLimit(_))
    }
}

/// Unencrypted header carried with every ratchet message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatchetHeader {
    /// Sender's current DH ratchet public key
    pub dh_pub: PublicKeyBytes,
    /// Number of messages in the sender's previous sending chain
    pub prev_chain_len: u32,
    /// Message number within the current sending chain
    pub msg_num: u32,
}

impl RatchetHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..32].copy_from_slice(&self.dh_pub);
        out[32..36].copy_from_slice(&self.prev_chain_len.to_be_bytes());
        out[36..40].copy_from_slice(&self.msg_num.to_be_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, RatchetError> {
        if buf.len() != HEADER_LEN {
            return Err(RatchetError::MalformedFrame);
        }
        let mut dh_pub = [0u8; 32];
        dh_pub.copy_from_slice(&buf[..32]);
        Ok(Self {
            dh_pub,
            prev_chain_len: u32::from_be_bytes(buf[32..36].try_into().unwrap()),
            msg_num: u32::from_be_bytes(buf[36..40].try_into().unwrap()),
        })
    }
}

/// Split a ratchet frame `u16 BE header-len ‖ header ‖ ciphertext`.
pub fn split_frame(frame: &[u8]) -> Result<(RatchetHeader, &[u8]), RatchetError> {
    if frame.len() < 2 {
        return Err(RatchetError::MalformedFrame);
    }
    let header_len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    if header_len != HEADER_LEN || frame.len() < 2 + header_len {
        return Err(RatchetError::MalformedFrame);
    }
    let header = RatchetHeader::decode(&frame[2..2 + header_len])?;
    Ok((header, &frame[2 + header_len..]))
}

/// Message key cached for an out-of-order arrival
#[derive(Clone, Serialize, Deserialize)]
struct SkippedKey {
    dh_pub: PublicKeyBytes,
    msg_num: u32,
    message_key: [u8; 32],
}

impl Drop for SkippedKey {
    fn drop(&mut self) {
        self.message_key.zeroize();
    }
}

/// Complete Double Ratchet session state.
///
/// Serializable so the client can persist it (as an opaque blob) after every
/// advance and restore it across process restarts.
#[derive(Clone, Serialize, Deserialize)]
pub struct RatchetState {
    root_key: [u8; 32],

    dh_secret: [u8; 32],
    dh_pub: PublicKeyBytes,
    remote_dh_pub: Option<PublicKeyBytes>,

    send_ck: Option<[u8; 32]>,
    send_n: u32,
    recv_ck: Option<[u8; 32]>,
    recv_n: u32,
    prev_send_n: u32,

    skipped: Vec<SkippedKey>,
}

impl Drop for RatchetState {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.dh_secret.zeroize();
        if let Some(ref mut ck) = self.send_ck {
            ck.zeroize();
        }
        if let Some(ref mut ck) = self.recv_ck {
            ck.zeroize();
        }
    }
}

impl RatchetState {
    /// Initialize as the initiator (Alice).
    ///
    /// Her X3DH ephemeral keypair becomes the first ratchet keypair and the
    /// responder's signed prekey the first remote key; one DH + KDF_RK
    /// immediately yields the sending chain.
    pub fn init_initiator(
        shared_secret: [u8; 32],
        ephemeral: DhKeypair,
        remote_signed_prekey: PublicKeyBytes,
    ) -> Result<Self, RatchetError> {
        let dh_out = ephemeral.diffie_hellman(&remote_signed_prekey);
        let (root_key, send_ck) = kdf_rk(&shared_secret, &dh_out)?;

        Ok(Self {
            root_key,
            dh_secret: ephemeral.secret_key_bytes(),
            dh_pub: ephemeral.public_key_bytes(),
            remote_dh_pub: Some(remote_signed_prekey),
            send_ck: Some(send_ck),
            send_n: 0,
            recv_ck: None,
            recv_n: 0,
            prev_send_n: 0,
            skipped: Vec::new(),
        })
    }

    /// Initialize as the responder (Bob).
    ///
    /// His signed prekey is the first local ratchet keypair, the initiator's
    /// ephemeral the first remote key; the mirror DH yields the receiving
    /// chain. The sending chain stays unset until his first encrypt.
    pub fn init_responder(
        shared_secret: [u8; 32],
        signed_prekey: DhKeypair,
        remote_ephemeral: PublicKeyBytes,
    ) -> Result<Self, RatchetError> {
        let dh_out = signed_prekey.diffie_hellman(&remote_ephemeral);
        let (root_key, recv_ck) = kdf_rk(&shared_secret, &dh_out)?;

        Ok(Self {
            root_key,
            dh_secret: signed_prekey.secret_key_bytes(),
            dh_pub: signed_prekey.public_key_bytes(),
            remote_dh_pub: Some(remote_ephemeral),
            send_ck: None,
            send_n: 0,
            recv_ck: Some(recv_ck),
            recv_n: 0,
            prev_send_n: 0,
            skipped: Vec::new(),
        })
    }

    /// Encrypt a plaintext into a complete ratchet frame.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, RatchetError> {
        // A responder that has never sent performs a sender-side DH ratchet
        // to establish its sending chain.
        if self.send_ck.is_none() {
            let remote = self.remote_dh_pub.ok_or(RatchetError::NoRemoteKey)?;
            let fresh = DhKeypair::generate();
            let dh_out = fresh.diffie_hellman(&remote);
            let (root_key, send_ck) = kdf_rk(&self.root_key, &dh_out)?;
            self.root_key = root_key;
            self.send_ck = Some(send_ck);
            self.prev_send_n = self.send_n;
            self.send_n = 0;
            self.dh_secret = fresh.secret_key_bytes();
            self.dh_pub = fresh.public_key_bytes();
        }

        let ck = self.send_ck.as_ref().unwrap();
        let (next_ck, mk) = kdf_ck(ck)?;
        self.send_ck = Some(next_ck);

        let header = RatchetHeader {
            dh_pub: self.dh_pub,
            prev_chain_len: self.prev_send_n,
            msg_num: self.send_n,
        };
        self.send_n += 1;

        let ciphertext = aead::seal(&mk, plaintext).map_err(|_| RatchetError::KeyDerivation)?;

        let mut frame = Vec::with_capacity(2 + HEADER_LEN + ciphertext.len());
        frame.extend_from_slice(&(HEADER_LEN as u16).to_be_bytes());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(&ciphertext);
        Ok(frame)
    }

    /// Decrypt a ratchet frame.
    ///
    /// Works on a scratch copy: on any error the observable state is
    /// unchanged and the offending frame can simply be dropped.
    pub fn decrypt(&mut self, frame: &[u8]) -> Result<Vec<u8>, RatchetError> {
        let (header, ciphertext) = split_frame(frame)?;

        // Out-of-order arrival for which we already cached the key
        if let Some(idx) = self
            .skipped
            .iter()
            .position(|s| s.dh_pub == header.dh_pub && s.msg_num == header.msg_num)
        {
            let plaintext = aead::open(&self.skipped[idx].message_key, ciphertext)
                .map_err(|_| RatchetError::AuthenticationFailed)?;
            self.skipped.remove(idx);
            return Ok(plaintext);
        }

        let mut scratch = self.clone();
        let plaintext = scratch.decrypt_advance(&header, ciphertext)?;
        *self = scratch;
        Ok(plaintext)
    }

    fn decrypt_advance(
        &mut self,
        header: &RatchetHeader,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, RatchetError> {
        let is_new_remote = self.remote_dh_pub != Some(header.dh_pub);

        if is_new_remote {
            // Cache the tail of the outgoing chain we are abandoning
            self.skip_to(header.prev_chain_len)?;

            self.prev_send_n = self.send_n;
            self.send_n = 0;
            self.recv_n = 0;
            self.remote_dh_pub = Some(header.dh_pub);

            // Receiving step with the current local key
            let local = DhKeypair::from_secret_bytes(&self.dh_secret);
            let (root_key, recv_ck) = kdf_rk(&self.root_key, &local.diffie_hellman(&header.dh_pub))?;
            self.root_key = root_key;
            self.recv_ck = Some(recv_ck);

            // Sending step with a fresh local key
            let fresh = DhKeypair::generate();
            let (root_key, send_ck) = kdf_rk(&self.root_key, &fresh.diffie_hellman(&header.dh_pub))?;
            self.root_key = root_key;
            self.send_ck = Some(send_ck);
            self.dh_secret = fresh.secret_key_bytes();
            self.dh_pub = fresh.public_key_bytes();
        }

        self.skip_to(header.msg_num)?;

        let ck = self.recv_ck.as_ref().ok_or(RatchetError::NoReceivingChain)?;
        let (next_ck, mk) = kdf_ck(ck)?;
        let plaintext =
            aead::open(&mk, ciphertext).map_err(|_| RatchetError::AuthenticationFailed)?;
        self.recv_ck = Some(next_ck);
        self.recv_n += 1;
        Ok(plaintext)
    }

    /// Advance the receiving chain to `until`, caching every intermediate
    /// message key under the current remote ratchet key.
    fn skip_to(&mut self, until: u32) -> Result<(), RatchetError> {
        if until <= self.recv_n {
            return Ok(());
        }
        let count = (until - self.recv_n) as usize;
        if count > MAX_SKIPPED_KEYS || self.skipped.len() + count > MAX_SKIPPED_KEYS {
            return Err(RatchetError::SkippedKeyLimit(self.skipped.len() + count));
        }

        let ck = match self.recv_ck.as_ref() {
            Some(ck) => *ck,
            // No receiving chain yet: nothing to skip from
            None => return Err(RatchetError::NoReceivingChain),
        };
        let remote = self.remote_dh_pub.ok_or(RatchetError::NoRemoteKey)?;

        let mut ck = ck;
        while self.recv_n < until {
            let (next_ck, mk) = kdf_ck(&ck)?;
            self.skipped.push(SkippedKey {
                dh_pub: remote,
                msg_num: self.recv_n,
                message_key: mk,
            });
            ck = next_ck;
            self.recv_n += 1;
        }
        self.recv_ck = Some(ck);
        Ok(())
    }

    /// Our current ratchet public key (what the next header will carry)
    pub fn ratchet_public(&self) -> PublicKeyBytes {
        self.dh_pub
    }

    pub fn skipped_key_count(&self) -> usize {
        self.skipped.len()
    }

    /// Serialize for persistence as an opaque blob
    pub fn to_bytes(&self) -> Result<Vec<u8>, RatchetError> {
        bincode::serialize(self).map_err(|e| RatchetError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RatchetError> {
        bincode::deserialize(bytes).map_err(|e| RatchetError::Serialization(e.to_string()))
    }
}

/// KDF_RK: (root_key, dh_out) → (root_key', chain_key).
/// HKDF-SHA256 with the root key as salt, 64 bytes of output split in two.
fn kdf_rk(rk: &[u8; 32], dh_out: &[u8; 32]) -> Result<([u8; 32], [u8; 32]), RatchetError> {
    let hk = Hkdf::<Sha256>::new(Some(rk), dh_out);
    let mut okm = [0u8; 64];
    hk.expand(RATCHET_INFO, &mut okm)
        .map_err(|_| RatchetError::KeyDerivation)?;

    let mut new_rk = [0u8; 32];
    let mut ck = [0u8; 32];
    new_rk.copy_from_slice(&okm[..32]);
    ck.copy_from_slice(&okm[32..]);
    okm.zeroize();
    Ok((new_rk, ck))
}

/// KDF_CK: chain key → (chain_key', message_key).
/// message_key = HMAC-SHA256(ck, 0x01); ck' = HMAC-SHA256(ck, 0x02).
fn kdf_ck(ck: &[u8; 32]) -> Result<([u8; 32], [u8; 32]), RatchetError> {
    let mut mac = HmacSha256::new_from_slice(ck).map_err(|_| RatchetError::KeyDerivation)?;
    mac.update(&[0x01]);
    let mk: [u8; 32] = mac.finalize().into_bytes().into();

    let mut mac = HmacSha256::new_from_slice(ck).map_err(|_| RatchetError::KeyDerivation)?;
    mac.update(&[0x02]);
    let next_ck: [u8; 32] = mac.finalize().into_bytes().into();

    Ok((next_ck, mk))
}
