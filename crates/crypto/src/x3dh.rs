//! X3DH (Extended Triple Diffie-Hellman) key agreement.
//!
//! The initiator consumes the recipient's published key bundle and derives a
//! 32-byte shared secret from three (or four, with a one-time prekey) DH
//! outputs; the responder mirrors the computation from the initial message.
//!
//! See the Signal X3DH specification: <https://signal.org/docs/specifications/x3dh/>

use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use zentalk_core::{Address, PublicKeyBytes};

use crate::{DhKeypair, IdentityKeyPair, KeyBundle, OneTimePreKey, SignedPreKey};

/// HKDF info string for the shared-secret derivation
pub const X3DH_INFO: &[u8] = b"ZenTalk X3DH Key Agreement";

/// 4-byte ASCII marker prepended to an initial message on the wire
pub const X3DH_MARKER: &[u8; 4] = b"X3DH";

#[derive(Error, Debug)]
pub enum X3dhError {
    #[error("Signed prekey signature verification failed")]
    BadPrekeySignature,
    #[error("Referenced one-time prekey {0} is missing")]
    MissingOneTimePrekey(u32),
    #[error("Key derivation failed")]
    KeyDerivation,
    #[error("Malformed initial message")]
    MalformedInitialMessage,
}

/// First message of a session, announcing the initiator's key material.
///
/// Wire layout: sender_addr(20) ‖ identity_pub(32) ‖ ephemeral_pub(32) ‖
/// spk_id(u32 BE) ‖ opk_id(u32 BE, 0 = none) ‖ ciphertext(u32 len + bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialMessage {
    pub sender_address: Address,
    pub identity_pub: PublicKeyBytes,
    pub ephemeral_pub: PublicKeyBytes,
    pub signed_prekey_id: u32,
    /// 0 when no one-time prekey was consumed
    pub one_time_prekey_id: u32,
    /// First ratchet frame, encrypted under the freshly derived session
    pub ciphertext: Vec<u8>,
}

impl InitialMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20 + 32 + 32 + 4 + 4 + 4 + self.ciphertext.len());
        out.extend_from_slice(self.sender_address.as_bytes());
        out.extend_from_slice(&self.identity_pub);
        out.extend_from_slice(&self.ephemeral_pub);
        out.extend_from_slice(&self.signed_prekey_id.to_be_bytes());
        out.extend_from_slice(&self.one_time_prekey_id.to_be_bytes());
        out.extend_from_slice(&(self.ciphertext.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, X3dhError> {
        if buf.len() < 20 + 32 + 32 + 4 + 4 + 4 {
            return Err(X3dhError::MalformedInitialMessage);
        }
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&buf[0..20]);
        let mut identity_pub = [0u8; 32];
        identity_pub.copy_from_slice(&buf[20..52]);
        let mut ephemeral_pub = [0u8; 32];
        ephemeral_pub.copy_from_slice(&buf[52..84]);
        let signed_prekey_id = u32::from_be_bytes(buf[84..88].try_into().unwrap());
        let one_time_prekey_id = u32::from_be_bytes(buf[88..92].try_into().unwrap());
        let ct_len = u32::from_be_bytes(buf[92..96].try_into().unwrap()) as usize;
        if buf.len() != 96 + ct_len {
            return Err(X3dhError::MalformedInitialMessage);
        }
        Ok(Self {
            sender_address: Address(addr),
            identity_pub,
            ephemeral_pub,
            signed_prekey_id,
            one_time_prekey_id,
            ciphertext: buf[96..].to_vec(),
        })
    }

    /// Prefix with the 4-byte ASCII marker for transmission
    pub fn encode_marked(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 96 + self.ciphertext.len());
        out.extend_from_slice(X3DH_MARKER);
        out.extend_from_slice(&self.encode());
        out
    }

    /// Strip the marker if present; `None` when the bytes are not an
    /// initial message.
    pub fn decode_marked(buf: &[u8]) -> Option<Result<Self, X3dhError>> {
        if buf.len() < 4 || &buf[..4] != X3DH_MARKER {
            return None;
        }
        Some(Self::decode(&buf[4..]))
    }
}

/// Initiator side result: the shared secret plus everything needed to build
/// the initial message and seed the ratchet.
pub struct InitiatorAgreement {
    pub shared_secret: [u8; 32],
    pub ephemeral: DhKeypair,
    pub signed_prekey_id: u32,
    pub one_time_prekey_id: u32,
    /// The responder's signed-prekey public, seed for the ratchet remote key
    pub remote_signed_prekey: PublicKeyBytes,
}

/// Derive the shared secret as the initiator from a recipient's key bundle.
///
/// Verifies the signed-prekey signature, generates the ephemeral keypair,
/// and consumes the first advertised one-time prekey when one is present.
pub fn initiate(
    identity: &IdentityKeyPair,
    bundle: &KeyBundle,
) -> Result<InitiatorAgreement, X3dhError> {
    bundle.verify().map_err(|_| X3dhError::BadPrekeySignature)?;

    let ephemeral = DhKeypair::generate();
    let spk_pub = bundle.signed_prekey.public;

    let dh1 = identity.dh.diffie_hellman(&spk_pub);
    let dh2 = ephemeral.diffie_hellman(&bundle.identity_dh);
    let dh3 = ephemeral.diffie_hellman(&spk_pub);

    let opk = bundle.first_one_time();
    let dh4 = opk.map(|k| ephemeral.diffie_hellman(&k.public));

    let shared_secret = derive_shared(&dh1, &dh2, &dh3, dh4.as_ref())?;

    Ok(InitiatorAgreement {
        shared_secret,
        ephemeral,
        signed_prekey_id: bundle.signed_prekey.key_id,
        one_time_prekey_id: opk.map(|k| k.key_id).unwrap_or(0),
        remote_signed_prekey: spk_pub,
    })
}

/// Derive the shared secret as the responder from an initial message.
///
/// The caller resolves (and thereby consumes) the referenced one-time prekey
/// before calling; a referenced-but-missing prekey is its error to raise.
pub fn respond(
    identity: &IdentityKeyPair,
    signed_prekey: &SignedPreKey,
    one_time_prekey: Option<&OneTimePreKey>,
    msg: &InitialMessage,
) -> Result<[u8; 32], X3dhError> {
    if msg.one_time_prekey_id != 0 && one_time_prekey.is_none() {
        return Err(X3dhError::MissingOneTimePrekey(msg.one_time_prekey_id));
    }

    let dh1 = signed_prekey.keypair.diffie_hellman(&msg.identity_pub);
    let dh2 = identity.dh.diffie_hellman(&msg.ephemeral_pub);
    let dh3 = signed_prekey.keypair.diffie_hellman(&msg.ephemeral_pub);
    let dh4 = one_time_prekey.map(|k| k.keypair.diffie_hellman(&msg.ephemeral_pub));

    derive_shared(&dh1, &dh2, &dh3, dh4.as_ref())
}

/// shared_secret = HKDF-SHA256(salt = 32 zero bytes, ikm = DH1‖DH2‖DH3[‖DH4])
fn derive_shared(
    dh1: &[u8; 32],
    dh2: &[u8; 32],
    dh3: &[u8; 32],
    dh4: Option<&[u8; 32]>,
) -> Result<[u8; 32], X3dhError> {
    let mut ikm = Vec::with_capacity(128);
    ikm.extend_from_slice(dh1);
    ikm.extend_from_slice(dh2);
    ikm.extend_from_slice(dh3);
    if let Some(dh4) = dh4 {
        ikm.extend_from_slice(dh4);
    }

    let hk = Hkdf::<Sha256>::new(Some(&[0u8; 32]), &ikm);
    let mut okm = [0u8; 32];
    hk.expand(X3DH_INFO, &mut okm)
        .map_err(|_| X3dhError::KeyDerivation)?;
    Ok(okm)
}
