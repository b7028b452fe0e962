//! Detached signing helpers for wire payloads.

use zentalk_core::{PublicKeyBytes, SignatureBytes};

use crate::{verify_signature, KeyError, SigningKeypair};

/// Sign a wire payload's signable bytes
pub fn sign_payload(keypair: &SigningKeypair, signable: &[u8]) -> Vec<u8> {
    keypair.sign(signable).to_vec()
}

/// Verify a wire payload signature carried as a length-prefixed byte field.
///
/// An empty signature field is rejected; anything that is not exactly 64
/// bytes is rejected before touching the verifier.
pub fn verify_payload(
    public_key: &PublicKeyBytes,
    signable: &[u8],
    signature: &[u8],
) -> Result<(), KeyError> {
    let sig: SignatureBytes = signature
        .try_into()
        .map_err(|_| KeyError::BadSignature)?;
    verify_signature(public_key, signable, &sig)
}
