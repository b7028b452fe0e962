//! ZenTalk Cryptography
//!
//! Key material (long-term identity, signed and one-time prekeys), the X3DH
//! key agreement, the Double Ratchet, AES-256-GCM message encryption, and the
//! RSA(+AES hybrid) wrapper used at the onion boundary.

mod aead;
mod keys;
mod prekey;
mod ratchet;
mod rsa_wrap;
mod sign;
mod x3dh;

pub use aead::*;
pub use keys::*;
pub use prekey::*;
pub use ratchet::*;
pub use rsa_wrap::*;
pub use sign::*;
pub use x3dh::*;
