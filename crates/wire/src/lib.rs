//! ZenTalk Wire Protocol
//!
//! Fixed 32-byte framing header, typed big-endian payload codecs, fixed-cell
//! and random padding, and async frame I/O helpers. Everything on the wire is
//! big-endian; variable-length fields carry a u32 length prefix.

mod codec;
mod framing;
mod header;
mod padding;
mod payloads;
mod types;

pub use codec::*;
pub use framing::*;
pub use header::*;
pub use padding::*;
pub use payloads::*;
pub use types::*;
