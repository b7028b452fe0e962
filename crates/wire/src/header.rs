//! Fixed 32-byte framing header.
//!
//! Layout (big-endian):
//! magic(4) ‖ version(2) ‖ type(2) ‖ length(4) ‖ flags(2) ‖ message_id(16) ‖ reserved(2)

use bitflags::bitflags;
use zentalk_core::MessageId;

use crate::{MessageType, Reader, Result, WireError, Writer};

/// Protocol magic: "ZTAL" in ASCII
pub const MAGIC: u32 = 0x5A54_414C;

/// Current protocol version
pub const VERSION: u16 = 0x0100;

/// Hard cap on a single frame payload
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

bitflags! {
    /// Frame flag bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u16 {
        const ENCRYPTED    = 0b0000_0001;
        const COMPRESSED   = 0b0000_0010;
        const FRAGMENTED   = 0b0000_0100;
        const URGENT       = 0b0000_1000;
        const REQUIRES_ACK = 0b0001_0000;
        const PADDED       = 0b0010_0000;
    }
}

/// Decoded framing header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: MessageType,
    /// Payload length in bytes (excludes the header itself)
    pub length: u32,
    pub flags: FrameFlags,
    pub message_id: MessageId,
}

impl FrameHeader {
    /// Serialized size in bytes
    pub const SIZE: usize = 32;

    pub fn new(msg_type: MessageType, length: u32, flags: FrameFlags, message_id: MessageId) -> Self {
        Self {
            msg_type,
            length,
            flags,
            message_id,
        }
    }

    /// Encode to the fixed 32-byte layout. Deterministic.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut w = Writer::with_capacity(Self::SIZE);
        w.u32(MAGIC)
            .u16(VERSION)
            .u16(self.msg_type.to_u16())
            .u32(self.length)
            .u16(self.flags.bits())
            .raw(self.message_id.as_bytes())
            .u16(0); // reserved
        let buf = w.into_vec();
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Decode and validate magic, version, type, and length bound.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(WireError::TooShort {
                need: Self::SIZE,
                have: buf.len(),
            });
        }
        let mut r = Reader::new(&buf[..Self::SIZE]);

        let magic = r.u32()?;
        if magic != MAGIC {
            return Err(WireError::InvalidMagic(magic));
        }
        let version = r.u16()?;
        if version != VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let msg_type = MessageType::from_u16(r.u16()?)?;
        let length = r.u32()?;
        if length as usize > MAX_PAYLOAD_LEN {
            return Err(WireError::PayloadTooLarge(length as usize));
        }
        let flags =
            FrameFlags::from_bits(r.u16()?).ok_or(WireError::InvalidField("flags"))?;
        let message_id = MessageId(r.array()?);
        let _reserved = r.u16()?;

        Ok(Self {
            msg_type,
            length,
            flags,
            message_id,
        })
    }
}
