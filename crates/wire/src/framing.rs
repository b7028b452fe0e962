//! Async frame I/O over any byte stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zentalk_core::MessageId;

use crate::{FrameFlags, FrameHeader, MessageType, Result, WireError};

/// A complete frame: validated header plus payload bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_type: MessageType, flags: FrameFlags, payload: Vec<u8>) -> Self {
        Self {
            header: FrameHeader::new(msg_type, payload.len() as u32, flags, MessageId::random()),
            payload,
        }
    }

    pub fn with_id(
        msg_type: MessageType,
        flags: FrameFlags,
        message_id: MessageId,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            header: FrameHeader::new(msg_type, payload.len() as u32, flags, message_id),
            payload,
        }
    }

    /// Build a frame whose payload is padded to a fixed cell size; sets the
    /// PADDED flag. Panics in debug builds on types that must not be padded
    /// (keepalive and onion forwards).
    pub fn new_padded(msg_type: MessageType, flags: FrameFlags, payload: &[u8]) -> Self {
        debug_assert!(msg_type.allows_padding());
        Self::new(
            msg_type,
            flags | FrameFlags::PADDED,
            crate::pad_to_cell(payload),
        )
    }

    /// Payload with padding removed when the PADDED flag is set
    pub fn unpadded_payload(&self) -> Result<Vec<u8>> {
        if self.header.flags.contains(FrameFlags::PADDED) {
            crate::unpad(&self.payload)
        } else {
            Ok(self.payload.clone())
        }
    }

    /// Serialize header + payload into one buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FrameHeader::SIZE + self.payload.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Write one frame to the stream and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, frame: &Frame) -> Result<()> {
    stream.write_all(&frame.encode()).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one frame from the stream.
///
/// Validates the header before reading the payload so a bad peer cannot make
/// us allocate from a garbage length field.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Frame> {
    let mut header_buf = [0u8; FrameHeader::SIZE];
    stream.read_exact(&mut header_buf).await?;
    let header = FrameHeader::decode(&header_buf)?;

    let mut payload = vec![0u8; header.length as usize];
    stream.read_exact(&mut payload).await?;

    Ok(Frame { header, payload })
}

/// Frame length sanity check for callers that buffer manually.
pub fn frame_len(header: &FrameHeader) -> Result<usize> {
    let total = FrameHeader::SIZE + header.length as usize;
    if header.length as usize > crate::MAX_PAYLOAD_LEN {
        return Err(WireError::PayloadTooLarge(header.length as usize));
    }
    Ok(total)
}
