//! Big-endian cursor helpers shared by every payload codec.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    #[error("Frame too short: need {need} bytes, have {have}")]
    TooShort { need: usize, have: usize },

    #[error("Invalid magic: 0x{0:08X}")]
    InvalidMagic(u32),

    #[error("Unsupported version: 0x{0:04X}")]
    UnsupportedVersion(u16),

    #[error("Unknown message type: 0x{0:04X}")]
    UnknownType(u16),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Invalid field value: {0}")]
    InvalidField(&'static str),

    #[error("Trailing bytes after payload")]
    TrailingBytes,

    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, WireError>;

impl From<std::io::Error> for WireError {
    fn from(e: std::io::Error) -> Self {
        WireError::Io(e.to_string())
    }
}

impl From<WireError> for zentalk_core::ZentalkError {
    fn from(e: WireError) -> Self {
        use zentalk_core::ZentalkError;
        match e {
            WireError::InvalidMagic(_)
            | WireError::UnsupportedVersion(_)
            | WireError::PayloadTooLarge(_) => ZentalkError::Validation(e.to_string()),
            WireError::Io(msg) => ZentalkError::Transport(msg),
            other => ZentalkError::Decode(other.to_string()),
        }
    }
}

/// Sequential big-endian reader over a byte slice
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(WireError::TooShort {
                need: n,
                have: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let b = self.take(N)?;
        let mut arr = [0u8; N];
        arr.copy_from_slice(b);
        Ok(arr)
    }

    /// u32-length-prefixed byte field
    pub fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// u16-length-prefixed byte field
    pub fn bytes_u16(&mut self) -> Result<Vec<u8>> {
        let len = self.u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Remainder of the buffer, consuming it
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    /// Fail unless the whole buffer was consumed
    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(WireError::TrailingBytes);
        }
        Ok(())
    }
}

/// Sequential big-endian writer
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn raw(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// u32-length-prefixed byte field
    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.u32(v.len() as u32);
        self.buf.extend_from_slice(v);
        self
    }

    /// u16-length-prefixed byte field
    pub fn bytes_u16(&mut self, v: &[u8]) -> &mut Self {
        self.u16(v.len() as u16);
        self.buf.extend_from_slice(v);
        self
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}
