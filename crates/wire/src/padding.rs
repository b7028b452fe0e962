//! Payload padding.
//!
//! Fixed-cell padding hides message sizes behind a small set of cell sizes;
//! random padding adds 0–255 trailing bytes. Padded payloads carry the
//! original length as a u32 BE prefix and must travel with the PADDED flag.

use rand::RngCore;

use crate::{Result, WireError};

/// Cell sizes for fixed-cell padding, smallest first
pub const CELL_SIZES: [usize; 4] = [512, 1024, 4096, 8192];

/// Pad to the smallest cell that fits, or to the next multiple of 8192.
///
/// The returned buffer is `original length (u32 BE) ‖ payload ‖ zero fill`.
pub fn pad_to_cell(payload: &[u8]) -> Vec<u8> {
    let prefixed = payload.len() + 4;
    let target = CELL_SIZES
        .iter()
        .copied()
        .find(|cell| prefixed <= *cell)
        .unwrap_or_else(|| prefixed.div_ceil(8192) * 8192);

    let mut out = Vec::with_capacity(target);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out.resize(target, 0);
    out
}

/// Append 0–255 random bytes after the length-prefixed payload.
pub fn pad_random(payload: &[u8]) -> Vec<u8> {
    let mut rng = rand::rngs::OsRng;
    let extra = (rng.next_u32() & 0xFF) as usize;

    let mut out = Vec::with_capacity(4 + payload.len() + extra);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    let start = out.len();
    out.resize(start + extra, 0);
    rng.fill_bytes(&mut out[start..]);
    out
}

/// Strip padding: read the length prefix and truncate.
pub fn unpad(padded: &[u8]) -> Result<Vec<u8>> {
    if padded.len() < 4 {
        return Err(WireError::TooShort {
            need: 4,
            have: padded.len(),
        });
    }
    let len = u32::from_be_bytes([padded[0], padded[1], padded[2], padded[3]]) as usize;
    if padded.len() < 4 + len {
        return Err(WireError::InvalidField("padding length prefix"));
    }
    Ok(padded[4..4 + len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_to_smallest_cell() {
        assert_eq!(pad_to_cell(&[0u8; 100]).len(), 512);
        assert_eq!(pad_to_cell(&[0u8; 508]).len(), 512);
        assert_eq!(pad_to_cell(&[0u8; 509]).len(), 1024);
        assert_eq!(pad_to_cell(&[0u8; 1500]).len(), 4096);
        assert_eq!(pad_to_cell(&[0u8; 5000]).len(), 8192);
    }

    #[test]
    fn test_pad_beyond_largest_cell_uses_8k_multiples() {
        assert_eq!(pad_to_cell(&[0u8; 9000]).len(), 16384);
        assert_eq!(pad_to_cell(&[0u8; 16380]).len(), 16384);
        assert_eq!(pad_to_cell(&[0u8; 16381]).len(), 24576);
    }

    #[test]
    fn test_cell_roundtrip() {
        let payload = b"the quick brown fox".to_vec();
        let padded = pad_to_cell(&payload);
        assert_eq!(unpad(&padded).unwrap(), payload);
    }

    #[test]
    fn test_random_roundtrip() {
        let payload = vec![0xABu8; 300];
        for _ in 0..10 {
            let padded = pad_random(&payload);
            assert!(padded.len() >= 4 + payload.len());
            assert!(padded.len() <= 4 + payload.len() + 255);
            assert_eq!(unpad(&padded).unwrap(), payload);
        }
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let padded = pad_to_cell(&[]);
        assert_eq!(padded.len(), 512);
        assert!(unpad(&padded).unwrap().is_empty());
    }

    #[test]
    fn test_unpad_rejects_short_input() {
        assert!(matches!(unpad(&[1, 2]), Err(WireError::TooShort { .. })));
    }

    #[test]
    fn test_unpad_rejects_lying_prefix() {
        // Prefix claims 1000 bytes, buffer has 10
        let mut buf = 1000u32.to_be_bytes().to_vec();
        buf.extend_from_slice(&[0u8; 10]);
        assert!(matches!(
            unpad(&buf),
            Err(WireError::InvalidField("padding length prefix"))
        ));
    }
}
