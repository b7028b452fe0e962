//! 160-bit node identifiers and XOR distance arithmetic.
//!
//! The DHT key space is 160 bits. Distance between two identifiers is their
//! bitwise XOR interpreted as a big-endian integer; bucket placement uses the
//! number of leading zero bits of that distance.

use std::cmp::Ordering;
use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Number of bits in a node identifier
pub const ID_BITS: usize = 160;

/// Number of bytes in a node identifier
pub const ID_BYTES: usize = 20;

/// 160-bit DHT node identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; ID_BYTES]);

impl NodeId {
    /// All-zero identifier
    pub const ZERO: NodeId = NodeId([0u8; ID_BYTES]);

    /// Generate a random identifier
    pub fn random() -> Self {
        let mut bytes = [0u8; ID_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        NodeId(bytes)
    }

    /// Derive an identifier from arbitrary key material (SHA-256 truncated to 160 bits)
    pub fn from_key_material(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&digest[..ID_BYTES]);
        NodeId(bytes)
    }

    /// Parse from a hex string (40 hex chars)
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; ID_BYTES] = bytes.try_into().ok()?;
        Some(NodeId(arr))
    }

    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// XOR distance to another identifier
    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut out = [0u8; ID_BYTES];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    /// Length of the common prefix with `other`: the number of leading zero
    /// bits of the XOR distance (0..=160; 160 only for identical ids).
    pub fn common_prefix_len(&self, other: &NodeId) -> usize {
        self.distance(other).leading_zeros()
    }

    /// True if `self` is strictly closer to `target` than `other` is.
    pub fn is_closer_to(&self, target: &NodeId, other: &NodeId) -> bool {
        self.distance(target) < other.distance(target)
    }

    /// Total ordering of `a` and `b` by distance to `target`, ties broken by
    /// lexicographic id order so sorts are deterministic.
    pub fn cmp_distance(target: &NodeId, a: &NodeId, b: &NodeId) -> Ordering {
        a.distance(target)
            .cmp(&b.distance(target))
            .then_with(|| a.cmp(b))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(self.0))
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeId::from_hex(&s).ok_or_else(|| serde::de::Error::custom("expected 40 hex chars"))
    }
}

/// XOR distance between two node identifiers, compared big-endian
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance(pub [u8; ID_BYTES]);

impl Distance {
    /// Leading zero bits (0..=160)
    pub fn leading_zeros(&self) -> usize {
        let mut zeros = 0;
        for byte in &self.0 {
            if *byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros() as usize;
                break;
            }
        }
        zeros
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({})", hex::encode(self.0))
    }
}
