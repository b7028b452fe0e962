use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::NodeId;

/// 32-byte public key
pub type PublicKeyBytes = [u8; 32];

/// 64-byte signature
pub type SignatureBytes = [u8; 64];

/// Number of bytes in a subscriber address
pub const ADDRESS_BYTES: usize = 20;

/// 20-byte subscriber address.
///
/// The all-zero address is reserved as the local-delivery sentinel at the
/// onion layer and never designates a real subscriber.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; ADDRESS_BYTES]);

impl Address {
    pub const ZERO: Address = Address([0u8; ADDRESS_BYTES]);

    /// Derive a subscriber address from an identity signing key
    /// (SHA-256 of the public key, truncated to 20 bytes).
    pub fn from_identity_key(signing_pub: &PublicKeyBytes) -> Self {
        let digest = Sha256::digest(signing_pub);
        let mut bytes = [0u8; ADDRESS_BYTES];
        bytes.copy_from_slice(&digest[..ADDRESS_BYTES]);
        Address(bytes)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; ADDRESS_BYTES] = bytes.try_into().ok()?;
        Some(Address(arr))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_BYTES] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// DHT key under which this subscriber's key bundle is published
    pub fn dht_key(&self) -> NodeId {
        NodeId::from_key_material(&self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).ok_or_else(|| serde::de::Error::custom("expected 40 hex chars"))
    }
}

/// 16-byte message identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub [u8; 16]);

impl MessageId {
    pub const ZERO: MessageId = MessageId([0u8; 16]);

    /// Generate a fresh random identifier
    pub fn random() -> Self {
        MessageId(*uuid::Uuid::new_v4().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", hex::encode(self.0))
    }
}

/// Kind of peer behind a relay connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientType {
    /// End-user subscriber
    User,
    /// Peer relay in the mesh
    Relay,
}

impl ClientType {
    pub fn to_u8(self) -> u8 {
        match self {
            ClientType::User => 0,
            ClientType::Relay => 1,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ClientType::User),
            1 => Some(ClientType::Relay),
            _ => None,
        }
    }
}

/// Content type carried inside a direct or group message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    Text,
    Image,
    File,
    Audio,
    Video,
}

impl ContentType {
    pub fn to_u8(self) -> u8 {
        match self {
            ContentType::Text => 0,
            ContentType::Image => 1,
            ContentType::File => 2,
            ContentType::Audio => 3,
            ContentType::Video => 4,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ContentType::Text),
            1 => Some(ContentType::Image),
            2 => Some(ContentType::File),
            3 => Some(ContentType::Audio),
            4 => Some(ContentType::Video),
            _ => None,
        }
    }
}

/// Random bytes helper for nonces and tokens
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::rngs::OsRng.fill_bytes(&mut out);
    out
}

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current unix time in milliseconds
pub fn unix_now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
