//! Typed payload layouts for framed messages.
//!
//! Every layout is manual big-endian with u32 length prefixes unless the
//! field is noted otherwise. Decoders reject trailing bytes.

use zentalk_core::{Address, ClientType, ContentType, MessageId};

use crate::{Reader, Result, WireError, Writer};

/// Structure type tag carried by typing indicators
pub const TAG_TYPING: u8 = 0x01;
/// Structure type tag carried by read receipts
pub const TAG_READ_RECEIPT: u8 = 0x02;

/// Connection handshake, sent by the connecting peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub version: u16,
    pub address: Address,
    /// Peer's RSA public key, PEM bytes
    pub public_key: Vec<u8>,
    pub client_type: ClientType,
    pub timestamp: u64,
    pub signature: Vec<u8>,
}

impl Handshake {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u16(self.version)
            .raw(self.address.as_bytes())
            .bytes(&self.public_key)
            .u8(self.client_type.to_u8())
            .u64(self.timestamp)
            .bytes(&self.signature);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let version = r.u16()?;
        let address = Address(r.array()?);
        let public_key = r.bytes()?;
        let client_type =
            ClientType::from_u8(r.u8()?).ok_or(WireError::InvalidField("client_type"))?;
        let timestamp = r.u64()?;
        let signature = r.bytes()?;
        r.finish()?;
        Ok(Self {
            version,
            address,
            public_key,
            client_type,
            timestamp,
            signature,
        })
    }
}

/// Handshake acknowledgement carrying the relay's own key material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeAck {
    pub address: Address,
    /// Relay's RSA public key, PEM bytes
    pub public_key: Vec<u8>,
    pub timestamp: u64,
}

impl HandshakeAck {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.raw(self.address.as_bytes())
            .bytes(&self.public_key)
            .u64(self.timestamp);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let address = Address(r.array()?);
        let public_key = r.bytes()?;
        let timestamp = r.u64()?;
        r.finish()?;
        Ok(Self {
            address,
            public_key,
            timestamp,
        })
    }
}

/// One-to-one application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMessage {
    pub from: Address,
    pub to: Address,
    pub timestamp_ms: u64,
    pub sequence: u64,
    pub content_type: ContentType,
    /// Zero id when the message is not a reply
    pub reply_to: MessageId,
    pub content: Vec<u8>,
    pub signature: Vec<u8>,
}

impl DirectMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.raw(self.from.as_bytes())
            .raw(self.to.as_bytes())
            .u64(self.timestamp_ms)
            .u64(self.sequence)
            .u8(self.content_type.to_u8())
            .raw(self.reply_to.as_bytes())
            .bytes(&self.content)
            .bytes(&self.signature);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let from = Address(r.array()?);
        let to = Address(r.array()?);
        let timestamp_ms = r.u64()?;
        let sequence = r.u64()?;
        let content_type =
            ContentType::from_u8(r.u8()?).ok_or(WireError::InvalidField("content_type"))?;
        let reply_to = MessageId(r.array()?);
        let content = r.bytes()?;
        let signature = r.bytes()?;
        r.finish()?;
        Ok(Self {
            from,
            to,
            timestamp_ms,
            sequence,
            content_type,
            reply_to,
            content,
            signature,
        })
    }

    /// Bytes covered by the sender's Ed25519 signature: every field except
    /// the signature itself, in wire order.
    pub fn signable_data(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.raw(self.from.as_bytes())
            .raw(self.to.as_bytes())
            .u64(self.timestamp_ms)
            .u64(self.sequence)
            .u8(self.content_type.to_u8())
            .raw(self.reply_to.as_bytes())
            .bytes(&self.content);
        w.into_vec()
    }
}

/// Group fan-out message (per-recipient ciphertext delivery happens upstream)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMessage {
    pub from: Address,
    pub group_id: [u8; 32],
    pub timestamp_ms: u64,
    pub content_type: ContentType,
    pub content: Vec<u8>,
    pub signature: Vec<u8>,
}

impl GroupMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.raw(self.from.as_bytes())
            .raw(&self.group_id)
            .u64(self.timestamp_ms)
            .u8(self.content_type.to_u8())
            .bytes(&self.content)
            .bytes(&self.signature);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let from = Address(r.array()?);
        let group_id = r.array()?;
        let timestamp_ms = r.u64()?;
        let content_type =
            ContentType::from_u8(r.u8()?).ok_or(WireError::InvalidField("content_type"))?;
        let content = r.bytes()?;
        let signature = r.bytes()?;
        r.finish()?;
        Ok(Self {
            from,
            group_id,
            timestamp_ms,
            content_type,
            content,
            signature,
        })
    }

    /// Bytes covered by the sender's signature: everything except the
    /// signature itself, in wire order.
    pub fn signable_data(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.raw(self.from.as_bytes())
            .raw(&self.group_id)
            .u64(self.timestamp_ms)
            .u8(self.content_type.to_u8())
            .bytes(&self.content);
        w.into_vec()
    }
}

/// Positive acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub from: Address,
    pub to: Address,
    pub message_id: MessageId,
    pub sequence: u64,
    pub timestamp: u64,
}

impl Ack {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.raw(self.from.as_bytes())
            .raw(self.to.as_bytes())
            .raw(self.message_id.as_bytes())
            .u64(self.sequence)
            .u64(self.timestamp);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let out = Self {
            from: Address(r.array()?),
            to: Address(r.array()?),
            message_id: MessageId(r.array()?),
            sequence: r.u64()?,
            timestamp: r.u64()?,
        };
        r.finish()?;
        Ok(out)
    }
}

/// Negative acknowledgement: Ack fields plus an error code and message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nack {
    pub from: Address,
    pub to: Address,
    pub message_id: MessageId,
    pub sequence: u64,
    pub timestamp: u64,
    pub error_code: u8,
    pub error_message: String,
}

impl Nack {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.raw(self.from.as_bytes())
            .raw(self.to.as_bytes())
            .raw(self.message_id.as_bytes())
            .u64(self.sequence)
            .u64(self.timestamp)
            .u8(self.error_code)
            .bytes_u16(self.error_message.as_bytes());
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let from = Address(r.array()?);
        let to = Address(r.array()?);
        let message_id = MessageId(r.array()?);
        let sequence = r.u64()?;
        let timestamp = r.u64()?;
        let error_code = r.u8()?;
        let error_message = String::from_utf8(r.bytes_u16()?)
            .map_err(|_| WireError::InvalidField("error_message utf8"))?;
        r.finish()?;
        Ok(Self {
            from,
            to,
            message_id,
            sequence,
            timestamp,
            error_code,
            error_message,
        })
    }
}

/// Delivery status carried by a read receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Sent,
    Delivered,
    Read,
}

impl ReceiptStatus {
    pub fn to_u8(self) -> u8 {
        match self {
            ReceiptStatus::Sent => 0,
            ReceiptStatus::Delivered => 1,
            ReceiptStatus::Read => 2,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ReceiptStatus::Sent),
            1 => Some(ReceiptStatus::Delivered),
            2 => Some(ReceiptStatus::Read),
            _ => None,
        }
    }
}

/// Read receipt, tag 0x02
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub from: Address,
    pub to: Address,
    pub message_id: MessageId,
    pub timestamp: u64,
    pub status: ReceiptStatus,
}

impl ReadReceipt {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u8(TAG_READ_RECEIPT)
            .raw(self.from.as_bytes())
            .raw(self.to.as_bytes())
            .raw(self.message_id.as_bytes())
            .u64(self.timestamp)
            .u8(self.status.to_u8());
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        if r.u8()? != TAG_READ_RECEIPT {
            return Err(WireError::InvalidField("read receipt tag"));
        }
        let from = Address(r.array()?);
        let to = Address(r.array()?);
        let message_id = MessageId(r.array()?);
        let timestamp = r.u64()?;
        let status =
            ReceiptStatus::from_u8(r.u8()?).ok_or(WireError::InvalidField("receipt status"))?;
        r.finish()?;
        Ok(Self {
            from,
            to,
            message_id,
            timestamp,
            status,
        })
    }
}

/// Typing indicator, tag 0x01
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingIndicator {
    pub from: Address,
    pub to: Address,
    pub timestamp: u64,
    pub is_typing: bool,
}

impl TypingIndicator {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u8(TAG_TYPING)
            .raw(self.from.as_bytes())
            .raw(self.to.as_bytes())
            .u64(self.timestamp)
            .u8(u8::from(self.is_typing));
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        if r.u8()? != TAG_TYPING {
            return Err(WireError::InvalidField("typing tag"));
        }
        let from = Address(r.array()?);
        let to = Address(r.array()?);
        let timestamp = r.u64()?;
        let is_typing = match r.u8()? {
            0 => false,
            1 => true,
            _ => return Err(WireError::InvalidField("is_typing")),
        };
        r.finish()?;
        Ok(Self {
            from,
            to,
            timestamp,
            is_typing,
        })
    }
}

/// Presence announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    pub from: Address,
    pub timestamp: u64,
    pub online: bool,
}

impl Presence {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.raw(self.from.as_bytes())
            .u64(self.timestamp)
            .u8(u8::from(self.online));
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let from = Address(r.array()?);
        let timestamp = r.u64()?;
        let online = match r.u8()? {
            0 => false,
            1 => true,
            _ => return Err(WireError::InvalidField("online")),
        };
        r.finish()?;
        Ok(Self {
            from,
            timestamp,
            online,
        })
    }
}

/// Error reported upstream when a relay cannot route a forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayError {
    pub message_id: MessageId,
    pub error_code: u8,
    pub error_message: String,
}

impl RelayError {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.raw(self.message_id.as_bytes())
            .u8(self.error_code)
            .bytes_u16(self.error_message.as_bytes());
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let message_id = MessageId(r.array()?);
        let error_code = r.u8()?;
        let error_message = String::from_utf8(r.bytes_u16()?)
            .map_err(|_| WireError::InvalidField("error_message utf8"))?;
        r.finish()?;
        Ok(Self {
            message_id,
            error_code,
            error_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    #[test]
    fn test_handshake_roundtrip() {
        let hs = Handshake {
            version: 1,
            address: addr(1),
            public_key: b"-----BEGIN PUBLIC KEY-----".to_vec(),
            client_type: ClientType::User,
            timestamp: 1_700_000_000,
            signature: vec![9u8; 64],
        };
        assert_eq!(Handshake::decode(&hs.encode()).unwrap(), hs);
    }

    #[test]
    fn test_handshake_bad_client_type() {
        let hs = Handshake {
            version: 1,
            address: addr(1),
            public_key: vec![],
            client_type: ClientType::Relay,
            timestamp: 0,
            signature: vec![],
        };
        let mut bytes = hs.encode();
        // client_type sits after version(2) + address(20) + key len prefix(4)
        bytes[26] = 0x55;
        assert!(Handshake::decode(&bytes).is_err());
    }

    #[test]
    fn test_handshake_ack_roundtrip() {
        let ack = HandshakeAck {
            address: addr(2),
            public_key: b"PEM".to_vec(),
            timestamp: 77,
        };
        assert_eq!(HandshakeAck::decode(&ack.encode()).unwrap(), ack);
    }

    #[test]
    fn test_direct_message_roundtrip() {
        let dm = DirectMessage {
            from: addr(1),
            to: addr(2),
            timestamp_ms: 1_700_000_000_123,
            sequence: 42,
            content_type: ContentType::Text,
            reply_to: MessageId([5u8; 16]),
            content: b"hello there".to_vec(),
            signature: vec![7u8; 64],
        };
        assert_eq!(DirectMessage::decode(&dm.encode()).unwrap(), dm);
    }

    #[test]
    fn test_direct_message_signable_excludes_signature() {
        let mut dm = DirectMessage {
            from: addr(1),
            to: addr(2),
            timestamp_ms: 1,
            sequence: 1,
            content_type: ContentType::Text,
            reply_to: MessageId::ZERO,
            content: b"x".to_vec(),
            signature: vec![1u8; 64],
        };
        let signable = dm.signable_data();
        dm.signature = vec![2u8; 64];
        assert_eq!(signable, dm.signable_data());

        dm.sequence = 2;
        assert_ne!(signable, dm.signable_data());
    }

    #[test]
    fn test_direct_message_trailing_bytes_rejected() {
        let dm = DirectMessage {
            from: addr(1),
            to: addr(2),
            timestamp_ms: 1,
            sequence: 1,
            content_type: ContentType::Text,
            reply_to: MessageId::ZERO,
            content: vec![],
            signature: vec![],
        };
        let mut bytes = dm.encode();
        bytes.push(0);
        assert_eq!(DirectMessage::decode(&bytes), Err(WireError::TrailingBytes));
    }

    #[test]
    fn test_group_message_roundtrip() {
        let gm = GroupMessage {
            from: addr(3),
            group_id: [8u8; 32],
            timestamp_ms: 99,
            content_type: ContentType::Image,
            content: vec![1, 2, 3],
            signature: vec![4u8; 64],
        };
        assert_eq!(GroupMessage::decode(&gm.encode()).unwrap(), gm);
    }

    #[test]
    fn test_group_message_signable_excludes_signature() {
        let mut gm = GroupMessage {
            from: addr(3),
            group_id: [8u8; 32],
            timestamp_ms: 99,
            content_type: ContentType::Text,
            content: vec![1, 2, 3],
            signature: vec![4u8; 64],
        };
        let signable = gm.signable_data();
        gm.signature = vec![5u8; 64];
        assert_eq!(signable, gm.signable_data());
        gm.content = vec![9];
        assert_ne!(signable, gm.signable_data());
    }

    #[test]
    fn test_ack_roundtrip() {
        let ack = Ack {
            from: addr(1),
            to: addr(2),
            message_id: MessageId([3u8; 16]),
            sequence: 7,
            timestamp: 1_700_000_000,
        };
        let bytes = ack.encode();
        assert_eq!(bytes.len(), 20 + 20 + 16 + 8 + 8);
        assert_eq!(Ack::decode(&bytes).unwrap(), ack);
    }

    #[test]
    fn test_nack_roundtrip() {
        let nack = Nack {
            from: addr(1),
            to: addr(2),
            message_id: MessageId([3u8; 16]),
            sequence: 7,
            timestamp: 123,
            error_code: 4,
            error_message: "no session".to_string(),
        };
        assert_eq!(Nack::decode(&nack.encode()).unwrap(), nack);
    }

    #[test]
    fn test_read_receipt_roundtrip() {
        for status in [ReceiptStatus::Sent, ReceiptStatus::Delivered, ReceiptStatus::Read] {
            let rr = ReadReceipt {
                from: addr(1),
                to: addr(2),
                message_id: MessageId([9u8; 16]),
                timestamp: 55,
                status,
            };
            let bytes = rr.encode();
            assert_eq!(bytes[0], TAG_READ_RECEIPT);
            assert_eq!(ReadReceipt::decode(&bytes).unwrap(), rr);
        }
    }

    #[test]
    fn test_read_receipt_bad_status() {
        let rr = ReadReceipt {
            from: addr(1),
            to: addr(2),
            message_id: MessageId([9u8; 16]),
            timestamp: 55,
            status: ReceiptStatus::Read,
        };
        let mut bytes = rr.encode();
        *bytes.last_mut().unwrap() = 9;
        assert!(ReadReceipt::decode(&bytes).is_err());
    }

    #[test]
    fn test_typing_indicator_roundtrip() {
        let ti = TypingIndicator {
            from: addr(1),
            to: addr(2),
            timestamp: 10,
            is_typing: true,
        };
        let bytes = ti.encode();
        assert_eq!(bytes[0], TAG_TYPING);
        assert_eq!(TypingIndicator::decode(&bytes).unwrap(), ti);
    }

    #[test]
    fn test_tag_mismatch_rejected() {
        let ti = TypingIndicator {
            from: addr(1),
            to: addr(2),
            timestamp: 10,
            is_typing: false,
        };
        let bytes = ti.encode();
        // A typing payload is not a valid read receipt
        assert!(ReadReceipt::decode(&bytes).is_err());
    }

    #[test]
    fn test_presence_roundtrip() {
        let p = Presence {
            from: addr(4),
            timestamp: 88,
            online: true,
        };
        assert_eq!(Presence::decode(&p.encode()).unwrap(), p);
    }

    #[test]
    fn test_relay_error_roundtrip() {
        let re = RelayError {
            message_id: MessageId([1u8; 16]),
            error_code: 2,
            error_message: "next hop unreachable".to_string(),
        };
        assert_eq!(RelayError::decode(&re.encode()).unwrap(), re);
    }
}
