//! Message-type space.
//!
//! Types are grouped by high byte: 0x00 connection, 0x01 relay, 0x02 user,
//! 0x03 profile/group management, 0x04 media, 0x05 system.

use crate::{Result, WireError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    // 0x00xx connection
    Handshake = 0x0001,
    HandshakeAck = 0x0002,
    Ping = 0x0003,
    Pong = 0x0004,
    Disconnect = 0x0005,

    // 0x01xx relay
    RelayForward = 0x0100,
    RelayAck = 0x0101,
    RelayError = 0x0102,

    // 0x02xx user
    DirectMessage = 0x0200,
    GroupMessage = 0x0201,
    TypingIndicator = 0x0202,
    ReadReceipt = 0x0203,
    Presence = 0x0204,

    // 0x03xx profile / group management
    ProfileUpdate = 0x0300,
    GroupUpdate = 0x0301,

    // 0x04xx media
    MediaChunk = 0x0400,

    // 0x05xx system
    SystemError = 0x0500,
    Ack = 0x0501,
    Nack = 0x0502,
}

impl MessageType {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Result<Self> {
        let t = match v {
            0x0001 => Self::Handshake,
            0x0002 => Self::HandshakeAck,
            0x0003 => Self::Ping,
            0x0004 => Self::Pong,
            0x0005 => Self::Disconnect,
            0x0100 => Self::RelayForward,
            0x0101 => Self::RelayAck,
            0x0102 => Self::RelayError,
            0x0200 => Self::DirectMessage,
            0x0201 => Self::GroupMessage,
            0x0202 => Self::TypingIndicator,
            0x0203 => Self::ReadReceipt,
            0x0204 => Self::Presence,
            0x0300 => Self::ProfileUpdate,
            0x0301 => Self::GroupUpdate,
            0x0400 => Self::MediaChunk,
            0x0500 => Self::SystemError,
            0x0501 => Self::Ack,
            0x0502 => Self::Nack,
            other => return Err(WireError::UnknownType(other)),
        };
        Ok(t)
    }

    /// Keepalive and already-onion-wrapped forwards must never be padded.
    pub fn allows_padding(self) -> bool {
        !matches!(self, Self::Ping | Self::Pong | Self::RelayForward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[MessageType] = &[
        MessageType::Handshake,
        MessageType::HandshakeAck,
        MessageType::Ping,
        MessageType::Pong,
        MessageType::Disconnect,
        MessageType::RelayForward,
        MessageType::RelayAck,
        MessageType::RelayError,
        MessageType::DirectMessage,
        MessageType::GroupMessage,
        MessageType::TypingIndicator,
        MessageType::ReadReceipt,
        MessageType::Presence,
        MessageType::ProfileUpdate,
        MessageType::GroupUpdate,
        MessageType::MediaChunk,
        MessageType::SystemError,
        MessageType::Ack,
        MessageType::Nack,
    ];

    #[test]
    fn test_u16_roundtrip() {
        for t in ALL {
            assert_eq!(MessageType::from_u16(t.to_u16()).unwrap(), *t);
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(matches!(
            MessageType::from_u16(0x7777),
            Err(WireError::UnknownType(0x7777))
        ));
    }

    #[test]
    fn test_type_space_grouping() {
        assert_eq!(MessageType::Handshake.to_u16() >> 8, 0x00);
        assert_eq!(MessageType::RelayForward.to_u16() >> 8, 0x01);
        assert_eq!(MessageType::DirectMessage.to_u16() >> 8, 0x02);
        assert_eq!(MessageType::ProfileUpdate.to_u16() >> 8, 0x03);
        assert_eq!(MessageType::MediaChunk.to_u16() >> 8, 0x04);
        assert_eq!(MessageType::Ack.to_u16() >> 8, 0x05);
    }

    #[test]
    fn test_padding_exclusions() {
        assert!(!MessageType::Ping.allows_padding());
        assert!(!MessageType::Pong.allows_padding());
        assert!(!MessageType::RelayForward.allows_padding());
        assert!(MessageType::DirectMessage.allows_padding());
    }
}
