//! DHT RPC messages.
//!
//! The envelope is JSON: {type, request_id, sender, payload, timestamp}; the
//! payload is an opaque byte blob (base64 in JSON) holding the typed body.
//! Responses echo the request_id so callers can correlate them.

use serde::{Deserialize, Serialize};
use zentalk_core::{unix_now, Contact, NodeId};

use crate::{DhtError, Result, SignedEntry};

/// RPC message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcType {
    Ping,
    Pong,
    Store,
    StoreAck,
    FindNode,
    FindNodeResponse,
    FindValue,
    FindValueResponse,
}

impl RpcType {
    /// True for message kinds that answer an outstanding request
    pub fn is_response(self) -> bool {
        matches!(
            self,
            RpcType::Pong
                | RpcType::StoreAck
                | RpcType::FindNodeResponse
                | RpcType::FindValueResponse
        )
    }
}

/// Wire envelope for every RPC message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: RpcType,
    pub request_id: String,
    pub sender: Contact,
    #[serde(with = "base64_payload")]
    pub payload: Vec<u8>,
    pub timestamp: u64,
}

impl Envelope {
    pub fn new(msg_type: RpcType, request_id: String, sender: Contact, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            request_id,
            sender,
            payload,
            timestamp: unix_now(),
        }
    }

    /// Fresh random request id (16 bytes, hex)
    pub fn fresh_request_id() -> String {
        hex::encode(zentalk_core::random_bytes::<16>())
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| DhtError::Serialization(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| DhtError::Serialization(e.to_string()))
    }
}

/// STORE request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorePayload {
    pub entry: SignedEntry,
}

/// STORE_ACK body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreAckPayload {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// FIND_NODE request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindNodePayload {
    pub target: NodeId,
}

/// FIND_NODE response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindNodeResponsePayload {
    pub contacts: Vec<Contact>,
}

/// FIND_VALUE request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindValuePayload {
    pub key: NodeId,
}

/// FIND_VALUE response: the value when found, closer contacts otherwise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindValueResponsePayload {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_base64")]
    pub value: Option<Vec<u8>>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
}

pub fn encode_body<T: Serialize>(body: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| DhtError::Serialization(e.to_string()))
}

pub fn decode_body<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| DhtError::Serialization(e.to_string()))
}

mod base64_payload {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

mod opt_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        opt.map(|s| STANDARD.decode(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zentalk_crypto::SigningKeypair;

    fn sender() -> Contact {
        Contact::new(NodeId::random(), "127.0.0.1:9000".parse().unwrap())
    }

    #[test]
    fn test_envelope_roundtrip() {
        let env = Envelope::new(
            RpcType::Ping,
            Envelope::fresh_request_id(),
            sender(),
            vec![],
        );
        let restored = Envelope::from_json(&env.to_json().unwrap()).unwrap();
        assert_eq!(restored, env);
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(Envelope::fresh_request_id(), Envelope::fresh_request_id());
    }

    #[test]
    fn test_response_classification() {
        assert!(!RpcType::Ping.is_response());
        assert!(!RpcType::Store.is_response());
        assert!(!RpcType::FindNode.is_response());
        assert!(!RpcType::FindValue.is_response());
        assert!(RpcType::Pong.is_response());
        assert!(RpcType::StoreAck.is_response());
        assert!(RpcType::FindNodeResponse.is_response());
        assert!(RpcType::FindValueResponse.is_response());
    }

    #[test]
    fn test_store_payload_roundtrip() {
        let signing = SigningKeypair::generate();
        let entry = SignedEntry::sign(&signing, NodeId::random(), b"v".to_vec(), 60);
        let body = StorePayload { entry };
        let restored: StorePayload = decode_body(&encode_body(&body).unwrap()).unwrap();
        assert_eq!(restored, body);
    }

    #[test]
    fn test_find_value_response_variants() {
        let found = FindValueResponsePayload {
            found: true,
            value: Some(b"data".to_vec()),
            contacts: vec![],
        };
        let restored: FindValueResponsePayload =
            decode_body(&encode_body(&found).unwrap()).unwrap();
        assert_eq!(restored, found);

        let miss = FindValueResponsePayload {
            found: false,
            value: None,
            contacts: vec![sender()],
        };
        let restored: FindValueResponsePayload =
            decode_body(&encode_body(&miss).unwrap()).unwrap();
        assert_eq!(restored, miss);
    }

    #[test]
    fn test_garbage_envelope_rejected() {
        assert!(Envelope::from_json(b"not json").is_err());
        assert!(Envelope::from_json(b"{\"type\":\"warp\"}").is_err());
    }
}
