//! ZenTalk DHT
//!
//! Kademlia over UDP: a 160-bucket routing table with the XOR metric,
//! TTL-bound local storage, signed value records that defend against
//! poisoning, and iterative FIND_NODE / FIND_VALUE lookups with α-parallel
//! probes and K-replicated stores.

mod entry;
mod node;
mod protocol;
mod routing;
mod storage;

pub use entry::*;
pub use node::*;
pub use protocol::*;
pub use routing::*;
pub use storage::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DhtError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Signature verification failed")]
    BadSignature,

    #[error("Entry expired")]
    Expired,

    #[error("Invalid entry field: {0}")]
    InvalidEntry(&'static str),

    #[error("RPC timeout")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Value not found")]
    NotFound,

    #[error("No replica acknowledged the store")]
    StoreFailed,
}

pub type Result<T> = std::result::Result<T, DhtError>;

impl From<std::io::Error> for DhtError {
    fn from(e: std::io::Error) -> Self {
        DhtError::Transport(e.to_string())
    }
}

impl From<DhtError> for zentalk_core::ZentalkError {
    fn from(e: DhtError) -> Self {
        use zentalk_core::ZentalkError;
        match e {
            DhtError::BadSignature => ZentalkError::Signature,
            DhtError::Expired => ZentalkError::Expired,
            DhtError::NotFound => ZentalkError::NotFound("dht value".to_string()),
            DhtError::Timeout => ZentalkError::Transport("rpc deadline exceeded".to_string()),
            DhtError::Transport(msg) => ZentalkError::Transport(msg),
            DhtError::StoreFailed => {
                ZentalkError::Exhausted("no replica acknowledged the store".to_string())
            }
            DhtError::Serialization(msg) => ZentalkError::Decode(msg),
            DhtError::InvalidEntry(field) => ZentalkError::Validation(field.to_string()),
        }
    }
}
