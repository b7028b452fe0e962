//! ZenTalk Relay
//!
//! TCP relay service: terminates peer handshakes, peels one onion layer per
//! forward, routes to the next relay or delivers to a locally connected
//! subscriber, queues for offline subscribers, and maintains the inter-relay
//! mesh plus the relay's own DHT descriptor.

mod handler;
mod mesh;
mod peer;
mod queue;

pub use handler::*;
pub use mesh::*;
pub use peer::*;
pub use queue::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Peer not registered")]
    NotRegistered,

    #[error("Onion peel failed: {0}")]
    Peel(String),

    #[error("Offline queue full")]
    QueueFull,

    #[error("Wire error: {0}")]
    Wire(#[from] zentalk_wire::WireError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("DHT error: {0}")]
    Dht(#[from] zentalk_dht::DhtError),
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl From<RelayError> for zentalk_core::ZentalkError {
    fn from(e: RelayError) -> Self {
        use zentalk_core::ZentalkError;
        match e {
            RelayError::Handshake(msg) => ZentalkError::Protocol(msg),
            RelayError::NotRegistered => {
                ZentalkError::NotConnected("peer not registered".to_string())
            }
            RelayError::Peel(_) => ZentalkError::Authentication,
            RelayError::QueueFull => ZentalkError::Exhausted("offline queue full".to_string()),
            RelayError::Wire(e) => e.into(),
            RelayError::Io(e) => ZentalkError::Transport(e.to_string()),
            RelayError::Crypto(msg) => ZentalkError::Session(msg),
            RelayError::Dht(e) => e.into(),
        }
    }
}
