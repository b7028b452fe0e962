//! ZenTalk Client
//!
//! Pairwise secure sessions over the relay network: X3DH initiation from
//! DHT-discovered key bundles, Double-Ratchet framing, strictly ordered
//! per-peer delivery with deduplication and acknowledgements, circuit
//! selection with guard relays, and a reconnecting relay connection.

mod circuit;
mod client;
mod connection;
mod directory;
mod sequencer;
mod session;

pub use circuit::*;
pub use client::*;
pub use connection::*;
pub use directory::*;
pub use sequencer::*;
pub use session::*;

use thiserror::Error;
use zentalk_core::Address;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("No key bundle known for {0}")]
    NoBundle(Address),

    #[error("No session for this ciphertext")]
    NoSession,

    #[error("No healthy relays available")]
    Exhausted,

    #[error("Not connected to a relay")]
    NotConnected,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Wire error: {0}")]
    Wire(#[from] zentalk_wire::WireError),

    #[error("Onion error: {0}")]
    Onion(#[from] zentalk_onion::OnionError),

    #[error("DHT error: {0}")]
    Dht(#[from] zentalk_dht::DhtError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl From<ClientError> for zentalk_core::ZentalkError {
    fn from(e: ClientError) -> Self {
        use zentalk_core::ZentalkError;
        use zentalk_onion::OnionError;
        match e {
            ClientError::NoBundle(peer) => {
                ZentalkError::NotFound(format!("key bundle for {peer}"))
            }
            ClientError::NoSession => {
                ZentalkError::Session("no session for this ciphertext".to_string())
            }
            ClientError::Exhausted => {
                ZentalkError::Exhausted("no healthy relays".to_string())
            }
            ClientError::NotConnected => {
                ZentalkError::NotConnected("no relay connection".to_string())
            }
            ClientError::Session(msg) | ClientError::Crypto(msg) => ZentalkError::Session(msg),
            ClientError::Wire(e) => e.into(),
            ClientError::Onion(OnionError::DecryptionFailed)
            | ClientError::Onion(OnionError::IntegrityMismatch) => ZentalkError::Authentication,
            ClientError::Onion(e) => ZentalkError::Protocol(e.to_string()),
            ClientError::Dht(e) => e.into(),
            ClientError::Store(msg) => ZentalkError::Transport(msg),
            ClientError::Io(e) => ZentalkError::Transport(e.to_string()),
        }
    }
}
