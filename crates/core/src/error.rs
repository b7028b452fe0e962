use thiserror::Error;

/// Error taxonomy shared across the ZenTalk subsystems.
///
/// Subsystem crates define their own narrower enums and convert into this
/// one at the service boundary.
#[derive(Error, Debug)]
pub enum ZentalkError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Signature verification failed")]
    Signature,

    #[error("Authentication failed")]
    Authentication,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Expired")]
    Expired,

    #[error("Blacklisted")]
    Blacklisted,

    #[error("Exhausted: {0}")]
    Exhausted(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, ZentalkError>;
