//! ZenTalk Core Types
//!
//! This crate defines the fundamental data structures used throughout ZenTalk:
//! node identifiers with the XOR metric, subscriber addresses, contacts,
//! relay descriptors, and the shared constants every subsystem plugs into.

pub mod config;
mod contact;
mod descriptor;
mod error;
mod node_id;
mod types;

pub use contact::*;
pub use descriptor::*;
pub use error::*;
pub use node_id::*;
pub use types::*;
