//! Common protocol types and utilities shared across the PMP stack.
//!
//! This crate provides:
//! - The message data model and purpose table ([`message`])
//! - Binary and JSON wire framing ([`codec`])
//! - Peer address encoding and fingerprints ([`addr`])
//! - The repeating-key XOR used for key wrapping ([`vernam`])
//! - Diffie-Hellman key agreement ([`exchange`])
//! - The per-chat asymmetric cipher ([`asym`])
//! - One-shot TCP transport ([`transport`])
//! - JSON control payload shapes ([`payloads`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod addr;
pub mod asym;
pub mod codec;
pub mod exchange;
pub mod message;
pub mod payloads;
pub mod transport;
pub mod types;
pub mod vernam;

pub use codec::CodecError;
pub use exchange::HandshakeError;
pub use message::{Data, Message, Purpose};
pub use transport::TransportError;
pub use types::ChatType;
