//! PMP client node — one-shot TCP messaging with purpose-keyed reply
//! correlation, key agreement, and per-chat encryption.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI argument parsing and client configuration.
pub mod config;
/// Error types for client operations.
pub mod error;
/// The client node and its mailbox.
pub mod node;

pub use error::ClientError;
pub use node::{Mailbox, Node};
