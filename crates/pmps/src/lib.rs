//! PMP dispatch server — stores accounts, chats, and history; answers
//! purpose-keyed requests over one-shot TCP connections.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI argument parsing and server configuration.
pub mod config;
/// Purpose-keyed message dispatch.
pub mod dispatch;
/// Error types for server operations.
pub mod error;
/// Server state and the inbound-message pump.
pub mod server;
/// In-memory account, chat, history, and settings stores.
pub mod store;

pub use server::{run, run_with_shutdown, ServerState};
