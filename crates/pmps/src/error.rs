use pmp_common::addr::AddrError;
use pmp_common::{CodecError, Purpose, TransportError};
use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur while running the dispatch server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Frame encoding or decoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// Outbound send failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// The dispatcher has no handler for this purpose. A fatal protocol
    /// violation: it means the peer speaks a different protocol version.
    #[error("no handler for purpose {0:?}")]
    UnknownPurpose(Purpose),
    /// A structured payload did not parse for its purpose.
    #[error("malformed {purpose:?} payload: {source}")]
    Payload {
        /// Purpose whose payload was malformed.
        purpose: Purpose,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// The sender field does not decode to a peer address.
    #[error("bad sender address: {0}")]
    Addr(#[from] AddrError),
    /// Store-level failure (unknown chat, unknown member).
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A lookup named a user the store does not know.
    #[error("unknown user {0:?}")]
    UnknownUser(String),
}

impl ServerError {
    /// Helper to tag a JSON parse failure with the purpose it belongs to.
    pub(crate) fn payload(purpose: Purpose) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Payload { purpose, source }
    }
}
