use pmp_common::addr::AddrError;
use pmp_common::asym::AsymError;
use pmp_common::{CodecError, HandshakeError, Purpose, TransportError};
use thiserror::Error;

/// Errors that can occur while running a client node.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Frame encoding or decoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// Outbound send failure, including an unreachable peer.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Key agreement failure; the session is abandoned.
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),
    /// Cipher failure.
    #[error("cipher error: {0}")]
    Asym(#[from] AsymError),
    /// A peer or sender address does not decode.
    #[error("bad address: {0}")]
    Addr(#[from] AddrError),
    /// No reply arrived on this topic within the configured window.
    #[error("timed out waiting for reply on {0:?}")]
    Timeout(Purpose),
    /// A newer request on the same topic displaced this one.
    #[error("reply on {0:?} superseded by a newer request")]
    Superseded(Purpose),
    /// No completed key agreement with this peer.
    #[error("no shared secret with peer {0:?}")]
    NoSecret(String),
    /// No key material held for this chat.
    #[error("no key for chat {0:?}")]
    NoChatKey(String),
    /// A reply payload did not parse for its purpose.
    #[error("malformed {purpose:?} payload: {source}")]
    Payload {
        /// Purpose whose payload was malformed.
        purpose: Purpose,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

impl ClientError {
    /// Helper to tag a JSON parse failure with the purpose it belongs to.
    pub(crate) fn payload(purpose: Purpose) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Payload { purpose, source }
    }
}
