//! One-shot TCP transport.
//!
//! Each node owns exactly one bound listening socket; a connection carries
//! exactly one binary-framed message and is then closed. Sending opens a
//! fresh connection to the destination's listening port, writes the frame,
//! and closes. No acknowledgement happens at this layer; replies, where a
//! purpose defines them, arrive as separate messages on the sender's own
//! listener.

use crate::codec::{self, CodecError, FRAME_LEN};
use crate::message::Message;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// How long a single accepted connection may take to deliver its frame.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced by the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The destination is not listening; surfaced to the caller so UI
    /// flows can react ("user is offline"), never swallowed.
    #[error("peer unreachable at {addr}: {source}")]
    Unreachable {
        /// Address the connection attempt targeted.
        addr: SocketAddr,
        /// Underlying connect error.
        source: std::io::Error,
    },
    /// I/O failure after the connection was established.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The outbound message cannot be framed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// A decoded inbound message plus the socket address it arrived from.
///
/// The source address identifies the TCP peer, not its listening port;
/// replies go to the address encoded in the message itself.
#[derive(Debug)]
pub struct Inbound {
    /// The decoded message.
    pub message: Message,
    /// Remote socket address of the one-shot connection.
    pub peer: SocketAddr,
}

/// Sends one message: connect, write the binary frame, close.
///
/// # Errors
///
/// Returns [`TransportError::Unreachable`] when the destination refuses
/// the connection, and I/O or codec errors otherwise.
pub async fn send(msg: &Message, addr: SocketAddr) -> Result<(), TransportError> {
    let bytes = codec::encode(msg)?;
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|source| TransportError::Unreachable { addr, source })?;
    stream.write_all(&bytes).await?;
    stream.shutdown().await?;
    debug!(%addr, purpose = ?msg.purpose, "sent message");
    Ok(())
}

/// Runs the accept loop until the `shutdown_tx` sender is dropped or
/// signalled, or until the `inbound` receiver goes away.
///
/// Each accepted connection is handled to completion before the next is
/// accepted: the payload is read to EOF, decoded, and forwarded. A
/// malformed or slow connection is dropped with a warning and never
/// affects node state.
///
/// # Errors
///
/// Returns an error only if the accept loop itself fails.
pub async fn run_listener(
    listener: TcpListener,
    inbound: mpsc::Sender<Inbound>,
    shutdown_tx: watch::Sender<()>,
) -> Result<(), TransportError> {
    let local_addr = listener.local_addr()?;
    info!("listening on {}", local_addr);
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        match read_one(stream, peer).await {
                            Ok(message) => {
                                if inbound.send(Inbound { message, peer }).await.is_err() {
                                    info!("inbound channel closed, stopping listener");
                                    return Ok(());
                                }
                            }
                            Err(e) => warn!(%peer, "dropping connection: {}", e),
                        }
                    }
                    Err(e) => warn!("failed to accept connection: {}", e),
                }
            }
            _ = shutdown_rx.changed() => {
                info!("shutdown signal received, stopping listener");
                return Ok(());
            }
        }
    }
}

/// Reads one connection to EOF and decodes the frame.
async fn read_one(stream: TcpStream, peer: SocketAddr) -> Result<Message, TransportError> {
    let mut buf = Vec::with_capacity(FRAME_LEN);
    // Cap the read one byte past a frame so an oversized payload decodes
    // to a length error instead of ballooning memory.
    let mut limited = stream.take(FRAME_LEN as u64 + 1);
    tokio::time::timeout(READ_TIMEOUT, limited.read_to_end(&mut buf))
        .await
        .map_err(|_| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("read from {peer} timed out"),
            ))
        })??;
    Ok(codec::decode(&buf)?)
}
