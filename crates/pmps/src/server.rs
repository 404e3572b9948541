//! Server state and the inbound-message pump.

use crate::config::ServerConfig;
use crate::dispatch::{self, Outbound};
use crate::error::ServerError;
use crate::store::{ChatStore, HistoryStore, SettingsStore, UserStore};
use pmp_common::addr;
use pmp_common::transport::{self, Inbound};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, warn};

/// Inbound messages buffered between the listener and the dispatcher.
const INBOUND_BUFFER: usize = 64;

/// Shared server state: configuration plus every store.
#[derive(Debug)]
pub struct ServerState {
    /// Validated runtime configuration.
    pub config: ServerConfig,
    /// Registered accounts.
    pub users: UserStore,
    /// Chat metadata.
    pub chats: ChatStore,
    /// Per-chat message history.
    pub history: HistoryStore,
    /// Per-user settings.
    pub settings: SettingsStore,
}

impl ServerState {
    /// Fresh state with empty stores.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            users: UserStore::new(),
            chats: ChatStore::new(),
            history: HistoryStore::new(),
            settings: SettingsStore::new(),
        }
    }
}

/// Runs the server until the listener stops.
///
/// # Errors
///
/// Returns an error if the accept loop fails.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), ServerError> {
    let (shutdown_tx, _) = watch::channel(());
    run_with_shutdown(listener, state, shutdown_tx).await
}

/// [`run`], stoppable through the given shutdown channel.
///
/// Messages are dispatched one at a time in arrival order; a handler
/// error is logged and never takes the server down.
///
/// # Errors
///
/// Returns an error if the accept loop fails.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown_tx: watch::Sender<()>,
) -> Result<(), ServerError> {
    let (tx, mut rx) = mpsc::channel(INBOUND_BUFFER);
    let listener_task = tokio::spawn(transport::run_listener(listener, tx, shutdown_tx));

    while let Some(inbound) = rx.recv().await {
        handle(&state, inbound).await;
    }

    listener_task
        .await
        .map_err(|e| ServerError::Io(std::io::Error::other(e)))??;
    Ok(())
}

async fn handle(state: &ServerState, inbound: Inbound) {
    let purpose = inbound.message.purpose;
    match dispatch::dispatch(state, &inbound.message) {
        Ok(replies) => {
            for reply in replies {
                deliver(state, reply).await;
            }
        }
        // A purpose the dispatcher refuses means the peer is speaking a
        // different protocol; log loud, drop the message, keep serving.
        Err(ServerError::UnknownPurpose(p)) => {
            error!(peer = %inbound.peer, purpose = ?p, "rejecting client-side purpose");
        }
        Err(e) => warn!(peer = %inbound.peer, purpose = ?purpose, "dispatch failed: {}", e),
    }
}

/// Sends one outbound message to the recipient's client-role port.
/// Delivery failure (peer offline, bad stored address) is logged, not
/// propagated; the triggering store effect already happened.
async fn deliver(state: &ServerState, outbound: Outbound) {
    let dotted = match addr::decode_ip_addr(&outbound.to) {
        Ok(dotted) => dotted,
        Err(e) => {
            warn!(to = %outbound.to, "undeliverable reply: {}", e);
            return;
        }
    };
    let ip: IpAddr = match dotted.parse() {
        Ok(ip) => ip,
        Err(e) => {
            warn!(to = %dotted, "undeliverable reply: {}", e);
            return;
        }
    };
    let dest = SocketAddr::new(ip, state.config.client_port);
    if let Err(e) = transport::send(&outbound.message, dest).await {
        warn!(%dest, purpose = ?outbound.message.purpose, "reply not delivered: {}", e);
    }
}
