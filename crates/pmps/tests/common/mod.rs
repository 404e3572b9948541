use pmp_common::addr;
use pmp_common::transport::{self, Inbound};
use pmp_common::{Data, Message, Purpose};
use pmps::config::ServerConfig;
use pmps::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

pub fn test_config(listen: SocketAddr, client_port: u16) -> ServerConfig {
    ServerConfig {
        listen,
        client_port,
        history_limit: 200,
    }
}

/// A listening test peer. Bind clients before starting the server so the
/// server's reply port can be set to a port a client actually owns.
pub struct TestClient {
    pub addr_hex: String,
    pub port: u16,
    rx: mpsc::Receiver<Inbound>,
    _shutdown: watch::Sender<()>,
}

impl TestClient {
    /// Binds a reply listener on `ip:port` (port 0 picks a free port).
    pub async fn bind(ip: &str, port: u16) -> Self {
        let listener = TcpListener::bind((ip, port)).await.unwrap();
        let local = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, _) = watch::channel(());
        tokio::spawn(transport::run_listener(listener, tx, shutdown_tx.clone()));
        Self {
            addr_hex: addr::encode_ip_addr(ip).unwrap(),
            port: local.port(),
            rx,
            _shutdown: shutdown_tx,
        }
    }

    pub async fn send(&self, server: SocketAddr, purpose: Purpose, chat: &str, content: Data) {
        let msg = Message::new(purpose, &self.addr_hex, chat, content);
        transport::send(&msg, server).await.unwrap();
    }

    pub async fn recv(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timeout waiting for message")
            .expect("listener stopped")
            .message
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
            .map(|inbound| inbound.message)
    }
}

pub async fn start_server(client_port: u16) -> (SocketAddr, Arc<ServerState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(ServerState::new(test_config(addr, client_port)));

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = pmps::run(listener, state_clone).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}
