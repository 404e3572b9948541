use pmp_common::types::ChatType;
use pmp_common::{Data, Message, Purpose};
use pmpc::config::ClientConfig;
use pmpc::{ClientError, Mailbox, Node};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

async fn start_server(client_port: u16) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(pmps::ServerState::new(pmps::config::ServerConfig {
        listen: addr,
        client_port,
        history_limit: 200,
    }));
    tokio::spawn(async move {
        if let Err(e) = pmps::run(listener, state).await {
            eprintln!("server error in test: {e}");
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

fn spawn_node(
    listener: TcpListener,
    ip: &str,
    server: SocketAddr,
    peer_port: u16,
    reply_timeout_ms: u64,
) -> (Arc<Node>, Mailbox) {
    let config = ClientConfig {
        listen: listener.local_addr().unwrap(),
        server,
        advertise: ip.to_string(),
        peer_port,
        reply_timeout_ms,
    };
    config.validate().unwrap();
    let (node, mailbox) = Node::new(config).unwrap();
    let (shutdown_tx, _) = watch::channel(());
    tokio::spawn(node.clone().run(listener, shutdown_tx));
    (node, mailbox)
}

async fn recv_inbox(mailbox: &mut Mailbox) -> Message {
    tokio::time::timeout(Duration::from_secs(5), mailbox.inbox.recv())
        .await
        .expect("timeout waiting for inbox message")
        .expect("inbox closed")
}

#[tokio::test]
async fn account_lifecycle_and_queries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = start_server(port).await;
    let (node, _mailbox) = spawn_node(listener, "127.0.0.1", server, port, 5000);

    assert_eq!(
        node.create_user("finn", "hunter2").await.unwrap(),
        Purpose::CreateUserDone
    );
    assert!(node.login("finn", "hunter2").await.unwrap());
    assert!(!node.login("finn", "wrong").await.unwrap());

    assert_eq!(node.get_all_usernames().await.unwrap(), vec!["finn"]);
    assert_eq!(node.get_ip_addr("finn").await.unwrap(), "7f000001");

    node.create_chat("general", ChatType::Group, vec!["finn".into()])
        .await
        .unwrap();
    // Membership queries go through the server's chat store.
    let mut names = Vec::new();
    for _ in 0..50 {
        names = node.get_user_chat_names("finn").await.unwrap();
        if !names.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(names, vec!["general"]);

    node.set_color("finn", "green").await.unwrap();
    let mut settings = std::collections::HashMap::new();
    for _ in 0..50 {
        settings = node.get_settings("finn").await.unwrap();
        if !settings.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(settings.get("color").map(String::as_str), Some("green"));
}

#[tokio::test]
async fn key_agreement_key_transfer_and_encrypted_messaging() {
    let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener_a.local_addr().unwrap().port();
    let listener_b = TcpListener::bind(("127.0.0.2", port)).await.unwrap();
    let server = start_server(port).await;

    let (node_a, mut mail_a) = spawn_node(listener_a, "127.0.0.1", server, port, 5000);
    let (node_b, mut mail_b) = spawn_node(listener_b, "127.0.0.2", server, port, 5000);

    assert_eq!(
        node_a.create_user("finn", "pw1").await.unwrap(),
        Purpose::CreateUserDone
    );
    assert_eq!(
        node_b.create_user("other", "pw2").await.unwrap(),
        Purpose::CreateUserDone
    );

    node_a
        .create_chat(
            "general",
            ChatType::Group,
            vec!["finn".into(), "other".into()],
        )
        .await
        .unwrap();

    // Key agreement: A initiates, B answers, both hold the same secret.
    node_a.initiate_exchange("127.0.0.2").await.unwrap();
    let mut pair = None;
    for _ in 0..100 {
        let a = node_a.shared_secret_with("127.0.0.2");
        let b = node_b.shared_secret_with("127.0.0.1");
        if let (Some(a), Some(b)) = (a, b) {
            pair = Some((a, b));
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let (secret_a, secret_b) = pair.expect("key agreement did not complete");
    assert_eq!(secret_a, secret_b);

    // Key transfer consumes the secret on both sides.
    node_a.share_chat_key("127.0.0.2", "general").await.unwrap();
    let chat = tokio::time::timeout(Duration::from_secs(5), mail_b.keys.recv())
        .await
        .expect("timeout waiting for chat key")
        .expect("key channel closed");
    assert_eq!(chat, "general");
    assert!(node_a.shared_secret_with("127.0.0.2").is_none());
    assert!(node_b.shared_secret_with("127.0.0.1").is_none());

    // B learns the chat's public key and sends an encrypted message.
    let data = node_b.get_chat_data("general").await.unwrap();
    assert_eq!(data.chat_name, "general");
    node_b.send_text("general", "hello from other").await.unwrap();

    // A replays history; the node decrypts with the chat key it created.
    let mut replayed = None;
    for _ in 0..50 {
        node_a.request_chat_messages("general", 10).await.unwrap();
        if let Ok(Some(msg)) =
            tokio::time::timeout(Duration::from_millis(200), mail_a.inbox.recv()).await
        {
            replayed = Some(msg);
            break;
        }
    }
    let msg = replayed.expect("no replayed message");
    assert_eq!(msg.sender, "other");
    assert_eq!(msg.chat_name, "general");
    assert!(!msg.is_encrypted);
    assert_eq!(msg.content, Data::Text("hello from other".into()));

    // B holds the transferred private key and can decrypt live traffic
    // of the same chat too.
    node_a.send_text("general", "reply from finn").await.unwrap();
    let mut echoed = None;
    for _ in 0..50 {
        node_b.request_chat_messages("general", 1).await.unwrap();
        if let Ok(Some(msg)) =
            tokio::time::timeout(Duration::from_millis(200), mail_b.inbox.recv()).await
        {
            echoed = Some(msg);
            break;
        }
    }
    let msg = echoed.expect("no echoed message");
    assert_eq!(msg.content, Data::Text("reply from finn".into()));
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = start_server(port).await;
    let (node, _mailbox) = spawn_node(listener, "127.0.0.1", server, port, 300);

    // The server drops requests it cannot answer, so the reply window
    // must close with a typed timeout.
    let err = node.get_chat_data("ghost").await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout(Purpose::GetChatData)));
}

#[tokio::test]
async fn unreachable_server_surfaces_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // Bind then drop to get a server port nothing listens on.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = dead.local_addr().unwrap();
    drop(dead);
    let (node, _mailbox) = spawn_node(listener, "127.0.0.1", server, port, 300);

    let err = node.create_user("finn", "pw").await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
}

#[tokio::test]
async fn sending_without_chat_key_is_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = start_server(port).await;
    let (node, _mailbox) = spawn_node(listener, "127.0.0.1", server, port, 300);

    let err = node.send_text("ghost", "hi").await.unwrap_err();
    assert!(matches!(err, ClientError::NoChatKey(_)));

    let err = node.share_chat_key("127.0.0.9", "ghost").await.unwrap_err();
    assert!(matches!(err, ClientError::NoChatKey(_)));
}
