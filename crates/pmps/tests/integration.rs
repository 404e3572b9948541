mod common;

use common::*;
use pmp_common::payloads::{ChatMessagesRequest, ChatMember, CreateChat, Credentials};
use pmp_common::{Data, Message, Purpose};
use std::time::Duration;

fn credentials(username: &str, password_hash: &str) -> Data {
    Data::Command(
        serde_json::to_string(&Credentials {
            username: username.into(),
            password_hash: password_hash.into(),
        })
        .unwrap(),
    )
}

fn create_chat(chat_name: &str, members: &[&str]) -> Data {
    Data::Command(
        serde_json::to_string(&CreateChat {
            chat_name: chat_name.into(),
            chat_type: 1,
            public_key: [3, 259_081],
            members: members.iter().map(|m| (*m).to_string()).collect(),
            admins: vec![members[0].to_string()],
        })
        .unwrap(),
    )
}

#[tokio::test]
async fn create_user_and_login() {
    let mut client = TestClient::bind("127.0.0.1", 0).await;
    let (server, _state) = start_server(client.port).await;

    client
        .send(server, Purpose::CreateUser, "", credentials("finn", "aa"))
        .await;
    assert_eq!(client.recv().await.purpose, Purpose::CreateUserDone);

    client
        .send(server, Purpose::TestLogin, "", credentials("finn", "aa"))
        .await;
    assert_eq!(client.recv().await.purpose, Purpose::TestLoginSuccess);

    client
        .send(server, Purpose::TestLogin, "", credentials("finn", "bb"))
        .await;
    assert_eq!(client.recv().await.purpose, Purpose::TestLoginFailure);
}

#[tokio::test]
async fn duplicate_username_is_rejected() {
    let mut client_a = TestClient::bind("127.0.0.1", 0).await;
    let (server, _state) = start_server(client_a.port).await;
    let mut client_b = TestClient::bind("127.0.0.2", client_a.port).await;

    client_a
        .send(server, Purpose::CreateUser, "", credentials("finn", "aa"))
        .await;
    assert_eq!(client_a.recv().await.purpose, Purpose::CreateUserDone);

    client_b
        .send(server, Purpose::CreateUser, "", credentials("finn", "bb"))
        .await;
    assert_eq!(
        client_b.recv().await.purpose,
        Purpose::CreateUserUsernameTaken
    );
}

#[tokio::test]
async fn duplicate_address_is_rejected() {
    let mut client = TestClient::bind("127.0.0.1", 0).await;
    let (server, _state) = start_server(client.port).await;

    client
        .send(server, Purpose::CreateUser, "", credentials("finn", "aa"))
        .await;
    assert_eq!(client.recv().await.purpose, Purpose::CreateUserDone);

    client
        .send(server, Purpose::CreateUser, "", credentials("other", "bb"))
        .await;
    assert_eq!(client.recv().await.purpose, Purpose::CreateUserIpTaken);
}

#[tokio::test]
async fn usernames_listed_in_creation_order() {
    let mut client_a = TestClient::bind("127.0.0.1", 0).await;
    let (server, _state) = start_server(client_a.port).await;
    let mut client_b = TestClient::bind("127.0.0.2", client_a.port).await;

    client_a
        .send(server, Purpose::CreateUser, "", credentials("finn", "aa"))
        .await;
    client_a.recv().await;
    client_b
        .send(server, Purpose::CreateUser, "", credentials("other", "bb"))
        .await;
    client_b.recv().await;

    client_a
        .send(server, Purpose::GetAllUsernames, "", Data::empty())
        .await;
    let reply = client_a.recv().await;
    assert_eq!(reply.purpose, Purpose::GetAllUsernames);
    let names: Vec<String> = serde_json::from_slice(reply.content.as_bytes()).unwrap();
    assert_eq!(names, vec!["finn", "other"]);
}

#[tokio::test]
async fn messages_persist_and_replay() {
    let mut client = TestClient::bind("127.0.0.1", 0).await;
    let (server, state) = start_server(client.port).await;

    client
        .send(
            server,
            Purpose::CreateChat,
            "general",
            create_chat("general", &["finn", "other"]),
        )
        .await;

    for text in ["one", "two", "three"] {
        let msg = Message::new(Purpose::Message, "finn", "general", Data::Text(text.into()));
        pmp_common::transport::send(&msg, server).await.unwrap();
    }

    // The stores are shared with the test, so wait for the last append
    // instead of sleeping blind.
    for _ in 0..50 {
        if state.history.recent("general", 100).is_ok_and(|h| h.len() == 3) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let request = Data::Command(
        serde_json::to_string(&ChatMessagesRequest {
            chat_name: "general".into(),
            num_messages: 2,
        })
        .unwrap(),
    );
    client
        .send(server, Purpose::GetChatMessages, "general", request)
        .await;

    let first = client.recv().await;
    let second = client.recv().await;
    assert_eq!(first.purpose, Purpose::Message);
    assert_eq!(first.sender, "finn");
    assert_eq!(first.content, Data::Text("two".into()));
    assert_eq!(second.content, Data::Text("three".into()));
}

#[tokio::test]
async fn removed_member_is_notified() {
    let mut client_a = TestClient::bind("127.0.0.1", 0).await;
    let (server, _state) = start_server(client_a.port).await;
    let mut client_b = TestClient::bind("127.0.0.2", client_a.port).await;

    client_a
        .send(server, Purpose::CreateUser, "", credentials("finn", "aa"))
        .await;
    client_a.recv().await;
    client_b
        .send(server, Purpose::CreateUser, "", credentials("other", "bb"))
        .await;
    client_b.recv().await;

    client_a
        .send(
            server,
            Purpose::CreateChat,
            "general",
            create_chat("general", &["finn", "other"]),
        )
        .await;

    let remove = Data::Command(
        serde_json::to_string(&ChatMember {
            chat_name: "general".into(),
            username: "other".into(),
        })
        .unwrap(),
    );
    client_a
        .send(server, Purpose::RemoveUserFromChat, "general", remove)
        .await;

    let notice = client_b.recv().await;
    assert_eq!(notice.purpose, Purpose::RemoveUserFromChat);
    assert_eq!(notice.sender, "server");
    assert_eq!(notice.chat_name, "general");
}

#[tokio::test]
async fn client_side_purpose_gets_no_reply_and_server_survives() {
    let mut client = TestClient::bind("127.0.0.1", 0).await;
    let (server, _state) = start_server(client.port).await;

    client
        .send(server, Purpose::Exchange, "", Data::Command("{}".into()))
        .await;
    assert!(client.recv_timeout(Duration::from_millis(300)).await.is_none());

    // Still serving afterwards.
    client
        .send(server, Purpose::CreateUser, "", credentials("finn", "aa"))
        .await;
    assert_eq!(client.recv().await.purpose, Purpose::CreateUserDone);
}
