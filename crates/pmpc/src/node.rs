//! The client node: listener pump, reply correlation, key agreement, and
//! chat key material.
//!
//! A node holds one pending-reply slot per purpose. Replies carry no
//! request identifier on the wire, so the purpose byte *is* the
//! correlation key; issuing a second request on a topic before the first
//! resolves displaces the older waiter.

use crate::config::ClientConfig;
use crate::error::ClientError;
use dashmap::DashMap;
use pmp_common::addr::{self, AddrError};
use pmp_common::asym::{self, PrivateKey, PublicKey};
use pmp_common::exchange::{parse_step, Session, StepPayload};
use pmp_common::payloads::{
    ChatData, ChatMember, ChatMessagesRequest, CreateChat, Credentials, KeyTransfer, SetColor,
    SetNickname, SetPrivilege,
};
use pmp_common::transport::{self, Inbound};
use pmp_common::types::ChatType;
use pmp_common::{Data, Message, Purpose};
use rand::rngs::OsRng;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Inbound messages buffered between the listener and the node.
const INBOUND_BUFFER: usize = 64;

/// Receiving ends handed to the caller of [`Node::new`]: decrypted chat
/// messages and the names of chats whose private key just arrived.
#[derive(Debug)]
pub struct Mailbox {
    /// Chat messages, decrypted where the node holds the chat key.
    pub inbox: mpsc::Receiver<Message>,
    /// Chat names for which a KEY transfer completed.
    pub keys: mpsc::Receiver<String>,
}

/// Client node state.
#[derive(Debug)]
pub struct Node {
    config: ClientConfig,
    addr_hex: String,
    username: RwLock<Option<String>>,
    /// One waiter per reply topic; a new request displaces the old waiter.
    pending: DashMap<Purpose, mpsc::Sender<Message>>,
    /// Initiator-side handshakes keyed by peer address, dropped on
    /// completion.
    sessions: DashMap<String, Session>,
    /// Agreed secrets keyed by peer address, consumed by one KEY transfer.
    secrets: DashMap<String, u64>,
    chat_privs: DashMap<String, PrivateKey>,
    chat_pubs: DashMap<String, PublicKey>,
    inbox_tx: mpsc::Sender<Message>,
    key_tx: mpsc::Sender<String>,
}

impl Node {
    /// Builds a node from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Addr`] if the advertised address does not
    /// encode.
    pub fn new(config: ClientConfig) -> Result<(Arc<Self>, Mailbox), ClientError> {
        let addr_hex = addr::encode_ip_addr(&config.advertise)?;
        let (inbox_tx, inbox) = mpsc::channel(INBOUND_BUFFER);
        let (key_tx, keys) = mpsc::channel(INBOUND_BUFFER);
        let node = Arc::new(Self {
            config,
            addr_hex,
            username: RwLock::new(None),
            pending: DashMap::new(),
            sessions: DashMap::new(),
            secrets: DashMap::new(),
            chat_privs: DashMap::new(),
            chat_pubs: DashMap::new(),
            inbox_tx,
            key_tx,
        });
        Ok((node, Mailbox { inbox, keys }))
    }

    /// This node's 8-char encoded address.
    #[must_use]
    pub fn addr_hex(&self) -> &str {
        &self.addr_hex
    }

    /// Runs the node until the listener stops.
    ///
    /// # Errors
    ///
    /// Returns an error if the accept loop fails.
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown_tx: watch::Sender<()>,
    ) -> Result<(), ClientError> {
        let (tx, mut rx) = mpsc::channel(INBOUND_BUFFER);
        let listener_task = tokio::spawn(transport::run_listener(listener, tx, shutdown_tx));

        while let Some(Inbound { message, peer }) = rx.recv().await {
            if let Err(e) = self.handle_inbound(message).await {
                warn!(%peer, "inbound message dropped: {}", e);
            }
        }

        listener_task
            .await
            .map_err(|e| ClientError::Io(std::io::Error::other(e)))??;
        Ok(())
    }

    // ── Inbound ─────────────────────────────────────────────────────

    async fn handle_inbound(&self, msg: Message) -> Result<(), ClientError> {
        match msg.purpose {
            Purpose::Exchange => self.handle_exchange(msg).await,
            Purpose::Key => self.handle_key(msg),
            Purpose::Message => self.handle_chat_message(msg).await,
            _ => {
                match self.pending.remove(&msg.purpose) {
                    Some((purpose, tx)) => {
                        if tx.send(msg).await.is_err() {
                            debug!(?purpose, "reply waiter already gone");
                        }
                    }
                    None => debug!(purpose = ?msg.purpose, "unsolicited reply ignored"),
                }
                Ok(())
            }
        }
    }

    async fn handle_exchange(&self, msg: Message) -> Result<(), ClientError> {
        let body = content_str(&msg)?;
        match parse_step(body)? {
            StepPayload::One(step1) => {
                let (session, step2) = Session::respond(&step1, &mut OsRng);
                if let Some(shared) = session.shared_secret() {
                    self.secrets.insert(msg.sender.clone(), shared);
                }
                let reply = Message::new(
                    Purpose::Exchange,
                    &self.addr_hex,
                    "",
                    Data::Command(
                        serde_json::to_string(&step2)
                            .map_err(ClientError::payload(Purpose::Exchange))?,
                    ),
                );
                self.send_to_peer_hex(&reply, &msg.sender).await?;
                info!(peer = %msg.sender, "key agreement answered");
                Ok(())
            }
            StepPayload::Two(step2) => {
                let Some((peer, mut session)) = self.sessions.remove(&msg.sender) else {
                    warn!(peer = %msg.sender, "step 2 with no open session");
                    return Ok(());
                };
                let shared = session.complete(&step2)?;
                self.secrets.insert(peer.clone(), shared);
                info!(%peer, "key agreement complete");
                Ok(())
            }
        }
    }

    fn handle_key(&self, msg: Message) -> Result<(), ClientError> {
        let Some((_, secret)) = self.secrets.remove(&msg.sender) else {
            return Err(ClientError::NoSecret(msg.sender));
        };
        let transfer = KeyTransfer::unwrap_with(content_str(&msg)?, secret)?;
        let chat_name = transfer.chat_name.clone();
        self.chat_privs
            .insert(chat_name.clone(), PrivateKey::from_pair(transfer.priv_key));
        info!(chat = %chat_name, peer = %msg.sender, "chat key received");
        if self.key_tx.try_send(chat_name).is_err() {
            debug!("key notification dropped: no capacity or receiver gone");
        }
        Ok(())
    }

    async fn handle_chat_message(&self, msg: Message) -> Result<(), ClientError> {
        let delivered = if msg.is_encrypted {
            match self.chat_privs.get(&msg.chat_name) {
                Some(key) => match asym::decrypt(&msg, key.value()) {
                    Ok(plain) => plain,
                    Err(e) => {
                        warn!(chat = %msg.chat_name, "leaving message encrypted: {}", e);
                        msg
                    }
                },
                None => {
                    warn!(chat = %msg.chat_name, "no chat key, leaving message encrypted");
                    msg
                }
            }
        } else {
            msg
        };
        if self.inbox_tx.send(delivered).await.is_err() {
            debug!("inbound message dropped: inbox receiver gone");
        }
        Ok(())
    }

    // ── Reply correlation ───────────────────────────────────────────

    /// Sends `msg` to the server and waits for a reply on any of `topics`.
    async fn request(&self, msg: Message, topics: &[Purpose]) -> Result<Message, ClientError> {
        let (tx, mut rx) = mpsc::channel(1);
        for &topic in topics {
            self.pending.insert(topic, tx.clone());
        }
        drop(tx);

        if let Err(e) = transport::send(&msg, self.config.server).await {
            for topic in topics {
                self.pending.remove(topic);
            }
            return Err(e.into());
        }

        let window = Duration::from_millis(self.config.reply_timeout_ms);
        let outcome = tokio::time::timeout(window, rx.recv()).await;
        for topic in topics {
            self.pending.remove(topic);
        }
        match outcome {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(ClientError::Superseded(topics[0])),
            Err(_) => Err(ClientError::Timeout(topics[0])),
        }
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        msg: Message,
        topic: Purpose,
    ) -> Result<T, ClientError> {
        let reply = self.request(msg, &[topic]).await?;
        serde_json::from_slice(reply.content.as_bytes()).map_err(ClientError::payload(topic))
    }

    // ── Account operations ──────────────────────────────────────────

    /// Registers an account, returning the server's verdict purpose.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or reply timeout.
    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Purpose, ClientError> {
        let msg = self.credential_message(Purpose::CreateUser, username, password)?;
        let reply = self
            .request(
                msg,
                &[
                    Purpose::CreateUserDone,
                    Purpose::CreateUserUsernameTaken,
                    Purpose::CreateUserIpTaken,
                ],
            )
            .await?;
        if reply.purpose == Purpose::CreateUserDone {
            self.set_username(username);
        }
        Ok(reply.purpose)
    }

    /// Checks credentials against the server; `true` means they match.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or reply timeout.
    pub async fn login(&self, username: &str, password: &str) -> Result<bool, ClientError> {
        let msg = self.credential_message(Purpose::TestLogin, username, password)?;
        let reply = self
            .request(msg, &[Purpose::TestLoginSuccess, Purpose::TestLoginFailure])
            .await?;
        let ok = reply.purpose == Purpose::TestLoginSuccess;
        if ok {
            self.set_username(username);
        }
        Ok(ok)
    }

    fn credential_message(
        &self,
        purpose: Purpose,
        username: &str,
        password: &str,
    ) -> Result<Message, ClientError> {
        let creds = Credentials {
            username: username.to_string(),
            password_hash: addr::fingerprint(password),
        };
        let json = serde_json::to_string(&creds).map_err(ClientError::payload(purpose))?;
        Ok(Message::new(
            purpose,
            &self.addr_hex,
            "",
            Data::Command(json),
        ))
    }

    fn set_username(&self, username: &str) {
        if let Ok(mut slot) = self.username.write() {
            *slot = Some(username.to_string());
        }
    }

    fn sender_name(&self) -> String {
        self.username
            .read()
            .ok()
            .and_then(|slot| slot.clone())
            .unwrap_or_else(|| self.addr_hex.clone())
    }

    // ── Chat operations ─────────────────────────────────────────────

    /// Creates a chat on the server with a freshly generated keypair; the
    /// node keeps both halves of the key.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on keypair or transport failure.
    pub async fn create_chat(
        &self,
        chat_name: &str,
        chat_type: ChatType,
        members: Vec<String>,
    ) -> Result<(), ClientError> {
        let (public, private) = asym::generate_keypair(&mut OsRng)?;
        let admins = vec![self.sender_name()];
        let payload = CreateChat {
            chat_name: chat_name.to_string(),
            chat_type: chat_type.as_u8(),
            public_key: public.as_pair(),
            members,
            admins,
        };
        let json =
            serde_json::to_string(&payload).map_err(ClientError::payload(Purpose::CreateChat))?;
        let msg = Message::new(
            Purpose::CreateChat,
            &self.addr_hex,
            chat_name,
            Data::Command(json),
        );
        transport::send(&msg, self.config.server).await?;
        self.chat_pubs.insert(chat_name.to_string(), public);
        self.chat_privs.insert(chat_name.to_string(), private);
        Ok(())
    }

    /// Encrypts a line of text with the chat's public key and sends it to
    /// the server for persistence and delivery.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoChatKey`] if the node has never seen the
    /// chat's public key.
    pub async fn send_text(&self, chat_name: &str, text: &str) -> Result<(), ClientError> {
        let public = self
            .chat_pubs
            .get(chat_name)
            .map(|k| *k)
            .ok_or_else(|| ClientError::NoChatKey(chat_name.to_string()))?;
        let plain = Message::new(
            Purpose::Message,
            self.sender_name(),
            chat_name,
            Data::Text(text.to_string()),
        );
        let sealed = asym::encrypt(&plain, &public)?;
        transport::send(&sealed, self.config.server).await?;
        Ok(())
    }

    /// Asks the server to replay the last `count` messages of a chat; the
    /// replayed messages arrive through the [`Mailbox`] inbox.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure.
    pub async fn request_chat_messages(
        &self,
        chat_name: &str,
        count: usize,
    ) -> Result<(), ClientError> {
        let payload = ChatMessagesRequest {
            chat_name: chat_name.to_string(),
            num_messages: count,
        };
        let json = serde_json::to_string(&payload)
            .map_err(ClientError::payload(Purpose::GetChatMessages))?;
        let msg = Message::new(
            Purpose::GetChatMessages,
            &self.addr_hex,
            chat_name,
            Data::Command(json),
        );
        transport::send(&msg, self.config.server).await?;
        Ok(())
    }

    /// Fetches a chat's metadata and caches its public key for sending.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure, reply timeout, or a
    /// malformed reply.
    pub async fn get_chat_data(&self, chat_name: &str) -> Result<ChatData, ClientError> {
        let msg = Message::new(
            Purpose::GetChatData,
            &self.addr_hex,
            chat_name,
            Data::empty(),
        );
        let data: ChatData = self.request_json(msg, Purpose::GetChatData).await?;
        self.chat_pubs
            .insert(data.chat_name.clone(), PublicKey::from_pair(data.public_key));
        Ok(data)
    }

    /// Every registered username, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or reply timeout.
    pub async fn get_all_usernames(&self) -> Result<Vec<String>, ClientError> {
        let msg = Message::new(Purpose::GetAllUsernames, &self.addr_hex, "", Data::empty());
        self.request_json(msg, Purpose::GetAllUsernames).await
    }

    /// The encoded address registered for a username.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or reply timeout.
    pub async fn get_ip_addr(&self, username: &str) -> Result<String, ClientError> {
        let msg = Message::new(
            Purpose::GetIpAddr,
            &self.addr_hex,
            "",
            Data::Command(username.to_string()),
        );
        self.request_json(msg, Purpose::GetIpAddr).await
    }

    /// Chat names the user belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or reply timeout.
    pub async fn get_user_chat_names(&self, username: &str) -> Result<Vec<String>, ClientError> {
        let msg = Message::new(
            Purpose::GetUserChatNames,
            &self.addr_hex,
            "",
            Data::Command(username.to_string()),
        );
        self.request_json(msg, Purpose::GetUserChatNames).await
    }

    /// The user's stored settings.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or reply timeout.
    pub async fn get_settings(
        &self,
        username: &str,
    ) -> Result<HashMap<String, String>, ClientError> {
        let msg = Message::new(
            Purpose::GetSettings,
            &self.addr_hex,
            "",
            Data::Command(username.to_string()),
        );
        self.request_json(msg, Purpose::GetSettings).await
    }

    /// Stores a user's color setting.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure.
    pub async fn set_color(&self, username: &str, color: &str) -> Result<(), ClientError> {
        let payload = SetColor {
            username: username.to_string(),
            color: color.to_string(),
        };
        self.fire(Purpose::SetColor, "", &payload).await
    }

    /// Sets a member's nickname in a chat.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure.
    pub async fn set_nickname(
        &self,
        chat_name: &str,
        username: &str,
        nickname: &str,
    ) -> Result<(), ClientError> {
        let payload = SetNickname {
            chat_name: chat_name.to_string(),
            username: username.to_string(),
            nickname: nickname.to_string(),
        };
        self.fire(Purpose::SetNickname, chat_name, &payload).await
    }

    /// Grants or revokes a member's admin privilege.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure.
    pub async fn set_privilege(
        &self,
        chat_name: &str,
        username: &str,
        is_admin: bool,
    ) -> Result<(), ClientError> {
        let payload = SetPrivilege {
            chat_name: chat_name.to_string(),
            username: username.to_string(),
            is_admin,
        };
        self.fire(Purpose::SetPrivilege, chat_name, &payload).await
    }

    /// Adds a member to a chat.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure.
    pub async fn add_user_to_chat(
        &self,
        chat_name: &str,
        username: &str,
    ) -> Result<(), ClientError> {
        let payload = ChatMember {
            chat_name: chat_name.to_string(),
            username: username.to_string(),
        };
        self.fire(Purpose::AddUserToChat, chat_name, &payload).await
    }

    /// Removes a member from a chat; the server notifies them.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure.
    pub async fn remove_user_from_chat(
        &self,
        chat_name: &str,
        username: &str,
    ) -> Result<(), ClientError> {
        let payload = ChatMember {
            chat_name: chat_name.to_string(),
            username: username.to_string(),
        };
        self.fire(Purpose::RemoveUserFromChat, chat_name, &payload)
            .await
    }

    async fn fire<T: serde::Serialize>(
        &self,
        purpose: Purpose,
        chat_name: &str,
        payload: &T,
    ) -> Result<(), ClientError> {
        let json = serde_json::to_string(payload).map_err(ClientError::payload(purpose))?;
        let msg = Message::new(purpose, &self.addr_hex, chat_name, Data::Command(json));
        transport::send(&msg, self.config.server).await?;
        Ok(())
    }

    // ── Key agreement and key transfer ──────────────────────────────

    /// Opens a key agreement with a peer node at a dotted IPv4 address.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the address is malformed, no group
    /// parameters exist, or the peer is unreachable.
    pub async fn initiate_exchange(&self, peer: &str) -> Result<(), ClientError> {
        let peer_hex = addr::encode_ip_addr(peer)?;
        let (session, step1) = Session::initiate(&mut OsRng)?;
        let json =
            serde_json::to_string(&step1).map_err(ClientError::payload(Purpose::Exchange))?;
        let msg = Message::new(Purpose::Exchange, &self.addr_hex, "", Data::Command(json));
        self.sessions.insert(peer_hex.clone(), session);
        if let Err(e) = self.send_to_peer_hex(&msg, &peer_hex).await {
            self.sessions.remove(&peer_hex);
            return Err(e);
        }
        info!(%peer, "key agreement opened");
        Ok(())
    }

    /// The agreed secret with a peer (dotted address), if the handshake
    /// has completed and the secret has not been consumed.
    #[must_use]
    pub fn shared_secret_with(&self, peer: &str) -> Option<u64> {
        let peer_hex = addr::encode_ip_addr(peer).ok()?;
        self.secrets.get(&peer_hex).map(|s| *s)
    }

    /// Wraps a chat's private key with the secret agreed with `peer` and
    /// sends it; the secret is consumed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoSecret`] without a completed handshake and
    /// [`ClientError::NoChatKey`] if the node lacks the chat key.
    pub async fn share_chat_key(&self, peer: &str, chat_name: &str) -> Result<(), ClientError> {
        let peer_hex = addr::encode_ip_addr(peer)?;
        let private = self
            .chat_privs
            .get(chat_name)
            .map(|k| *k)
            .ok_or_else(|| ClientError::NoChatKey(chat_name.to_string()))?;
        let (_, secret) = self
            .secrets
            .remove(&peer_hex)
            .ok_or_else(|| ClientError::NoSecret(peer_hex.clone()))?;
        let transfer = KeyTransfer {
            priv_key: private.as_pair(),
            chat_name: chat_name.to_string(),
        };
        let msg = Message::new(
            Purpose::Key,
            &self.addr_hex,
            chat_name,
            Data::Text(transfer.wrap(secret)?),
        );
        self.send_to_peer_hex(&msg, &peer_hex).await?;
        info!(%peer, chat = %chat_name, "chat key shared");
        Ok(())
    }

    async fn send_to_peer_hex(&self, msg: &Message, peer_hex: &str) -> Result<(), ClientError> {
        let dotted = addr::decode_ip_addr(peer_hex)?;
        let ip: IpAddr = dotted
            .parse()
            .map_err(|_| AddrError::MalformedAddress(dotted.clone()))?;
        transport::send(msg, SocketAddr::new(ip, self.config.peer_port)).await?;
        Ok(())
    }
}

fn content_str(msg: &Message) -> Result<&str, ClientError> {
    std::str::from_utf8(msg.content.as_bytes()).map_err(|_| {
        ClientError::Codec(pmp_common::CodecError::Utf8 { field: "content" })
    })
}
