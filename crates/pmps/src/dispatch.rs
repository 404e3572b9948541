//! Purpose-keyed dispatch.
//!
//! One inbound message maps to at most one store effect plus zero or more
//! outbound messages. The match over [`Purpose`] is exhaustive: adding a
//! purpose forces a decision here at compile time.

use crate::error::ServerError;
use crate::server::ServerState;
use crate::store::CreateUserOutcome;
use pmp_common::codec::{self, CodecError};
use pmp_common::payloads::{
    ChatMember, ChatMessagesRequest, CreateChat, Credentials, SetColor, SetNickname, SetPrivilege,
};
use pmp_common::{Data, Message, Purpose};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// Sender field the server writes on messages it originates.
pub const SERVER_SENDER: &str = "server";

/// An outbound message and the encoded address of its recipient.
#[derive(Debug)]
pub struct Outbound {
    /// Message to deliver.
    pub message: Message,
    /// Recipient as an 8-char encoded address.
    pub to: String,
}

impl Outbound {
    fn reply_to(requester: &str, purpose: Purpose, content: Data) -> Self {
        Self {
            message: Message::new(purpose, SERVER_SENDER, "", content),
            to: requester.to_string(),
        }
    }
}

fn parse_content<T: DeserializeOwned>(msg: &Message) -> Result<T, ServerError> {
    serde_json::from_slice(msg.content.as_bytes()).map_err(ServerError::payload(msg.purpose))
}

fn content_str(msg: &Message) -> Result<&str, ServerError> {
    std::str::from_utf8(msg.content.as_bytes())
        .map_err(|_| ServerError::Codec(CodecError::Utf8 { field: "content" }))
}

fn json_reply<T: serde::Serialize>(
    requester: &str,
    purpose: Purpose,
    value: &T,
) -> Result<Outbound, ServerError> {
    let json = serde_json::to_string(value).map_err(ServerError::payload(purpose))?;
    Ok(Outbound::reply_to(requester, purpose, Data::Command(json)))
}

/// Handles one inbound message against the server stores.
///
/// Returns the messages to send in response; an empty vector means the
/// purpose defines no reply.
///
/// # Errors
///
/// Returns [`ServerError`] for malformed payloads, store violations, or a
/// purpose the server has no handler for. Errors never mutate state
/// beyond the handler they occurred in.
pub fn dispatch(state: &ServerState, msg: &Message) -> Result<Vec<Outbound>, ServerError> {
    match msg.purpose {
        Purpose::Message => {
            state.history.append(&msg.chat_name, codec::encode(msg)?)?;
            debug!(chat = %msg.chat_name, sender = %msg.sender, "stored chat message");
            Ok(Vec::new())
        }

        Purpose::CreateUser => {
            let creds: Credentials = parse_content(msg)?;
            let outcome = state
                .users
                .create_user(&creds.username, &msg.sender, &creds.password_hash);
            let reply = match outcome {
                CreateUserOutcome::Created => {
                    info!(username = %creds.username, addr = %msg.sender, "user created");
                    Purpose::CreateUserDone
                }
                CreateUserOutcome::UsernameTaken => Purpose::CreateUserUsernameTaken,
                CreateUserOutcome::AddressTaken => Purpose::CreateUserIpTaken,
            };
            Ok(vec![Outbound::reply_to(&msg.sender, reply, Data::empty())])
        }

        Purpose::TestLogin => {
            let creds: Credentials = parse_content(msg)?;
            let reply = if state
                .users
                .verify_credentials(&creds.username, &creds.password_hash)
            {
                Purpose::TestLoginSuccess
            } else {
                Purpose::TestLoginFailure
            };
            Ok(vec![Outbound::reply_to(&msg.sender, reply, Data::empty())])
        }

        Purpose::CreateChat => {
            let req: CreateChat = parse_content(msg)?;
            state.chats.create_chat(
                &req.chat_name,
                req.chat_type,
                req.public_key,
                req.members,
                req.admins,
            )?;
            state.history.create_table(&req.chat_name);
            info!(chat = %req.chat_name, "chat created");
            Ok(Vec::new())
        }

        Purpose::GetUserChatNames => {
            let username = content_str(msg)?;
            let names = state.chats.chat_names_for_user(username);
            Ok(vec![json_reply(&msg.sender, msg.purpose, &names)?])
        }

        Purpose::SetColor => {
            let req: SetColor = parse_content(msg)?;
            state.settings.set(&req.username, "color", &req.color);
            Ok(Vec::new())
        }

        Purpose::GetSettings => {
            let username = content_str(msg)?;
            let settings = state.settings.all(username);
            Ok(vec![json_reply(&msg.sender, msg.purpose, &settings)?])
        }

        Purpose::GetAllUsernames => {
            let usernames = state.users.all_usernames();
            Ok(vec![json_reply(&msg.sender, msg.purpose, &usernames)?])
        }

        Purpose::GetIpAddr => {
            let username = content_str(msg)?;
            let addr_hex = state
                .users
                .address_for_username(username)
                .ok_or_else(|| ServerError::UnknownUser(username.to_string()))?;
            Ok(vec![json_reply(&msg.sender, msg.purpose, &addr_hex)?])
        }

        Purpose::GetChatData => {
            let chat = state
                .chats
                .chat_data(&msg.chat_name)
                .ok_or_else(|| crate::store::StoreError::UnknownChat(msg.chat_name.clone()))?;
            Ok(vec![json_reply(&msg.sender, msg.purpose, &chat)?])
        }

        Purpose::GetChatMessages => {
            // Each stored frame goes back as its own message; a single
            // bundled reply would not fit the content field.
            let req: ChatMessagesRequest = parse_content(msg)?;
            let count = req.num_messages.min(state.config.history_limit);
            let frames = state.history.recent(&req.chat_name, count)?;
            let mut replies = Vec::with_capacity(frames.len());
            for frame in frames {
                replies.push(Outbound {
                    message: codec::decode(&frame)?,
                    to: msg.sender.clone(),
                });
            }
            Ok(replies)
        }

        Purpose::SetNickname => {
            let req: SetNickname = parse_content(msg)?;
            state
                .chats
                .set_nickname(&req.chat_name, &req.username, &req.nickname)?;
            Ok(Vec::new())
        }

        Purpose::SetPrivilege => {
            let req: SetPrivilege = parse_content(msg)?;
            state
                .chats
                .set_privilege(&req.chat_name, &req.username, req.is_admin)?;
            Ok(Vec::new())
        }

        Purpose::AddUserToChat => {
            let req: ChatMember = parse_content(msg)?;
            state.chats.add_member(&req.chat_name, &req.username)?;
            Ok(Vec::new())
        }

        Purpose::RemoveUserFromChat => {
            let req: ChatMember = parse_content(msg)?;
            state.chats.remove_member(&req.chat_name, &req.username)?;
            info!(chat = %req.chat_name, username = %req.username, "member removed");
            // Tell the member, if we know where they live. An unregistered
            // member was still removed; there is just nowhere to notify.
            match state.users.address_for_username(&req.username) {
                Some(addr_hex) => Ok(vec![Outbound {
                    message: Message::new(
                        Purpose::RemoveUserFromChat,
                        SERVER_SENDER,
                        req.chat_name.clone(),
                        Data::Text(req.chat_name),
                    ),
                    to: addr_hex,
                }]),
                None => Ok(Vec::new()),
            }
        }

        // Handshakes are peer-to-peer and reply topics belong to clients.
        // Any of these reaching the server means the peer speaks a
        // different protocol, which is worth failing loudly over.
        Purpose::Key
        | Purpose::Exchange
        | Purpose::CreateUserDone
        | Purpose::CreateUserUsernameTaken
        | Purpose::CreateUserIpTaken
        | Purpose::TestLoginSuccess
        | Purpose::TestLoginFailure => Err(ServerError::UnknownPurpose(msg.purpose)),
    }
}
