//! JSON control payloads carried inside message content.
//!
//! Field names here are the wire contract; serde renames pin the exact
//! JSON keys each purpose expects.

use crate::codec::CodecError;
use crate::vernam;
use serde::{Deserialize, Serialize};

/// CREATE_USER / TEST_LOGIN request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Requested (or claimed) username.
    pub username: String,
    /// SHA-256 fingerprint of the password, 64 hex digits.
    #[serde(rename = "passwordHash")]
    pub password_hash: String,
}

/// CREATE_CHAT request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateChat {
    /// Display name of the new chat.
    pub chat_name: String,
    /// Chat kind, see [`crate::types::ChatType`].
    pub chat_type: u8,
    /// Chat public key as an `[e, n]` pair.
    pub public_key: [u64; 2],
    /// Usernames of the initial members.
    pub members: Vec<String>,
    /// Usernames of the initial admins.
    pub admins: Vec<String>,
}

/// GET_CHAT_DATA reply body: a chat's stored metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatData {
    /// Display name.
    pub chat_name: String,
    /// Chat kind, see [`crate::types::ChatType`].
    pub chat_type: u8,
    /// Chat public key as an `[e, n]` pair.
    pub public_key: [u64; 2],
    /// Member usernames.
    pub members: Vec<String>,
    /// Admin usernames.
    pub admins: Vec<String>,
    /// Per-member display nicknames.
    pub nicknames: std::collections::HashMap<String, String>,
}

/// GET_CHAT_MESSAGES request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessagesRequest {
    /// Chat to read from.
    #[serde(rename = "chatName")]
    pub chat_name: String,
    /// How many of the most recent messages to return.
    #[serde(rename = "numMessages")]
    pub num_messages: usize,
}

/// SET_NICKNAME request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetNickname {
    /// Target chat.
    #[serde(rename = "chatName")]
    pub chat_name: String,
    /// Member whose nickname changes.
    pub username: String,
    /// New nickname.
    pub nickname: String,
}

/// SET_PRIVILEGE request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPrivilege {
    /// Target chat.
    #[serde(rename = "chatName")]
    pub chat_name: String,
    /// Member whose privilege changes.
    pub username: String,
    /// Whether the member becomes an admin.
    pub is_admin: bool,
}

/// ADD_USER_TO_CHAT / REMOVE_USER_FROM_CHAT request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMember {
    /// Target chat.
    #[serde(rename = "chatName")]
    pub chat_name: String,
    /// Member being added or removed.
    pub username: String,
}

/// SET_COLOR request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetColor {
    /// User whose setting changes.
    pub username: String,
    /// Color value to store.
    pub color: String,
}

/// KEY transfer body, wrapped with the stream cipher before it travels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyTransfer {
    /// Chat private key as a `[d, n]` pair.
    #[serde(rename = "privKey")]
    pub priv_key: [u64; 2],
    /// Chat the key belongs to.
    #[serde(rename = "chatName")]
    pub chat_name: String,
}

impl KeyTransfer {
    /// Wraps the payload with the shared secret: JSON, stream-ciphered,
    /// then hex-encoded so the result survives the zero-free binary frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if serialization fails.
    pub fn wrap(&self, secret: u64) -> Result<String, CodecError> {
        let json = serde_json::to_string(self)?;
        Ok(hex::encode(vernam::crypt(json.as_bytes(), secret)))
    }

    /// Reverses [`KeyTransfer::wrap`] with the same shared secret.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the hex, cipher output, or JSON is
    /// malformed (a wrong secret surfaces here as malformed JSON).
    pub fn unwrap_with(wrapped: &str, secret: u64) -> Result<Self, CodecError> {
        let cipher = hex::decode(wrapped)?;
        let plain = vernam::crypt(&cipher, secret);
        let json = String::from_utf8(plain).map_err(|_| CodecError::Utf8 {
            field: "key transfer",
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}
