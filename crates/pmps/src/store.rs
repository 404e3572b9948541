//! In-memory server stores.
//!
//! Everything is keyed through `DashMap`, so handlers touching different
//! users or chats never contend; only operations on the same key
//! serialize. Chats are keyed by the fingerprint of their display name,
//! decoupling what users see from the storage identifier.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pmp_common::addr::fingerprint;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Store-level failures. Uniqueness conflicts are *not* errors here; they
/// are ordinary outcomes converted into typed reply purposes upstream.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The named chat does not exist.
    #[error("unknown chat {0:?}")]
    UnknownChat(String),
    /// The named user is not a member of the chat.
    #[error("{username:?} is not a member of {chat_name:?}")]
    NotAMember {
        /// Chat that was addressed.
        chat_name: String,
        /// User that was expected to be a member.
        username: String,
    },
    /// A chat with this name already exists.
    #[error("chat {0:?} already exists")]
    ChatExists(String),
}

/// Result of a CREATE_USER attempt. Both the username and the address
/// must be free for the account to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateUserOutcome {
    /// Account created.
    Created,
    /// The username is already registered.
    UsernameTaken,
    /// The address is already registered to another account.
    AddressTaken,
}

/// One registered account.
#[derive(Debug, Clone)]
pub struct UserRecord {
    /// Unique username.
    pub username: String,
    /// 8-digit hex encoding of the user's address.
    pub addr_hex: String,
    /// 64-digit hex SHA-256 of the user's password.
    pub password_hash: String,
}

/// Username-keyed account store with a reverse address index.
#[derive(Debug, Default)]
pub struct UserStore {
    users: DashMap<String, UserRecord>,
    /// addr_hex → username, for address-uniqueness checks and lookups.
    addresses: DashMap<String, String>,
    /// Usernames in creation order; GET_ALL_USERNAMES replies in this
    /// order.
    order: Mutex<Vec<String>>,
}

impl UserStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new account if both the username and address are free.
    ///
    /// The username check wins when both are taken.
    pub fn create_user(
        &self,
        username: &str,
        addr_hex: &str,
        password_hash: &str,
    ) -> CreateUserOutcome {
        match self.users.entry(username.to_string()) {
            Entry::Occupied(_) => CreateUserOutcome::UsernameTaken,
            Entry::Vacant(user_slot) => match self.addresses.entry(addr_hex.to_string()) {
                Entry::Occupied(_) => CreateUserOutcome::AddressTaken,
                Entry::Vacant(addr_slot) => {
                    addr_slot.insert(username.to_string());
                    user_slot.insert(UserRecord {
                        username: username.to_string(),
                        addr_hex: addr_hex.to_string(),
                        password_hash: password_hash.to_string(),
                    });
                    self.order
                        .lock()
                        .expect("user order lock poisoned")
                        .push(username.to_string());
                    CreateUserOutcome::Created
                }
            },
        }
    }

    /// Whether a username is registered.
    #[must_use]
    pub fn username_exists(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    /// Whether an encoded address is registered.
    #[must_use]
    pub fn address_exists(&self, addr_hex: &str) -> bool {
        self.addresses.contains_key(addr_hex)
    }

    /// Constant-shape credential check.
    #[must_use]
    pub fn verify_credentials(&self, username: &str, password_hash: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|record| record.password_hash == password_hash)
    }

    /// The encoded address registered for a username.
    #[must_use]
    pub fn address_for_username(&self, username: &str) -> Option<String> {
        self.users.get(username).map(|record| record.addr_hex.clone())
    }

    /// Every username, in creation order.
    #[must_use]
    pub fn all_usernames(&self) -> Vec<String> {
        self.order
            .lock()
            .expect("user order lock poisoned")
            .clone()
    }
}

/// A chat's metadata, as stored and as returned by GET_CHAT_DATA.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRecord {
    /// Display name.
    pub chat_name: String,
    /// Chat kind (0 individual, 1 group).
    pub chat_type: u8,
    /// Chat public key as an `[e, n]` pair.
    pub public_key: [u64; 2],
    /// Member usernames.
    pub members: Vec<String>,
    /// Admin usernames.
    pub admins: Vec<String>,
    /// Per-member display nicknames; every member starts as their own
    /// username.
    pub nicknames: HashMap<String, String>,
}

/// Fingerprint-keyed chat metadata store.
#[derive(Debug, Default)]
pub struct ChatStore {
    chats: DashMap<String, ChatRecord>,
}

impl ChatStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a chat.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ChatExists`] if the name is taken.
    pub fn create_chat(
        &self,
        chat_name: &str,
        chat_type: u8,
        public_key: [u64; 2],
        members: Vec<String>,
        admins: Vec<String>,
    ) -> Result<(), StoreError> {
        match self.chats.entry(fingerprint(chat_name)) {
            Entry::Occupied(_) => Err(StoreError::ChatExists(chat_name.to_string())),
            Entry::Vacant(slot) => {
                let nicknames = members.iter().map(|m| (m.clone(), m.clone())).collect();
                slot.insert(ChatRecord {
                    chat_name: chat_name.to_string(),
                    chat_type,
                    public_key,
                    members,
                    admins,
                    nicknames,
                });
                Ok(())
            }
        }
    }

    /// A snapshot of a chat's metadata.
    #[must_use]
    pub fn chat_data(&self, chat_name: &str) -> Option<ChatRecord> {
        self.chats
            .get(&fingerprint(chat_name))
            .map(|entry| entry.value().clone())
    }

    fn with_chat<T>(
        &self,
        chat_name: &str,
        f: impl FnOnce(&mut ChatRecord) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        match self.chats.get_mut(&fingerprint(chat_name)) {
            Some(mut entry) => f(entry.value_mut()),
            None => Err(StoreError::UnknownChat(chat_name.to_string())),
        }
    }

    /// Sets a member's nickname.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] for an unknown chat or non-member.
    pub fn set_nickname(
        &self,
        chat_name: &str,
        username: &str,
        nickname: &str,
    ) -> Result<(), StoreError> {
        self.with_chat(chat_name, |chat| {
            if !chat.members.iter().any(|m| m == username) {
                return Err(StoreError::NotAMember {
                    chat_name: chat_name.to_string(),
                    username: username.to_string(),
                });
            }
            chat.nicknames
                .insert(username.to_string(), nickname.to_string());
            Ok(())
        })
    }

    /// Grants or revokes a member's admin privilege.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] for an unknown chat or non-member.
    pub fn set_privilege(
        &self,
        chat_name: &str,
        username: &str,
        is_admin: bool,
    ) -> Result<(), StoreError> {
        self.with_chat(chat_name, |chat| {
            if !chat.members.iter().any(|m| m == username) {
                return Err(StoreError::NotAMember {
                    chat_name: chat_name.to_string(),
                    username: username.to_string(),
                });
            }
            let already = chat.admins.iter().any(|a| a == username);
            if is_admin && !already {
                chat.admins.push(username.to_string());
            } else if !is_admin {
                chat.admins.retain(|a| a != username);
            }
            Ok(())
        })
    }

    /// Adds a member; a no-op if they already belong.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownChat`] for an unknown chat.
    pub fn add_member(&self, chat_name: &str, username: &str) -> Result<(), StoreError> {
        self.with_chat(chat_name, |chat| {
            if !chat.members.iter().any(|m| m == username) {
                chat.members.push(username.to_string());
                chat.nicknames
                    .insert(username.to_string(), username.to_string());
            }
            Ok(())
        })
    }

    /// Removes a member, their nickname, and any admin privilege.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] for an unknown chat or non-member.
    pub fn remove_member(&self, chat_name: &str, username: &str) -> Result<(), StoreError> {
        self.with_chat(chat_name, |chat| {
            if !chat.members.iter().any(|m| m == username) {
                return Err(StoreError::NotAMember {
                    chat_name: chat_name.to_string(),
                    username: username.to_string(),
                });
            }
            chat.members.retain(|m| m != username);
            chat.admins.retain(|a| a != username);
            chat.nicknames.remove(username);
            Ok(())
        })
    }

    /// Display names of every chat the user belongs to.
    #[must_use]
    pub fn chat_names_for_user(&self, username: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .chats
            .iter()
            .filter(|entry| entry.value().members.iter().any(|m| m == username))
            .map(|entry| entry.value().chat_name.clone())
            .collect();
        names.sort();
        names
    }
}

/// Fingerprint-keyed chat history: encoded message frames in arrival
/// order.
#[derive(Debug, Default)]
pub struct HistoryStore {
    tables: DashMap<String, Vec<Vec<u8>>>,
}

impl HistoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the history table for a new chat.
    pub fn create_table(&self, chat_name: &str) {
        self.tables.entry(fingerprint(chat_name)).or_default();
    }

    /// Appends an encoded message frame to a chat's history.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownChat`] if the chat has no table.
    pub fn append(&self, chat_name: &str, frame: Vec<u8>) -> Result<(), StoreError> {
        match self.tables.get_mut(&fingerprint(chat_name)) {
            Some(mut table) => {
                table.push(frame);
                Ok(())
            }
            None => Err(StoreError::UnknownChat(chat_name.to_string())),
        }
    }

    /// The last `count` frames of a chat, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownChat`] if the chat has no table.
    pub fn recent(&self, chat_name: &str, count: usize) -> Result<Vec<Vec<u8>>, StoreError> {
        match self.tables.get(&fingerprint(chat_name)) {
            Some(table) => {
                let start = table.len().saturating_sub(count);
                Ok(table[start..].to_vec())
            }
            None => Err(StoreError::UnknownChat(chat_name.to_string())),
        }
    }
}

/// Per-user settings (color and friends).
#[derive(Debug, Default)]
pub struct SettingsStore {
    settings: DashMap<String, HashMap<String, String>>,
}

impl SettingsStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores one setting for a user.
    pub fn set(&self, username: &str, key: &str, value: &str) {
        self.settings
            .entry(username.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Reads one setting for a user.
    #[must_use]
    pub fn get(&self, username: &str, key: &str) -> Option<String> {
        self.settings
            .get(username)
            .and_then(|map| map.get(key).cloned())
    }

    /// Snapshot of every setting a user has.
    #[must_use]
    pub fn all(&self, username: &str) -> HashMap<String, String> {
        self.settings
            .get(username)
            .map(|map| map.clone())
            .unwrap_or_default()
    }
}
