//! The message data model: purposes, tagged payloads, and the wire unit.

/// Protocol opcode on a [`Message`], doubling as the reply-topic identifier.
///
/// Explicit discriminants are the wire encoding; adding a purpose is a
/// compile-time-checked change (the codec and both dispatch tables match
/// exhaustively, no fallthrough default).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Purpose {
    /// Stream-cipher-wrapped private-key transfer for a chat.
    Key = 0,
    /// Diffie-Hellman handshake step (plaintext JSON payload).
    Exchange = 1,
    /// Account creation request.
    CreateUser = 2,
    /// Account created successfully.
    CreateUserDone = 3,
    /// Account creation rejected: username already taken.
    CreateUserUsernameTaken = 4,
    /// Account creation rejected: address already registered.
    CreateUserIpTaken = 5,
    /// New chat creation request.
    CreateChat = 6,
    /// Credential check request.
    TestLogin = 7,
    /// Credential check passed.
    TestLoginSuccess = 8,
    /// Credential check failed.
    TestLoginFailure = 9,
    /// List the chats a user belongs to.
    GetUserChatNames = 10,
    /// Store a user's color setting.
    SetColor = 11,
    /// Fetch a user's settings.
    GetSettings = 12,
    /// List every registered username.
    GetAllUsernames = 13,
    /// Look up the encoded address of a username.
    GetIpAddr = 14,
    /// Fetch a chat's metadata.
    GetChatData = 15,
    /// An ordinary chat message, persisted to history.
    Message = 16,
    /// Fetch the most recent messages of a chat.
    GetChatMessages = 17,
    /// Set a member's nickname in a chat.
    SetNickname = 18,
    /// Grant or revoke a member's admin privilege.
    SetPrivilege = 19,
    /// Add a member to a chat.
    AddUserToChat = 20,
    /// Remove a member from a chat (the member is notified).
    RemoveUserFromChat = 21,
}

impl Purpose {
    /// Wire byte for this purpose.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Purpose {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Key,
            1 => Self::Exchange,
            2 => Self::CreateUser,
            3 => Self::CreateUserDone,
            4 => Self::CreateUserUsernameTaken,
            5 => Self::CreateUserIpTaken,
            6 => Self::CreateChat,
            7 => Self::TestLogin,
            8 => Self::TestLoginSuccess,
            9 => Self::TestLoginFailure,
            10 => Self::GetUserChatNames,
            11 => Self::SetColor,
            12 => Self::GetSettings,
            13 => Self::GetAllUsernames,
            14 => Self::GetIpAddr,
            15 => Self::GetChatData,
            16 => Self::Message,
            17 => Self::GetChatMessages,
            18 => Self::SetNickname,
            19 => Self::SetPrivilege,
            20 => Self::AddUserToChat,
            21 => Self::RemoveUserFromChat,
            other => return Err(other),
        })
    }
}

/// Tagged message payload.
///
/// The integer tag is part of the wire format: 0 = opaque bytes,
/// 1 = text, 2 = command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Data {
    /// Raw bytes with no further interpretation.
    Opaque(Vec<u8>),
    /// Human-readable chat text.
    Text(String),
    /// Structured request payload (JSON or credential string).
    Command(String),
}

impl Data {
    /// Wire tag byte of this variant.
    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            Self::Opaque(_) => 0,
            Self::Text(_) => 1,
            Self::Command(_) => 2,
        }
    }

    /// Payload bytes of this variant.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Opaque(bytes) => bytes,
            Self::Text(s) | Self::Command(s) => s.as_bytes(),
        }
    }

    /// Rebuild a variant from a wire tag and payload bytes.
    ///
    /// Returns `Err(tag)` for an unknown tag; text variants must be valid
    /// UTF-8 (callers map failures to a codec error).
    pub fn from_tagged_bytes(tag: u8, bytes: Vec<u8>) -> Result<Self, u8> {
        match tag {
            0 => Ok(Self::Opaque(bytes)),
            1 => String::from_utf8(bytes).map(Self::Text).map_err(|_| tag),
            2 => String::from_utf8(bytes).map(Self::Command).map_err(|_| tag),
            other => Err(other),
        }
    }

    /// An empty opaque payload, the default metadata value.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Opaque(Vec::new())
    }
}

/// The unit of wire transfer.
///
/// A `Message` is immutable after construction: encryption and encoding
/// produce new values rather than mutating in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Protocol opcode and reply topic.
    pub purpose: Purpose,
    /// Originating peer: an 8-char encoded address, or a username for
    /// chat-level purposes.
    pub sender: String,
    /// Target chat identifier; empty for non-chat control messages.
    pub chat_name: String,
    /// Purpose-specific payload.
    pub content: Data,
    /// Auxiliary payload, same wire shape as `content`.
    pub metadata: Data,
    /// Whether `content` has been transformed by the asymmetric cipher.
    pub is_encrypted: bool,
    /// Creation time in seconds since the Unix epoch; set once, never
    /// mutated.
    pub timestamp: u64,
}

impl Message {
    /// Construct a plaintext message stamped with the current time.
    #[must_use]
    pub fn new(
        purpose: Purpose,
        sender: impl Into<String>,
        chat_name: impl Into<String>,
        content: Data,
    ) -> Self {
        Self {
            purpose,
            sender: sender.into(),
            chat_name: chat_name.into(),
            content,
            metadata: Data::empty(),
            is_encrypted: false,
            timestamp: unix_now(),
        }
    }

    /// New value with the given metadata attached.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Data) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Current Unix timestamp in seconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
