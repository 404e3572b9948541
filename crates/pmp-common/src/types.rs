//! Core type definitions and protocol constants for PMP.

/// Maximum username length in bytes in the fixed-width binary frame.
pub const USERNAME_MAX_LEN: usize = 20;

/// Maximum chat name length in bytes in the fixed-width binary frame.
pub const CHAT_NAME_MAX_LEN: usize = 20;

/// Maximum content/metadata payload length in bytes.
pub const MESSAGE_CONTENT_MAX_LEN: usize = 500;

/// Default listening port for server-role nodes.
pub const SERVER_PORT: u16 = 7740;

/// Default listening port for client-role nodes.
///
/// Distinct from [`SERVER_PORT`] so a host running both roles never has
/// ambiguous inbound traffic.
pub const CLIENT_PORT: u16 = 7741;

/// Lower bound (inclusive) of the prime range used for key agreement and
/// asymmetric keypair generation.
pub const PRIME_MIN: u64 = 500;

/// Upper bound (exclusive) of the prime range.
pub const PRIME_MAX: u64 = 1000;

/// Lower bound (inclusive) of the secret-exponent range.
pub const KEY_MIN: u64 = 500;

/// Upper bound (exclusive) of the secret-exponent range.
pub const KEY_MAX: u64 = 1000;

/// Chat kind carried in CREATE_CHAT payloads and chat metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatType {
    /// Two-member chat.
    Individual,
    /// Multi-member chat with admin privileges.
    Group,
}

impl ChatType {
    /// Wire value of this chat type.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Individual => 0,
            Self::Group => 1,
        }
    }
}

impl TryFrom<u8> for ChatType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Individual),
            1 => Ok(Self::Group),
            other => Err(other),
        }
    }
}
