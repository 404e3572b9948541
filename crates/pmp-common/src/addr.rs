//! Peer address encoding and storage-key fingerprints.
//!
//! Network addresses travel inside fixed-width frame fields as an 8-char
//! hex string (two digits per dotted segment). Chat names and passwords
//! are hashed to a fingerprint before being used as storage keys, which
//! decouples display names from storage identifiers.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors produced while encoding or decoding a peer address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddrError {
    /// The dotted address does not have exactly four 8-bit segments.
    #[error("malformed dotted address: {0:?}")]
    MalformedAddress(String),
    /// The hex form is not exactly 8 hex digits.
    #[error("malformed hex address: {0:?}")]
    MalformedHex(String),
}

/// Encodes a dotted IPv4 address as an 8-character lowercase hex string.
///
/// `"192.168.0.35"` becomes `"c0a80023"`.
///
/// # Errors
///
/// Returns [`AddrError::MalformedAddress`] unless the input is four dotted
/// 8-bit decimal segments.
pub fn encode_ip_addr(ip_addr: &str) -> Result<String, AddrError> {
    let mut octets = [0u8; 4];
    let mut segments = ip_addr.split('.');
    for octet in &mut octets {
        *octet = segments
            .next()
            .and_then(|s| s.parse::<u8>().ok())
            .ok_or_else(|| AddrError::MalformedAddress(ip_addr.to_string()))?;
    }
    if segments.next().is_some() {
        return Err(AddrError::MalformedAddress(ip_addr.to_string()));
    }
    Ok(hex::encode(octets))
}

/// Decodes an 8-character hex string back into a dotted IPv4 address.
///
/// # Errors
///
/// Returns [`AddrError::MalformedHex`] unless the input is exactly 8 hex
/// digits.
pub fn decode_ip_addr(ip_addr_hex: &str) -> Result<String, AddrError> {
    let bytes = hex::decode(ip_addr_hex)
        .map_err(|_| AddrError::MalformedHex(ip_addr_hex.to_string()))?;
    let octets: [u8; 4] = bytes
        .try_into()
        .map_err(|_| AddrError::MalformedHex(ip_addr_hex.to_string()))?;
    Ok(format!(
        "{}.{}.{}.{}",
        octets[0], octets[1], octets[2], octets[3]
    ))
}

/// SHA-256 fingerprint of a string, as 64 lowercase hex digits.
///
/// Used both as the storage-layer identifier of a chat and as the password
/// hash carried in credential payloads.
#[must_use]
pub fn fingerprint(s: &str) -> String {
    hex::encode(Sha256::digest(s.as_bytes()))
}
