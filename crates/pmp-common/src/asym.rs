//! Per-chat asymmetric cipher.
//!
//! Textbook RSA over the same bounded prime range the key agreement uses.
//! Keys are transportable as a pair of integers, which is what the chat
//! metadata and the KEY transfer payload carry. Encryption is per-byte
//! `m^e mod n` with no padding, so it is deterministic and the ciphertext
//! expands to a JSON integer array several times the plaintext size; this
//! matches the protocol it implements and is not a hardened primitive.

use crate::exchange::{is_prime, mod_pow};
use crate::message::{Data, Message};
use crate::types::{PRIME_MAX, PRIME_MIN};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by keypair generation and message encryption.
#[derive(Debug, Error)]
pub enum AsymError {
    /// Encrypting a message whose content is already ciphertext.
    #[error("message is already encrypted")]
    AlreadyEncrypted,
    /// Decrypting a message that was never encrypted.
    #[error("message is not encrypted")]
    NotEncrypted,
    /// Ciphertext payload is missing, malformed, or decrypts to an
    /// impossible byte value.
    #[error("malformed ciphertext payload")]
    BadCiphertext,
    /// No usable prime pair in the configured range.
    #[error("no prime pair in range [{PRIME_MIN}, {PRIME_MAX})")]
    NoPrimes,
}

/// RSA public key `(e, n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    /// Public exponent.
    pub e: u64,
    /// Modulus.
    pub n: u64,
}

/// RSA private key `(d, n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKey {
    /// Private exponent.
    pub d: u64,
    /// Modulus.
    pub n: u64,
}

impl PublicKey {
    /// The `[e, n]` pair carried inside chat metadata.
    #[must_use]
    pub const fn as_pair(self) -> [u64; 2] {
        [self.e, self.n]
    }

    /// Rebuilds a key from its transported pair.
    #[must_use]
    pub const fn from_pair(pair: [u64; 2]) -> Self {
        Self { e: pair[0], n: pair[1] }
    }
}

impl PrivateKey {
    /// The `[d, n]` pair carried inside KEY transfer payloads.
    #[must_use]
    pub const fn as_pair(self) -> [u64; 2] {
        [self.d, self.n]
    }

    /// Rebuilds a key from its transported pair.
    #[must_use]
    pub const fn from_pair(pair: [u64; 2]) -> Self {
        Self { d: pair[0], n: pair[1] }
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Brute-force modular multiplicative inverse, viable for small moduli.
fn mod_mul_inv(a: u64, m: u64) -> Option<u64> {
    (1..m).find(|&i| a * i % m == 1)
}

/// Generates a fresh keypair from two distinct primes in the bounded
/// prime range.
///
/// # Errors
///
/// Returns [`AsymError::NoPrimes`] if the range cannot supply a usable
/// pair (it can, with the default bounds).
pub fn generate_keypair(rng: &mut impl Rng) -> Result<(PublicKey, PrivateKey), AsymError> {
    let primes: Vec<u64> = (PRIME_MIN..PRIME_MAX).filter(|&n| is_prime(n)).collect();
    if primes.len() < 2 {
        return Err(AsymError::NoPrimes);
    }
    let p = primes[rng.gen_range(0..primes.len())];
    let q = loop {
        let q = primes[rng.gen_range(0..primes.len())];
        if q != p {
            break q;
        }
    };

    let n = p * q;
    let phi = (p - 1) * (q - 1);
    let e = (3..phi)
        .step_by(2)
        .find(|&e| gcd(e, phi) == 1)
        .ok_or(AsymError::NoPrimes)?;
    let d = mod_mul_inv(e, phi).ok_or(AsymError::NoPrimes)?;

    Ok((PublicKey { e, n }, PrivateKey { d, n }))
}

/// Ciphertext carrier: the original payload tag plus one residue per
/// plaintext byte.
#[derive(Serialize, Deserialize)]
struct CipherPayload {
    #[serde(rename = "type")]
    tag: u8,
    data: Vec<u64>,
}

/// Encrypts a message's content with a chat's public key.
///
/// Produces a new message whose content is the JSON-encoded ciphertext
/// and whose `is_encrypted` flag is set; every other field is carried
/// over unchanged.
///
/// # Errors
///
/// Returns [`AsymError::AlreadyEncrypted`] if the message is already
/// ciphertext.
pub fn encrypt(msg: &Message, key: &PublicKey) -> Result<Message, AsymError> {
    if msg.is_encrypted {
        return Err(AsymError::AlreadyEncrypted);
    }
    let payload = CipherPayload {
        tag: msg.content.tag(),
        data: msg
            .content
            .as_bytes()
            .iter()
            .map(|&m| mod_pow(u64::from(m), key.e, key.n))
            .collect(),
    };
    let json = serde_json::to_string(&payload).map_err(|_| AsymError::BadCiphertext)?;
    Ok(Message {
        content: Data::Text(json),
        is_encrypted: true,
        ..msg.clone()
    })
}

/// Decrypts a message's content with the chat's private key, restoring
/// the original `Data` variant exactly.
///
/// # Errors
///
/// Returns [`AsymError::NotEncrypted`] for plaintext input and
/// [`AsymError::BadCiphertext`] if the payload does not decode.
pub fn decrypt(msg: &Message, key: &PrivateKey) -> Result<Message, AsymError> {
    if !msg.is_encrypted {
        return Err(AsymError::NotEncrypted);
    }
    let Data::Text(json) = &msg.content else {
        return Err(AsymError::BadCiphertext);
    };
    let payload: CipherPayload =
        serde_json::from_str(json).map_err(|_| AsymError::BadCiphertext)?;
    let bytes: Vec<u8> = payload
        .data
        .iter()
        .map(|&c| u8::try_from(mod_pow(c, key.d, key.n)).map_err(|_| AsymError::BadCiphertext))
        .collect::<Result<_, _>>()?;
    let content =
        Data::from_tagged_bytes(payload.tag, bytes).map_err(|_| AsymError::BadCiphertext)?;
    Ok(Message {
        content,
        is_encrypted: false,
        ..msg.clone()
    })
}
