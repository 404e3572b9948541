//! Repeating-key XOR used to wrap key-exchange payloads.
//!
//! The key stream is the key's minimal big-endian byte representation,
//! cycled to the data length. Because the stream repeats, this is a
//! classical repeating-key XOR and **not** a one-time pad; it protects a
//! private key only against a passive observer who does not attack the
//! cipher. This weakness is inherited from the protocol and kept as-is.

/// Minimal big-endian byte representation of `key`.
///
/// A zero key yields a single zero byte, making [`crypt`] the identity.
fn key_bytes(key: u64) -> Vec<u8> {
    if key == 0 {
        return vec![0];
    }
    let bytes = key.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    bytes[first..].to_vec()
}

/// XORs `data` with the cycled key stream.
///
/// Self-inverse: `crypt(&crypt(data, key), key) == data` for every key.
#[must_use]
pub fn crypt(data: &[u8], key: u64) -> Vec<u8> {
    let key = key_bytes(key);
    data.iter()
        .zip(key.iter().cycle())
        .map(|(&d, &k)| d ^ k)
        .collect()
}
