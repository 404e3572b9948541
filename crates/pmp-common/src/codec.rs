//! Wire codec: fixed-width binary framing and JSON framing.
//!
//! Both framings are lossless for any [`Message`] the system constructs.
//! Binary frames are fixed-size; string fields are left-padded with zero
//! bytes to their maximum width and the padding is stripped on decode by
//! taking the suffix after the last zero byte. Payloads therefore must not
//! contain embedded zero bytes, which is enforced at encode time.

use crate::message::{Data, Message, Purpose};
use crate::types::{CHAT_NAME_MAX_LEN, MESSAGE_CONTENT_MAX_LEN, USERNAME_MAX_LEN};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Total size of a binary frame:
/// `is_encrypted(1) | sender(20) | chat_name(20) | purpose(1) |
/// content(1 + 500) | metadata(1 + 500) | timestamp(8)`.
pub const FRAME_LEN: usize = 1
    + USERNAME_MAX_LEN
    + CHAT_NAME_MAX_LEN
    + 1
    + (1 + MESSAGE_CONTENT_MAX_LEN)
    + (1 + MESSAGE_CONTENT_MAX_LEN)
    + 8;

/// Errors produced while encoding or decoding a frame.
///
/// A decode error is non-recoverable for that message; the connection that
/// carried it is dropped and no partial [`Message`] is ever returned.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The byte sequence is not exactly one frame long.
    #[error("bad frame length: expected {expected}, got {actual}")]
    Length {
        /// Required frame size in bytes.
        expected: usize,
        /// Received size in bytes.
        actual: usize,
    },
    /// A string field exceeds its fixed wire width.
    #[error("{field} too long: max {max}, got {actual}")]
    FieldTooLong {
        /// Which frame field overflowed.
        field: &'static str,
        /// Maximum width in bytes.
        max: usize,
        /// Actual payload size in bytes.
        actual: usize,
    },
    /// A payload contains a zero byte, which is indistinguishable from
    /// padding in the binary frame.
    #[error("{field} contains an embedded zero byte")]
    EmbeddedZero {
        /// Which frame field is affected.
        field: &'static str,
    },
    /// The purpose byte does not name a known purpose.
    #[error("unknown purpose byte {0:#04x}")]
    UnknownPurpose(u8),
    /// The payload tag byte does not name a known `Data` variant.
    #[error("unknown data tag {0}")]
    UnknownDataTag(u8),
    /// A text field is not valid UTF-8.
    #[error("{field} is not valid UTF-8")]
    Utf8 {
        /// Which frame field is affected.
        field: &'static str,
    },
    /// Malformed JSON framing.
    #[error("json framing error: {0}")]
    Json(#[from] serde_json::Error),
    /// Malformed hex in a JSON-framed opaque payload.
    #[error("bad hex payload: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Left-pads `bytes` with zeros to `width` and appends to `out`.
fn put_padded(
    out: &mut Vec<u8>,
    bytes: &[u8],
    width: usize,
    field: &'static str,
) -> Result<(), CodecError> {
    if bytes.len() > width {
        return Err(CodecError::FieldTooLong {
            field,
            max: width,
            actual: bytes.len(),
        });
    }
    if bytes.contains(&0) {
        return Err(CodecError::EmbeddedZero { field });
    }
    out.resize(out.len() + (width - bytes.len()), 0);
    out.extend_from_slice(bytes);
    Ok(())
}

/// Strips left zero-padding: the suffix after the last zero byte, or the
/// whole field if it carries no zero at all.
fn strip_padding(field: &[u8]) -> &[u8] {
    match field.iter().rposition(|&b| b == 0) {
        Some(i) => &field[i + 1..],
        None => field,
    }
}

fn field_string(field: &[u8], name: &'static str) -> Result<String, CodecError> {
    String::from_utf8(strip_padding(field).to_vec()).map_err(|_| CodecError::Utf8 { field: name })
}

fn field_data(tag: u8, field: &[u8]) -> Result<Data, CodecError> {
    Data::from_tagged_bytes(tag, strip_padding(field).to_vec())
        .map_err(CodecError::UnknownDataTag)
}

/// Serializes a message into one fixed-width binary frame.
///
/// # Errors
///
/// Returns [`CodecError`] if any field exceeds its wire width or contains
/// an embedded zero byte.
pub fn encode(msg: &Message) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(FRAME_LEN);
    out.push(u8::from(msg.is_encrypted));
    put_padded(&mut out, msg.sender.as_bytes(), USERNAME_MAX_LEN, "sender")?;
    put_padded(
        &mut out,
        msg.chat_name.as_bytes(),
        CHAT_NAME_MAX_LEN,
        "chat_name",
    )?;
    out.push(msg.purpose.as_u8());
    out.push(msg.content.tag());
    put_padded(
        &mut out,
        msg.content.as_bytes(),
        MESSAGE_CONTENT_MAX_LEN,
        "content",
    )?;
    out.push(msg.metadata.tag());
    put_padded(
        &mut out,
        msg.metadata.as_bytes(),
        MESSAGE_CONTENT_MAX_LEN,
        "metadata",
    )?;
    out.extend_from_slice(&msg.timestamp.to_be_bytes());
    debug_assert_eq!(out.len(), FRAME_LEN);
    Ok(out)
}

/// Parses one fixed-width binary frame back into a message.
///
/// # Errors
///
/// Returns [`CodecError`] on truncated input, an unknown purpose or data
/// tag, or non-UTF-8 string fields. Never returns a partial message.
pub fn decode(data: &[u8]) -> Result<Message, CodecError> {
    if data.len() != FRAME_LEN {
        return Err(CodecError::Length {
            expected: FRAME_LEN,
            actual: data.len(),
        });
    }

    let is_encrypted = data[0] != 0;
    let mut at = 1;
    let sender = &data[at..at + USERNAME_MAX_LEN];
    at += USERNAME_MAX_LEN;
    let chat_name = &data[at..at + CHAT_NAME_MAX_LEN];
    at += CHAT_NAME_MAX_LEN;
    let purpose = Purpose::try_from(data[at]).map_err(CodecError::UnknownPurpose)?;
    at += 1;
    let content_tag = data[at];
    at += 1;
    let content = &data[at..at + MESSAGE_CONTENT_MAX_LEN];
    at += MESSAGE_CONTENT_MAX_LEN;
    let metadata_tag = data[at];
    at += 1;
    let metadata = &data[at..at + MESSAGE_CONTENT_MAX_LEN];
    at += MESSAGE_CONTENT_MAX_LEN;
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&data[at..at + 8]);

    Ok(Message {
        purpose,
        sender: field_string(sender, "sender")?,
        chat_name: field_string(chat_name, "chat_name")?,
        content: field_data(content_tag, content)?,
        metadata: field_data(metadata_tag, metadata)?,
        is_encrypted,
        timestamp: u64::from_be_bytes(ts),
    })
}

/// JSON framing of a message. The `content` and `metadata` payloads are
/// embedded as nested JSON *strings* of the form
/// `{"type": <tag>, "value": <string>}`.
#[derive(Serialize, Deserialize)]
struct JsonFrame {
    is_encrypted: bool,
    sender: String,
    chat_name: String,
    purpose: u8,
    content: String,
    metadata: String,
    timestamp: u64,
}

#[derive(Serialize, Deserialize)]
struct JsonPayload {
    #[serde(rename = "type")]
    tag: u8,
    value: String,
}

fn data_to_json(data: &Data) -> Result<String, CodecError> {
    let value = match data {
        Data::Opaque(bytes) => hex::encode(bytes),
        Data::Text(s) | Data::Command(s) => s.clone(),
    };
    Ok(serde_json::to_string(&JsonPayload {
        tag: data.tag(),
        value,
    })?)
}

fn data_from_json(payload: &str) -> Result<Data, CodecError> {
    let payload: JsonPayload = serde_json::from_str(payload)?;
    match payload.tag {
        0 => Ok(Data::Opaque(hex::decode(payload.value)?)),
        1 => Ok(Data::Text(payload.value)),
        2 => Ok(Data::Command(payload.value)),
        other => Err(CodecError::UnknownDataTag(other)),
    }
}

/// Serializes a message as JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode_json(msg: &Message) -> Result<String, CodecError> {
    let frame = JsonFrame {
        is_encrypted: msg.is_encrypted,
        sender: msg.sender.clone(),
        chat_name: msg.chat_name.clone(),
        purpose: msg.purpose.as_u8(),
        content: data_to_json(&msg.content)?,
        metadata: data_to_json(&msg.metadata)?,
        timestamp: msg.timestamp,
    };
    Ok(serde_json::to_string(&frame)?)
}

/// Parses JSON text back into a message.
///
/// # Errors
///
/// Returns [`CodecError`] on malformed JSON, an unknown purpose, or an
/// unknown payload tag.
pub fn decode_json(text: &str) -> Result<Message, CodecError> {
    let frame: JsonFrame = serde_json::from_str(text)?;
    Ok(Message {
        purpose: Purpose::try_from(frame.purpose).map_err(CodecError::UnknownPurpose)?,
        sender: frame.sender,
        chat_name: frame.chat_name,
        content: data_from_json(&frame.content)?,
        metadata: data_from_json(&frame.metadata)?,
        is_encrypted: frame.is_encrypted,
        timestamp: frame.timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message::new(
            Purpose::Message,
            "finn",
            "general",
            Data::Text("hello there".into()),
        )
    }

    #[test]
    fn binary_round_trip() {
        let msg = sample();
        let bytes = encode(&msg).unwrap();
        assert_eq!(bytes.len(), FRAME_LEN);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn binary_round_trip_with_metadata_and_flag() {
        let mut msg = sample().with_metadata(Data::Command("{\"k\":1}".into()));
        msg.is_encrypted = true;
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn json_round_trip() {
        let msg = sample().with_metadata(Data::Opaque(vec![0, 1, 2, 255]));
        let text = encode_json(&msg).unwrap();
        assert_eq!(decode_json(&text).unwrap(), msg);
    }

    #[test]
    fn json_content_is_a_nested_string() {
        let text = encode_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let content = value["content"].as_str().expect("content must be a string");
        let payload: serde_json::Value = serde_json::from_str(content).unwrap();
        assert_eq!(payload["type"], 1);
        assert_eq!(payload["value"], "hello there");
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let bytes = encode(&sample()).unwrap();
        let err = decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, CodecError::Length { .. }));
        assert!(matches!(decode(&[]), Err(CodecError::Length { .. })));
    }

    #[test]
    fn unknown_purpose_byte_is_an_error() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[1 + USERNAME_MAX_LEN + CHAT_NAME_MAX_LEN] = 0xEE;
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::UnknownPurpose(0xEE))
        ));
    }

    #[test]
    fn unknown_data_tag_is_an_error() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[1 + USERNAME_MAX_LEN + CHAT_NAME_MAX_LEN + 1] = 9;
        assert!(matches!(decode(&bytes), Err(CodecError::UnknownDataTag(9))));
    }

    #[test]
    fn embedded_zero_byte_is_rejected_at_encode() {
        let msg = Message::new(
            Purpose::Message,
            "finn",
            "general",
            Data::Opaque(vec![1, 0, 2]),
        );
        assert!(matches!(
            encode(&msg),
            Err(CodecError::EmbeddedZero { field: "content" })
        ));
    }

    #[test]
    fn oversized_field_is_rejected_at_encode() {
        let msg = Message::new(
            Purpose::Message,
            "a".repeat(USERNAME_MAX_LEN + 1),
            "general",
            Data::Text("hi".into()),
        );
        assert!(matches!(
            encode(&msg),
            Err(CodecError::FieldTooLong {
                field: "sender",
                ..
            })
        ));
    }

    #[test]
    fn full_width_fields_survive() {
        let msg = Message::new(
            Purpose::Message,
            "u".repeat(USERNAME_MAX_LEN),
            "c".repeat(CHAT_NAME_MAX_LEN),
            Data::Text("x".repeat(MESSAGE_CONTENT_MAX_LEN)),
        );
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn empty_fields_survive() {
        let msg = Message::new(Purpose::GetAllUsernames, "c0a80023", "", Data::empty());
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn json_unknown_tag_is_an_error() {
        let text = r#"{"is_encrypted":false,"sender":"a","chat_name":"",
            "purpose":16,"content":"{\"type\":7,\"value\":\"x\"}",
            "metadata":"{\"type\":0,\"value\":\"\"}","timestamp":0}"#;
        assert!(matches!(
            decode_json(text),
            Err(CodecError::UnknownDataTag(7))
        ));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_text(max: usize) -> impl Strategy<Value = String> {
        // Zero-free ASCII keeps the value encodable under binary framing.
        proptest::collection::vec(0x20u8..0x7F, 0..max)
            .prop_map(|v| String::from_utf8(v).unwrap())
    }

    fn arb_data() -> impl Strategy<Value = Data> {
        prop_oneof![
            proptest::collection::vec(1u8..=255, 0..64).prop_map(Data::Opaque),
            arb_text(64).prop_map(Data::Text),
            arb_text(64).prop_map(Data::Command),
        ]
    }

    fn arb_message() -> impl Strategy<Value = Message> {
        (
            0u8..=21,
            arb_text(USERNAME_MAX_LEN),
            arb_text(CHAT_NAME_MAX_LEN),
            arb_data(),
            arb_data(),
            any::<bool>(),
            any::<u64>(),
        )
            .prop_map(
                |(purpose, sender, chat_name, content, metadata, is_encrypted, timestamp)| {
                    Message {
                        purpose: Purpose::try_from(purpose).unwrap(),
                        sender,
                        chat_name,
                        content,
                        metadata,
                        is_encrypted,
                        timestamp,
                    }
                },
            )
    }

    proptest! {
        #[test]
        fn binary_encode_decode_roundtrip(msg in arb_message()) {
            let bytes = encode(&msg).unwrap();
            prop_assert_eq!(decode(&bytes).unwrap(), msg);
        }

        #[test]
        fn json_encode_decode_roundtrip(msg in arb_message()) {
            let text = encode_json(&msg).unwrap();
            prop_assert_eq!(decode_json(&text).unwrap(), msg);
        }

        #[test]
        fn short_input_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _unused = decode(&data);
        }
    }
}
