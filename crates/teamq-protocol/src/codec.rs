//! Codec for encoding and decoding TeaMQ frames.
//!
//! This module provides JSON serialization with newline-delimited framing.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::message::{coerce_i64, Message};

/// Default maximum line length (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Length of the per-delivery unique id.
pub const UNIQUE_ID_LENGTH: usize = 32;

/// Frame delimiter.
pub const DELIMITER: u8 = b'\n';

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Line exceeds the maximum size.
    #[error("Frame size {0} exceeds maximum {1}")]
    FrameTooLarge(usize, usize),

    /// Bytes are not valid JSON.
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Valid JSON, but not an object.
    #[error("Frame must be a JSON object")]
    NotAnObject,

    /// The `queue` field is absent.
    #[error("message should contain a 'queue' field")]
    MissingQueue,

    /// The `queue` field is not a string.
    #[error("message 'queue' should be a string")]
    InvalidQueueType,

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    id: &'a str,
    queue: &'a str,
    #[serde(rename = "createdAt")]
    created_at: f64,
    body: &'a Map<String, Value>,
    meta: Meta<'a>,
}

#[derive(Serialize)]
struct Meta<'a> {
    #[serde(rename = "uniqueId")]
    unique_id: String,
    pattern: &'a str,
    #[serde(rename = "sentAt")]
    sent_at: f64,
}

/// Current time in fractional seconds since the epoch.
#[must_use]
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Generate a per-delivery unique id.
///
/// A random v4 UUID in simple form: 32 hex characters carrying 122 random
/// bits, so collisions between deliveries are not a practical concern.
#[must_use]
pub fn unique_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(UNIQUE_ID_LENGTH);
    id
}

/// Decode one frame into a message.
///
/// # Errors
///
/// Returns an error if the bytes are not a JSON object, or if the `queue`
/// field is missing or not a string.
pub fn decode(data: &[u8]) -> Result<Message, ProtocolError> {
    let value: Value = serde_json::from_slice(data)?;
    let Value::Object(mut fields) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    let queue = match fields.remove("queue") {
        None => return Err(ProtocolError::MissingQueue),
        Some(Value::String(queue)) => queue,
        Some(_) => return Err(ProtocolError::InvalidQueueType),
    };

    let id = match fields.remove("id") {
        Some(Value::String(id)) => id,
        _ => String::new(),
    };

    let body = match fields.remove("body") {
        Some(Value::Object(body)) => body,
        _ => Map::new(),
    };

    let created_at = fields
        .get("createdAt")
        .and_then(Value::as_f64)
        .unwrap_or_default();

    let from_user_id = fields
        .get("fromUserId")
        .and_then(coerce_i64)
        .unwrap_or_default();

    Ok(Message {
        id,
        queue,
        body,
        created_at,
        from_user_id,
        pattern: String::new(),
    })
}

/// Encode a message to a newline-terminated frame.
///
/// `meta.uniqueId` and `meta.sentAt` are freshly generated on every call,
/// so two encodes of the same message are distinct on the wire.
///
/// # Errors
///
/// Returns an error if JSON encoding fails.
pub fn encode(message: &Message) -> Result<Bytes, ProtocolError> {
    let frame = OutboundFrame {
        id: &message.id,
        queue: &message.queue,
        created_at: message.created_at,
        body: &message.body,
        meta: Meta {
            unique_id: unique_id(),
            pattern: &message.pattern,
            sent_at: now_secs(),
        },
    };
    to_line(&frame)
}

/// Serialize any value as a single newline-terminated JSON line.
///
/// # Errors
///
/// Returns an error if JSON encoding fails.
pub fn to_line<T: Serialize>(value: &T) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(value).map_err(ProtocolError::Encode)?;
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.extend_from_slice(&payload);
    buf.put_u8(DELIMITER);
    Ok(buf.freeze())
}

/// Try to split one line off a read buffer, advancing it if successful.
///
/// Returns `Ok(Some(line))` without the trailing `\n` (or `\r\n`),
/// `Ok(None)` if more data is needed, or `Err` if the pending line is
/// longer than `max_size`.
///
/// # Errors
///
/// Returns an error if the line exceeds `max_size`.
pub fn decode_line(buf: &mut BytesMut, max_size: usize) -> Result<Option<Bytes>, ProtocolError> {
    let Some(pos) = buf.iter().position(|b| *b == DELIMITER) else {
        if buf.len() > max_size {
            return Err(ProtocolError::FrameTooLarge(buf.len(), max_size));
        }
        return Ok(None);
    };

    if pos > max_size {
        return Err(ProtocolError::FrameTooLarge(pos, max_size));
    }

    let mut line = buf.split_to(pos + 1);
    line.truncate(pos);
    if line.last() == Some(&b'\r') {
        line.truncate(pos - 1);
    }
    Ok(Some(line.freeze()))
}
