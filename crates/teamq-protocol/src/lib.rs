//! # teamq-protocol
//!
//! Wire protocol definitions for the TeaMQ broker.
//!
//! TeaMQ speaks newline-delimited JSON over a byte stream: every line in
//! either direction is exactly one JSON object.
//!
//! ## Frame Kinds
//!
//! - `Message` - a routed message addressed to a queue
//! - `Response` - the `{code, message, data}` envelope answering built-ins
//!
//! ## Example
//!
//! ```rust
//! use teamq_protocol::{codec, Message};
//!
//! let mut message = Message::new("room.1");
//! message.body.insert("text".into(), "hi".into());
//!
//! let encoded = codec::encode(&message).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded.queue, "room.1");
//! ```

pub mod codec;
pub mod envelope;
pub mod message;
pub mod queues;

pub use codec::{decode, encode, ProtocolError};
pub use envelope::{Response, CODE_ERROR, CODE_SUCCESS};
pub use message::Message;
