//! Control envelope answering built-in commands.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::{to_line, ProtocolError};

/// Code for a successful command.
pub const CODE_SUCCESS: u32 = 200;

/// Code for every failure. There are no structured subcodes.
pub const CODE_ERROR: u32 = 10000;

/// The `{code, message, data}` response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// `CODE_SUCCESS` or `CODE_ERROR`.
    pub code: u32,
    /// Human-readable text.
    pub message: String,
    /// Always `null` on the wire.
    pub data: Option<serde_json::Value>,
}

impl Response {
    /// Create a success envelope.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            code: CODE_SUCCESS,
            message: message.into(),
            data: None,
        }
    }

    /// Create an error envelope.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: CODE_ERROR,
            message: message.into(),
            data: None,
        }
    }

    /// Encode to a newline-terminated frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON encoding fails.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        to_line(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_wire_format() {
        let encoded = Response::success("ok").encode().unwrap();
        assert_eq!(&encoded[..], b"{\"code\":200,\"message\":\"ok\",\"data\":null}\n");
    }

    #[test]
    fn test_error_wire_format() {
        let encoded = Response::error("bad").encode().unwrap();
        let decoded: Response = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded.code, CODE_ERROR);
        assert_eq!(decoded.message, "bad");
        assert!(decoded.data.is_none());
    }
}
