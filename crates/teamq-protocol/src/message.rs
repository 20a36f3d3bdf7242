//! The routed message type.

use serde_json::{Map, Value};

/// A message addressed to a queue.
///
/// Everything except `pattern` and `from_user_id` is supplied by the sender.
/// The broker stamps `pattern` at dispatch time and `from_user_id` from the
/// authenticated connection before forwarding to a worker.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    /// Sender-supplied identifier, empty when absent.
    pub id: String,
    /// Routing key.
    pub queue: String,
    /// Free-form payload. A missing body decodes as an empty map.
    pub body: Map<String, Value>,
    /// Sender-supplied creation time in seconds since the epoch.
    pub created_at: f64,
    /// Authenticated user the message originates from, 0 if anonymous.
    pub from_user_id: i64,
    /// Queue name the message was matched against.
    pub pattern: String,
}

impl Message {
    /// Create an empty message for a queue.
    #[must_use]
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Default::default()
        }
    }

    /// Set the sender-supplied id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: Map<String, Value>) -> Self {
        self.body = body;
        self
    }

    /// Look up a body field.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Look up a body field holding a string.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.value(key).and_then(Value::as_str)
    }

    /// Look up a body field holding an object.
    #[must_use]
    pub fn map_field(&self, key: &str) -> Option<&Map<String, Value>> {
        self.value(key).and_then(Value::as_object)
    }
}

/// Coerce a JSON number of any width to `i64`, truncating floats.
#[must_use]
pub fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
            .or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_builders() {
        let body = json!({"queue": "room.1", "user": {"min": 1}});
        let msg = Message::new("$tea.subscribe.queue")
            .with_id("req-1")
            .with_body(body.as_object().cloned().unwrap_or_default());

        assert_eq!(msg.id, "req-1");
        assert_eq!(msg.str_field("queue"), Some("room.1"));
        assert!(msg.map_field("user").is_some());
        assert!(msg.str_field("user").is_none());
        assert!(msg.str_field("missing").is_none());
    }

    #[test]
    fn test_coerce_i64() {
        assert_eq!(coerce_i64(&json!(42)), Some(42));
        assert_eq!(coerce_i64(&json!(-7)), Some(-7));
        assert_eq!(coerce_i64(&json!(150.9)), Some(150));
        assert_eq!(coerce_i64(&json!(u64::MAX)), Some(i64::MAX));
        assert_eq!(coerce_i64(&json!("42")), None);
        assert_eq!(coerce_i64(&Value::Null), None);
    }
}
