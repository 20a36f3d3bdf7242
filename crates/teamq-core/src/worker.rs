//! Worker registration records.

use teamq_protocol::message::coerce_i64;
use teamq_protocol::Message;

/// Inclusive range of user ids a worker is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserRange {
    pub min: i64,
    pub max: i64,
}

impl UserRange {
    #[must_use]
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Check whether `user_id` falls inside the range (both ends inclusive).
    #[must_use]
    pub fn contains(&self, user_id: i64) -> bool {
        self.min <= user_id && user_id <= self.max
    }
}

/// A registered worker, owned by the broker and keyed by connection id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkerDescriptor {
    /// Worker-chosen identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Registration key the worker presented.
    pub key: String,
    /// User affinity range, `[0, 0]` when not declared.
    pub users: UserRange,
}

impl WorkerDescriptor {
    /// Build a descriptor from a `$tea.worker.register` message body.
    ///
    /// Missing or non-string text fields become empty; `user.min` and
    /// `user.max` accept any JSON number and default to 0.
    #[must_use]
    pub fn from_message(message: &Message) -> Self {
        let text = |key: &str| message.str_field(key).unwrap_or_default().to_string();
        let users = message
            .map_field("user")
            .map(|user| {
                let bound = |key: &str| user.get(key).and_then(coerce_i64).unwrap_or_default();
                UserRange::new(bound("min"), bound("max"))
            })
            .unwrap_or_default();

        Self {
            id: text("id"),
            name: text("name"),
            description: text("description"),
            key: text("key"),
            users,
        }
    }
}
