//! Reserved queue names.
//!
//! Every queue starting with [`RESERVED_PREFIX`] belongs to the broker and is
//! never delivered to subscribers.

/// Prefix shared by all built-in queues.
pub const RESERVED_PREFIX: &str = "$tea.";

/// Subscribe the sending connection to `body.queue`.
pub const SUBSCRIBE: &str = "$tea.subscribe.queue";

/// Unsubscribe the sending connection from `body.queue`.
pub const UNSUBSCRIBE: &str = "$tea.unsubscribe.queue";

/// Close the sending connection.
pub const QUIT: &str = "$tea.connection.quit";

/// Authenticate the sending connection with `body.token`.
pub const AUTH: &str = "$tea.connection.auth";

/// Register the sending connection as a worker.
pub const WORKER_REGISTER: &str = "$tea.worker.register";

/// Check whether a queue name is reserved for the broker.
#[must_use]
pub fn is_reserved(queue: &str) -> bool {
    queue.starts_with(RESERVED_PREFIX)
}
