//! Built-in commands addressed to reserved queues.

use std::fmt;
use teamq_protocol::queues;

use crate::broker::RoutingMode;

/// A command handled by the broker itself instead of being routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Add `body.queue` to the sender's subscriptions.
    Subscribe,
    /// Remove `body.queue` from the sender's subscriptions.
    Unsubscribe,
    /// Close the sender's connection.
    Quit,
    /// Authenticate the sender with `body.token`.
    Auth,
    /// Register the sender as a worker. Only exists in workers mode.
    WorkerRegister,
}

impl Command {
    /// Resolve a queue name to the command registered under it in `mode`.
    #[must_use]
    pub fn resolve(queue: &str, mode: RoutingMode) -> Option<Self> {
        match queue {
            queues::SUBSCRIBE => Some(Command::Subscribe),
            queues::UNSUBSCRIBE => Some(Command::Unsubscribe),
            queues::QUIT => Some(Command::Quit),
            queues::AUTH => Some(Command::Auth),
            queues::WORKER_REGISTER if mode == RoutingMode::Workers => {
                Some(Command::WorkerRegister)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn queue(self) -> &'static str {
        match self {
            Command::Subscribe => queues::SUBSCRIBE,
            Command::Unsubscribe => queues::UNSUBSCRIBE,
            Command::Quit => queues::QUIT,
            Command::Auth => queues::AUTH,
            Command::WorkerRegister => queues::WORKER_REGISTER,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.queue())
    }
}
