//! Broker errors.
//!
//! The `Display` text of every variant is what the sender receives in the
//! error envelope, so messages stay generic where detail would leak broker
//! internals (authentication failures in particular).

use teamq_protocol::ProtocolError;
use thiserror::Error;

use crate::connection::ConnectionId;

/// Errors answered to the sender with a `CODE_ERROR` envelope.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The frame could not be decoded.
    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    /// The `queue` field is empty.
    #[error("message must have a 'queue'")]
    EmptyQueue,

    /// Authentication is enforced and the sender has not authenticated.
    #[error("the connection needs to authenticate")]
    AuthRequired,

    /// `$tea.connection.auth` was sent but authentication is off.
    #[error("authentication is not enabled on this broker")]
    AuthDisabled,

    /// `$tea.connection.auth` without a usable token.
    #[error("need 'body.token' to be a valid string value")]
    MissingToken,

    /// The identity service rejected the token or could not be used.
    #[error("there was an error on the authentication server")]
    AuthFailed,

    /// Identity is set at most once per connection.
    #[error("the connection is already authenticated")]
    AlreadyAuthenticated,

    /// A connection is either a user or a worker, never both.
    #[error("a connection cannot be both an authenticated user and a worker")]
    RoleConflict,

    /// `$tea.subscribe.queue` / `$tea.unsubscribe.queue` without `body.queue`.
    #[error("'queue' must not be empty")]
    MissingSubscriptionQueue,

    /// Attempt to subscribe to a broker-owned queue.
    #[error("queue '{0}' is reserved")]
    ReservedQueue(String),

    /// `$tea.worker.register` without a key.
    #[error("register failed, key must be specified")]
    MissingWorkerKey,

    /// `$tea.worker.register` with a key outside the allowlist.
    #[error("register failed, key '{0}' is invalid")]
    InvalidWorkerKey(String),

    /// The worker role is set at most once per connection.
    #[error("the connection is already registered as a worker")]
    AlreadyWorker,

    /// A `$tea.` queue that is not a built-in of the active routing mode.
    #[error("unknown built-in queue '{0}'")]
    UnknownCommand(String),

    /// The connection is no longer registered.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
}
