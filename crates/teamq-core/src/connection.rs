//! Per-connection state and the handle used to write to it.

use bytes::Bytes;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use teamq_protocol::Response;
use teamq_transport::{FrameWriter, TransportError};

use crate::identity::Identity;

/// Broker-assigned connection identifier.
pub type ConnectionId = u64;

/// State the broker keeps for one open connection.
///
/// Instances live inside the routing tables and are only mutated under the
/// broker lock. Writes go through the cloneable [`ConnectionHandle`].
pub struct Connection {
    handle: ConnectionHandle,
    queues: HashSet<String>,
    identity: Option<Identity>,
    is_worker: bool,
}

impl Connection {
    #[must_use]
    pub fn new(id: ConnectionId, writer: Arc<dyn FrameWriter>) -> Self {
        Self {
            handle: ConnectionHandle { id, writer },
            queues: HashSet::new(),
            identity: None,
            is_worker: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.handle.id
    }

    /// Get a handle for writing to this connection.
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Record a subscription.
    ///
    /// The name is trimmed and empty names are ignored. Returns `true` if the
    /// connection was not subscribed before.
    pub fn subscribe(&mut self, queue: &str) -> bool {
        let queue = queue.trim();
        if queue.is_empty() {
            return false;
        }
        self.queues.insert(queue.to_string())
    }

    /// Drop a subscription. Returns `true` if the connection was subscribed.
    pub fn unsubscribe(&mut self, queue: &str) -> bool {
        let queue = queue.trim();
        if queue.is_empty() {
            return false;
        }
        self.queues.remove(queue)
    }

    /// Subscribed queue names, sorted.
    #[must_use]
    pub fn queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = self.queues.iter().cloned().collect();
        queues.sort();
        queues
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    #[must_use]
    pub fn is_worker(&self) -> bool {
        self.is_worker
    }

    pub(crate) fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    pub(crate) fn set_worker(&mut self) {
        self.is_worker = true;
    }

    pub(crate) fn take_queues(&mut self) -> HashSet<String> {
        std::mem::take(&mut self.queues)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.handle.id)
            .field("queues", &self.queues)
            .field("identity", &self.identity)
            .field("is_worker", &self.is_worker)
            .finish()
    }
}

/// Cloneable write side of a connection.
///
/// Any task may hold a handle; the underlying writer serializes frames so
/// concurrent senders never interleave.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    writer: Arc<dyn FrameWriter>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Write one pre-encoded frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or the write fails.
    pub async fn write(&self, data: Bytes) -> Result<(), TransportError> {
        self.writer.send_raw(data).await
    }

    /// Write a success envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or the write fails.
    pub async fn respond_success(&self, text: &str) -> Result<(), TransportError> {
        self.write(Response::success(text).encode()?).await
    }

    /// Write an error envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or the write fails.
    pub async fn respond_error(&self, text: &str) -> Result<(), TransportError> {
        self.write(Response::error(text).encode()?).await
    }

    /// Close the connection. Teardown happens when the read loop observes it.
    ///
    /// # Errors
    ///
    /// Returns an error if shutting the transport down fails.
    pub async fn close(&self) -> Result<(), TransportError> {
        self.writer.close().await
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
