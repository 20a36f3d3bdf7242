//! The broker's routing tables.
//!
//! Four indices kept consistent with each other:
//!
//! - connection registry: id -> [`Connection`]
//! - subscription index: queue -> subscribed ids
//! - user index: identity -> ids authenticated as that user
//! - worker index: id -> [`WorkerDescriptor`]
//!
//! Every id referenced by the last three is present in the registry. The
//! tables are plain data; the broker owns them behind a single lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use teamq_transport::FrameWriter;
use tracing::debug;

use crate::connection::{Connection, ConnectionHandle, ConnectionId};
use crate::error::BrokerError;
use crate::identity::Identity;
use crate::worker::WorkerDescriptor;

/// Result of picking a worker for an inbound request.
#[derive(Debug, Clone)]
pub struct WorkerSelection {
    /// The chosen worker connection.
    pub handle: ConnectionHandle,
    /// `true` if the worker's affinity range matched the user.
    pub affinity: bool,
}

/// Snapshot of table sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrokerStats {
    /// Open connections.
    pub connections: usize,
    /// Queues with at least one subscriber.
    pub queues: usize,
    /// Total (queue, connection) subscription pairs.
    pub subscriptions: usize,
    /// Distinct authenticated users.
    pub users: usize,
    /// Registered workers.
    pub workers: usize,
}

/// Connection registry plus subscription, user and worker indices.
#[derive(Debug, Default)]
pub struct RoutingTables {
    connections: HashMap<ConnectionId, Connection>,
    subscribers: HashMap<String, BTreeSet<ConnectionId>>,
    users: HashMap<Identity, BTreeSet<ConnectionId>>,
    workers: BTreeMap<ConnectionId, WorkerDescriptor>,
    last_id: ConnectionId,
    worker_cursor: usize,
}

impl RoutingTables {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection under the next id.
    pub fn insert_connection(&mut self, writer: Arc<dyn FrameWriter>) -> ConnectionHandle {
        self.last_id += 1;
        let connection = Connection::new(self.last_id, writer);
        let handle = connection.handle();
        self.connections.insert(self.last_id, connection);
        handle
    }

    /// Remove a connection and every index entry that refers to it.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        let mut connection = self.connections.remove(&id)?;

        for queue in connection.take_queues() {
            if let Some(ids) = self.subscribers.get_mut(&queue) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.subscribers.remove(&queue);
                }
            }
        }

        if let Some(identity) = connection.identity() {
            if let Some(ids) = self.users.get_mut(identity) {
                ids.remove(&id);
                if ids.is_empty() {
                    debug!(user = %identity, "Removed user");
                    self.users.remove(identity);
                }
            }
        }

        if self.workers.remove(&id).is_some() {
            debug!(connection = id, "Removed worker");
        }

        Some(connection)
    }

    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    fn get_mut(&mut self, id: ConnectionId) -> Result<&mut Connection, BrokerError> {
        self.connections
            .get_mut(&id)
            .ok_or(BrokerError::UnknownConnection(id))
    }

    /// Subscribe a connection to a queue.
    ///
    /// Returns `true` on the first subscription, `false` if it was already
    /// subscribed (or the trimmed name is empty).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown.
    pub fn subscribe(&mut self, id: ConnectionId, queue: &str) -> Result<bool, BrokerError> {
        let queue = queue.trim();
        if !self.get_mut(id)?.subscribe(queue) {
            return Ok(false);
        }
        self.subscribers
            .entry(queue.to_string())
            .or_default()
            .insert(id);
        Ok(true)
    }

    /// Unsubscribe a connection from a queue.
    ///
    /// Returns `true` if it was subscribed. Empty queues are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown.
    pub fn unsubscribe(&mut self, id: ConnectionId, queue: &str) -> Result<bool, BrokerError> {
        let queue = queue.trim();
        if !self.get_mut(id)?.unsubscribe(queue) {
            return Ok(false);
        }
        if let Some(ids) = self.subscribers.get_mut(queue) {
            ids.remove(&id);
            if ids.is_empty() {
                self.subscribers.remove(queue);
            }
        }
        Ok(true)
    }

    /// Attach an identity to a connection and index it under that user.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown, already authenticated,
    /// or registered as a worker.
    pub fn bind_identity(
        &mut self,
        id: ConnectionId,
        identity: Identity,
    ) -> Result<(), BrokerError> {
        let connection = self.get_mut(id)?;
        if connection.is_authenticated() {
            return Err(BrokerError::AlreadyAuthenticated);
        }
        if connection.is_worker() {
            return Err(BrokerError::RoleConflict);
        }
        connection.set_identity(identity.clone());
        self.users.entry(identity).or_default().insert(id);
        Ok(())
    }

    /// Mark a connection as a worker and install its descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown, already a worker, or
    /// authenticated as a user.
    pub fn register_worker(
        &mut self,
        id: ConnectionId,
        descriptor: WorkerDescriptor,
    ) -> Result<(), BrokerError> {
        let connection = self.get_mut(id)?;
        if connection.is_worker() {
            return Err(BrokerError::AlreadyWorker);
        }
        if connection.is_authenticated() {
            return Err(BrokerError::RoleConflict);
        }
        connection.set_worker();
        self.workers.insert(id, descriptor);
        Ok(())
    }

    /// Handles of every connection subscribed to exactly `queue`, by id.
    #[must_use]
    pub fn subscribers(&self, queue: &str) -> Vec<ConnectionHandle> {
        self.subscribers
            .get(queue)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.connections.get(id))
                    .map(Connection::handle)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ids subscribed to exactly `queue`, ascending.
    #[must_use]
    pub fn subscriber_ids(&self, queue: &str) -> Vec<ConnectionId> {
        self.subscribers
            .get(queue)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Ids currently authenticated as `identity`, ascending.
    #[must_use]
    pub fn user_connections(&self, identity: &Identity) -> Vec<ConnectionId> {
        self.users
            .get(identity)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn worker(&self, id: ConnectionId) -> Option<&WorkerDescriptor> {
        self.workers.get(&id)
    }

    /// Pick the worker that should handle a request from `user_id`.
    ///
    /// Workers are scanned in ascending connection-id order. For a positive
    /// user id the last worker whose range contains it wins. Otherwise, or
    /// when no range matches, workers take turns through a round-robin
    /// cursor. Returns `None` only when no worker is registered.
    pub fn select_worker(&mut self, user_id: i64) -> Option<WorkerSelection> {
        if self.workers.is_empty() {
            return None;
        }

        let matched = if user_id > 0 {
            self.workers
                .iter()
                .filter(|(_, worker)| worker.users.contains(user_id))
                .map(|(id, _)| *id)
                .last()
        } else {
            None
        };

        let (id, affinity) = match matched {
            Some(id) => (id, true),
            None => {
                let index = self.worker_cursor % self.workers.len();
                self.worker_cursor = self.worker_cursor.wrapping_add(1);
                (*self.workers.keys().nth(index)?, false)
            }
        };

        let handle = self.connections.get(&id)?.handle();
        Some(WorkerSelection { handle, affinity })
    }

    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            connections: self.connections.len(),
            queues: self.subscribers.len(),
            subscriptions: self.subscribers.values().map(BTreeSet::len).sum(),
            users: self.users.len(),
            workers: self.workers.len(),
        }
    }
}
