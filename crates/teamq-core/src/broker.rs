//! The broker engine.
//!
//! The broker receives three kinds of events from the transport layer: a
//! connection was accepted, a frame arrived, a connection went away. Frames
//! addressed to a built-in queue run a [`Command`]; everything else is either
//! published to the queue's subscribers or forwarded to a worker.
//!
//! All routing state lives in one [`RoutingTables`] behind one lock. The lock
//! is never held across an await: recipients are collected while holding it
//! and written to after it is released.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use teamq_protocol::{codec, queues, Message};
use teamq_transport::FrameWriter;
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::command::Command;
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::error::BrokerError;
use crate::identity::{Identity, IdentityKind};
use crate::tables::{BrokerStats, RoutingTables};
use crate::worker::WorkerDescriptor;

/// How non-built-in messages are routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Every message is broadcast to the queue's subscribers.
    PubSub,
    /// Messages from workers are broadcast; everything else is forwarded to
    /// one worker, chosen by user affinity.
    #[default]
    Workers,
}

impl RoutingMode {
    /// Representation of user ids in this mode.
    #[must_use]
    pub fn identity_kind(self) -> IdentityKind {
        match self {
            RoutingMode::PubSub => IdentityKind::Text,
            RoutingMode::Workers => IdentityKind::Numeric,
        }
    }
}

/// Broker configuration.
#[derive(Debug, Clone, Default)]
pub struct BrokerConfig {
    /// Routing mode.
    pub mode: RoutingMode,
    /// Require connections to authenticate before publishing to user queues.
    pub auth_enabled: bool,
    /// Keys accepted by `$tea.worker.register`.
    pub worker_keys: HashSet<String>,
}

/// What the broker did with one inbound frame.
#[derive(Debug)]
pub enum FrameOutcome {
    /// Blank line, nothing to do.
    Ignored,
    /// A built-in command ran successfully.
    Command(Command),
    /// The frame was refused; the sender received an error envelope.
    Rejected(BrokerError),
    /// Broadcast to the queue's subscribers.
    Published {
        /// Connections the message was written to.
        recipients: usize,
    },
    /// Forwarded to a single worker.
    Forwarded {
        worker: ConnectionId,
        /// Whether the worker was picked by its user range.
        affinity: bool,
    },
    /// No worker was available; the message was discarded.
    Dropped,
}

/// Sender state captured at the start of a frame.
struct Sender {
    handle: ConnectionHandle,
    identity: Option<Identity>,
    is_worker: bool,
}

impl Sender {
    fn id(&self) -> ConnectionId {
        self.handle.id()
    }
}

/// The TeaMQ broker engine.
pub struct Broker {
    tables: Mutex<RoutingTables>,
    config: BrokerConfig,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl Broker {
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        info!(
            mode = ?config.mode,
            auth = config.auth_enabled,
            worker_keys = config.worker_keys.len(),
            "Creating broker"
        );
        Self {
            tables: Mutex::new(RoutingTables::new()),
            config,
            authenticator: None,
        }
    }

    /// Attach the authenticator used by `$tea.connection.auth`.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Register an accepted connection and return its id.
    pub fn accept(&self, writer: Arc<dyn FrameWriter>) -> ConnectionId {
        let remote = writer.remote_addr();
        let id = self.tables.lock().insert_connection(writer).id();
        info!(connection = id, remote = ?remote, "Accepted connection");
        id
    }

    /// Tear down a connection. Returns `false` if it was already gone.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let removed = self.tables.lock().remove_connection(id);
        match removed {
            Some(connection) => {
                info!(
                    connection = id,
                    user = ?connection.identity(),
                    worker = connection.is_worker(),
                    "Connection closed"
                );
                true
            }
            None => false,
        }
    }

    /// Handle one inbound frame from `id`.
    ///
    /// Errors are answered to the sender and reported as
    /// [`FrameOutcome::Rejected`]; none of them closes the connection.
    pub async fn handle_frame(&self, id: ConnectionId, frame: &[u8]) -> FrameOutcome {
        if frame.iter().all(u8::is_ascii_whitespace) {
            return FrameOutcome::Ignored;
        }

        let Some(sender) = self.sender(id) else {
            debug!(connection = id, "Frame from unknown connection");
            return FrameOutcome::Rejected(BrokerError::UnknownConnection(id));
        };

        match self.route(&sender, frame).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(connection = id, error = %err, "Rejected frame");
                if let Err(e) = sender.handle.respond_error(&err.to_string()).await {
                    debug!(connection = id, error = %e, "Failed to send error response");
                }
                FrameOutcome::Rejected(err)
            }
        }
    }

    fn sender(&self, id: ConnectionId) -> Option<Sender> {
        let tables = self.tables.lock();
        let connection = tables.get(id)?;
        Some(Sender {
            handle: connection.handle(),
            identity: connection.identity().cloned(),
            is_worker: connection.is_worker(),
        })
    }

    async fn route(&self, sender: &Sender, frame: &[u8]) -> Result<FrameOutcome, BrokerError> {
        let message = codec::decode(frame)?;
        if message.queue.is_empty() {
            return Err(BrokerError::EmptyQueue);
        }

        let command = Command::resolve(&message.queue, self.config.mode);
        self.check_access(sender, command)?;

        if let Some(command) = command {
            debug!(connection = sender.id(), command = %command, "Running command");
            self.run_command(sender, command, &message).await?;
            return Ok(FrameOutcome::Command(command));
        }

        if queues::is_reserved(&message.queue) {
            return Err(BrokerError::UnknownCommand(message.queue));
        }

        Ok(self.dispatch(sender, message).await)
    }

    /// Built-in commands are always reachable; everything else needs an
    /// identity or the worker role while authentication is enforced.
    fn check_access(&self, sender: &Sender, command: Option<Command>) -> Result<(), BrokerError> {
        if command.is_some()
            || !self.config.auth_enabled
            || sender.identity.is_some()
            || sender.is_worker
        {
            return Ok(());
        }
        Err(BrokerError::AuthRequired)
    }

    async fn run_command(
        &self,
        sender: &Sender,
        command: Command,
        message: &Message,
    ) -> Result<(), BrokerError> {
        match command {
            Command::Subscribe => self.subscribe(sender, message).await,
            Command::Unsubscribe => self.unsubscribe(sender, message).await,
            Command::Quit => {
                info!(connection = sender.id(), "Connection requested quit");
                if let Err(e) = sender.handle.close().await {
                    debug!(connection = sender.id(), error = %e, "Close failed");
                }
                Ok(())
            }
            Command::Auth => self.authenticate(sender, message).await,
            Command::WorkerRegister => self.register_worker(sender, message).await,
        }
    }

    async fn subscribe(&self, sender: &Sender, message: &Message) -> Result<(), BrokerError> {
        let queue = subscription_queue(message)?;
        if queues::is_reserved(queue) {
            return Err(BrokerError::ReservedQueue(queue.to_string()));
        }

        let added = self.tables.lock().subscribe(sender.id(), queue)?;
        if added {
            debug!(connection = sender.id(), queue = %queue, "Subscribed");
            respond_ok(&sender.handle).await;
        }
        Ok(())
    }

    async fn unsubscribe(&self, sender: &Sender, message: &Message) -> Result<(), BrokerError> {
        let queue = subscription_queue(message)?;
        let removed = self.tables.lock().unsubscribe(sender.id(), queue)?;
        if removed {
            debug!(connection = sender.id(), queue = %queue, "Unsubscribed");
        }
        respond_ok(&sender.handle).await;
        Ok(())
    }

    async fn authenticate(&self, sender: &Sender, message: &Message) -> Result<(), BrokerError> {
        if !self.config.auth_enabled {
            return Err(BrokerError::AuthDisabled);
        }
        let token = message
            .str_field("token")
            .filter(|token| !token.is_empty())
            .ok_or(BrokerError::MissingToken)?;
        if sender.identity.is_some() {
            return Err(BrokerError::AlreadyAuthenticated);
        }
        if sender.is_worker {
            return Err(BrokerError::RoleConflict);
        }

        let Some(authenticator) = self.authenticator.as_ref() else {
            error!(
                connection = sender.id(),
                "Authentication is enabled but no authenticator is configured"
            );
            return Err(BrokerError::AuthFailed);
        };

        let kind = self.config.mode.identity_kind();
        let identity = match authenticator.authenticate(token, kind).await {
            Ok(identity) if identity.kind() == kind => identity,
            Ok(identity) => {
                warn!(
                    connection = sender.id(),
                    user = %identity,
                    expected = ?kind,
                    "Authenticator returned the wrong kind of user id"
                );
                return Err(BrokerError::AuthFailed);
            }
            Err(e) => {
                warn!(connection = sender.id(), error = %e, "Authentication failed");
                return Err(BrokerError::AuthFailed);
            }
        };

        self.tables.lock().bind_identity(sender.id(), identity.clone())?;
        info!(connection = sender.id(), user = %identity, "Authenticated");
        respond_ok(&sender.handle).await;
        Ok(())
    }

    async fn register_worker(&self, sender: &Sender, message: &Message) -> Result<(), BrokerError> {
        let key = message
            .str_field("key")
            .filter(|key| !key.is_empty())
            .ok_or(BrokerError::MissingWorkerKey)?;
        if !self.config.worker_keys.contains(key) {
            return Err(BrokerError::InvalidWorkerKey(key.to_string()));
        }

        let descriptor = WorkerDescriptor::from_message(message);
        let users = descriptor.users;
        self.tables.lock().register_worker(sender.id(), descriptor)?;
        info!(
            connection = sender.id(),
            min_user = users.min,
            max_user = users.max,
            "Registered worker"
        );
        respond_ok(&sender.handle).await;
        Ok(())
    }

    async fn dispatch(&self, sender: &Sender, mut message: Message) -> FrameOutcome {
        message.pattern = message.queue.clone();
        message.from_user_id = sender
            .identity
            .as_ref()
            .and_then(Identity::numeric)
            .unwrap_or_default();

        if self.config.mode == RoutingMode::PubSub || sender.is_worker {
            self.publish(sender, &message).await
        } else {
            self.forward(sender, &message).await
        }
    }

    async fn publish(&self, sender: &Sender, message: &Message) -> FrameOutcome {
        let targets = self.tables.lock().subscribers(&message.queue);
        if targets.is_empty() {
            debug!(connection = sender.id(), queue = %message.queue, "No subscribers");
            return FrameOutcome::Published { recipients: 0 };
        }

        let mut recipients = 0;
        for target in targets {
            if deliver(&target, message).await {
                recipients += 1;
            }
        }
        debug!(
            connection = sender.id(),
            queue = %message.queue,
            recipients,
            "Published"
        );
        FrameOutcome::Published { recipients }
    }

    async fn forward(&self, sender: &Sender, message: &Message) -> FrameOutcome {
        let selection = self.tables.lock().select_worker(message.from_user_id);
        let Some(selection) = selection else {
            warn!(
                connection = sender.id(),
                queue = %message.queue,
                "No worker available, dropping message"
            );
            return FrameOutcome::Dropped;
        };

        let worker = selection.handle.id();
        deliver(&selection.handle, message).await;
        debug!(
            connection = sender.id(),
            queue = %message.queue,
            user = message.from_user_id,
            worker,
            affinity = selection.affinity,
            "Forwarded"
        );
        FrameOutcome::Forwarded {
            worker,
            affinity: selection.affinity,
        }
    }

    /// Get table statistics.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        self.tables.lock().stats()
    }

    /// Ids subscribed to `queue`, ascending.
    #[must_use]
    pub fn subscribers(&self, queue: &str) -> Vec<ConnectionId> {
        self.tables.lock().subscriber_ids(queue)
    }

    /// Ids authenticated as `identity`, ascending.
    #[must_use]
    pub fn user_connections(&self, identity: &Identity) -> Vec<ConnectionId> {
        self.tables.lock().user_connections(identity)
    }

    #[must_use]
    pub fn identity(&self, id: ConnectionId) -> Option<Identity> {
        self.tables.lock().get(id)?.identity().cloned()
    }

    #[must_use]
    pub fn worker(&self, id: ConnectionId) -> Option<WorkerDescriptor> {
        self.tables.lock().worker(id).cloned()
    }

    /// Queues `id` is subscribed to, sorted. Empty for unknown ids.
    #[must_use]
    pub fn queues(&self, id: ConnectionId) -> Vec<String> {
        self.tables
            .lock()
            .get(id)
            .map(|connection| connection.queues())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.tables.lock().contains(id)
    }
}

fn subscription_queue(message: &Message) -> Result<&str, BrokerError> {
    message
        .str_field("queue")
        .map(str::trim)
        .filter(|queue| !queue.is_empty())
        .ok_or(BrokerError::MissingSubscriptionQueue)
}

async fn respond_ok(handle: &ConnectionHandle) {
    if let Err(e) = handle.respond_success("ok").await {
        debug!(connection = handle.id(), error = %e, "Failed to send response");
    }
}

/// Encode a fresh copy of `message` and write it. Returns `true` on success.
async fn deliver(target: &ConnectionHandle, message: &Message) -> bool {
    let frame = match codec::encode(message) {
        Ok(frame) => frame,
        Err(e) => {
            error!(queue = %message.queue, error = %e, "Failed to encode message");
            return false;
        }
    };
    match target.write(frame).await {
        Ok(()) => true,
        Err(e) => {
            debug!(connection = target.id(), error = %e, "Delivery failed");
            false
        }
    }
}
