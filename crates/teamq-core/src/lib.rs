//! # teamq-core
//!
//! Routing tables, authentication and the broker engine for TeaMQ.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Connection** - Per-socket identity, worker role and subscriptions
//! - **RoutingTables** - Connection registry plus subscription, user and worker indices
//! - **Broker** - Built-in commands, publish/forward dispatch and lifecycle hooks
//! - **Authenticator** - Token verification against an HTTP identity service
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌───────────────┐
//! │  Transport  │────▶│   Broker    │────▶│ RoutingTables │
//! └─────────────┘     └─────────────┘     └───────────────┘
//!                       │         │               │
//!                       ▼         ▼               ▼
//!              ┌───────────────┐ ┌──────────────────┐
//!              │ Authenticator │ │ ConnectionHandle │
//!              └───────────────┘ └──────────────────┘
//! ```

pub mod auth;
pub mod broker;
pub mod command;
pub mod connection;
pub mod error;
pub mod identity;
pub mod tables;
pub mod worker;

pub use auth::{AuthConfig, AuthError, Authenticator, HttpAuthenticator};
pub use broker::{Broker, BrokerConfig, FrameOutcome, RoutingMode};
pub use command::Command;
pub use connection::{Connection, ConnectionHandle, ConnectionId};
pub use error::BrokerError;
pub use identity::{Identity, IdentityKind};
pub use tables::{BrokerStats, RoutingTables, WorkerSelection};
pub use worker::{UserRange, WorkerDescriptor};
