//! # teamq-transport
//!
//! Transport abstraction layer for the TeaMQ broker.
//!
//! A transport accepts connections and splits each one into a
//! [`FrameReader`] owned by the connection's read loop and a shareable
//! [`FrameWriter`] that any task may use to deliver frames:
//!
//! - **TCP** - newline-delimited frames over a socket
//! - **Memory** - captured frames, used to drive the broker in tests
//!
//! ```rust,ignore
//! use teamq_transport::{TcpTransport, Transport};
//!
//! let accepted = transport.accept().await?;
//! let mut reader = accepted.reader;
//! while let Some(line) = reader.recv().await? {
//!     // Hand the line to the broker
//! }
//! ```

pub mod memory;
pub mod tcp;
pub mod traits;

pub use tcp::{TcpConfig, TcpTransport};
pub use traits::{Accepted, CloseSignal, FrameReader, FrameWriter, Transport, TransportError};
