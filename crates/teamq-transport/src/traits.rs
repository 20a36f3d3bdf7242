//! Transport abstraction traits for TeaMQ.
//!
//! These traits define the interface that all transport implementations must provide,
//! allowing the broker to be transport-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] teamq_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A transport that can accept connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection.
    ///
    /// This method waits until a new connection is available or an error occurs.
    async fn accept(&self) -> Result<Accepted, TransportError>;

    /// Get the transport name (e.g., "tcp").
    fn name(&self) -> &'static str;
}

/// A freshly accepted connection, split into its two directions.
pub struct Accepted {
    /// Inbound half, owned by the connection's read loop.
    pub reader: Box<dyn FrameReader>,
    /// Outbound half, shared by every task routing to this connection.
    pub writer: Arc<dyn FrameWriter>,
}

/// Inbound half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next line, without its delimiter.
    ///
    /// Returns `None` once the peer closed the connection or the writer half
    /// was closed locally.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// Outbound half of a connection.
///
/// Implementations serialize concurrent writers so frames never interleave.
#[async_trait]
pub trait FrameWriter: Send + Sync {
    /// Write one pre-encoded frame.
    async fn send_raw(&self, data: Bytes) -> Result<(), TransportError>;

    /// Close the connection. The paired reader observes end of stream.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

/// Close state shared by the two halves of a connection.
#[derive(Debug)]
pub struct CloseSignal {
    open: AtomicBool,
    notify: Notify,
}

impl CloseSignal {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(true),
            notify: Notify::new(),
        })
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Mark closed and wake the reader. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        if was_open {
            // notify_one stores a permit, so a reader that has not started
            // waiting yet still observes the close.
            self.notify.notify_one();
        }
        was_open
    }

    /// Wait until [`close`](Self::close) is called.
    pub async fn closed(&self) {
        if !self.is_open() {
            return;
        }
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_close_signal_once() {
        let signal = CloseSignal::new();
        assert!(signal.is_open());
        assert!(signal.close());
        assert!(!signal.close());
        assert!(!signal.is_open());
    }

    #[tokio::test]
    async fn test_close_signal_wakes_waiter() {
        let signal = CloseSignal::new();
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.closed().await })
        };

        signal.close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_before_wait() {
        let signal = CloseSignal::new();
        signal.close();
        tokio::time::timeout(Duration::from_secs(1), signal.closed())
            .await
            .unwrap();
    }
}
