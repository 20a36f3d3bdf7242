//! In-memory transport.
//!
//! Frames written to a [`MemoryWriter`] are captured by its paired
//! [`MemoryOutbox`] instead of going to a socket, which makes it possible to
//! drive the broker and inspect every delivery without any I/O.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::{CloseSignal, FrameWriter, TransportError};

/// Create a connected writer/outbox pair.
#[must_use]
pub fn channel() -> (Arc<MemoryWriter>, MemoryOutbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let signal = CloseSignal::new();
    (
        Arc::new(MemoryWriter {
            tx,
            signal: Arc::clone(&signal),
        }),
        MemoryOutbox { rx, signal },
    )
}

/// Writer half that captures frames in memory.
#[derive(Debug)]
pub struct MemoryWriter {
    tx: mpsc::UnboundedSender<Bytes>,
    signal: Arc<CloseSignal>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send_raw(&self, data: Bytes) -> Result<(), TransportError> {
        if !self.signal.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        self.tx
            .send(data)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.signal.close();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.signal.is_open()
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

/// Receiving side of a [`MemoryWriter`].
#[derive(Debug)]
pub struct MemoryOutbox {
    rx: mpsc::UnboundedReceiver<Bytes>,
    signal: Arc<CloseSignal>,
}

impl MemoryOutbox {
    /// Take the next captured frame, if any.
    pub fn try_next(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Take every captured frame.
    pub fn drain(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Check whether the writer was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.signal.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_capture() {
        let (writer, mut outbox) = channel();

        writer.send_raw(Bytes::from_static(b"one\n")).await.unwrap();
        writer.send_raw(Bytes::from_static(b"two\n")).await.unwrap();

        assert_eq!(outbox.try_next().as_deref(), Some(&b"one\n"[..]));
        assert_eq!(outbox.drain().len(), 1);
        assert!(outbox.try_next().is_none());
    }

    #[tokio::test]
    async fn test_memory_close() {
        let (writer, outbox) = channel();
        assert!(!outbox.is_closed());

        writer.close().await.unwrap();
        assert!(outbox.is_closed());
        assert!(!writer.is_open());
        assert!(matches!(
            writer.send_raw(Bytes::from_static(b"late\n")).await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
