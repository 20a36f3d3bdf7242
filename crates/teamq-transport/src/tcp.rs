//! TCP transport implementation.
//!
//! Frames are newline-delimited; each connection is split into an owned read
//! half and a write half guarded by a per-connection lock.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use teamq_protocol::codec;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::traits::{Accepted, CloseSignal, FrameReader, FrameWriter, Transport, TransportError};

/// TCP transport configuration.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum line length in bytes.
    pub max_message_size: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_message_size: codec::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// TCP transport.
pub struct TcpTransport {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpTransport {
    /// Create a new TCP transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: TcpConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr).await?;

        info!("TCP transport listening on {}", config.bind_addr);

        Ok(Self { listener, config })
    }

    /// Create a new TCP transport with default limits.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(TcpConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn accept(&self) -> Result<Accepted, TransportError> {
        let (stream, addr) = self.listener.accept().await?;

        debug!("Accepted TCP connection from {}", addr);

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        let (read, write) = stream.into_split();
        let signal = CloseSignal::new();

        Ok(Accepted {
            reader: Box::new(TcpReader {
                read,
                buffer: BytesMut::with_capacity(4096),
                max_message_size: self.config.max_message_size,
                signal: Arc::clone(&signal),
            }),
            writer: Arc::new(TcpWriter {
                write: Mutex::new(write),
                remote_addr: addr,
                signal,
            }),
        })
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// Read half of a TCP connection.
pub struct TcpReader {
    read: OwnedReadHalf,
    buffer: BytesMut,
    max_message_size: usize,
    signal: Arc<CloseSignal>,
}

#[async_trait]
impl FrameReader for TcpReader {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            if let Some(line) = codec::decode_line(&mut self.buffer, self.max_message_size)? {
                return Ok(Some(line));
            }

            if !self.signal.is_open() {
                return Ok(None);
            }

            tokio::select! {
                () = self.signal.closed() => {
                    debug!("Connection closed locally");
                    return Ok(None);
                }
                read = self.read.read_buf(&mut self.buffer) => {
                    match read {
                        Ok(0) => {
                            self.signal.close();
                            // An unterminated final line still counts as a frame.
                            if self.buffer.is_empty() {
                                return Ok(None);
                            }
                            return Ok(Some(self.buffer.split().freeze()));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            self.signal.close();
                            return Err(TransportError::Io(e));
                        }
                    }
                }
            }
        }
    }
}

/// Write half of a TCP connection.
pub struct TcpWriter {
    write: Mutex<OwnedWriteHalf>,
    remote_addr: SocketAddr,
    signal: Arc<CloseSignal>,
}

#[async_trait]
impl FrameWriter for TcpWriter {
    async fn send_raw(&self, data: Bytes) -> Result<(), TransportError> {
        if !self.signal.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        let mut write = self.write.lock().await;
        write
            .write_all(&data)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.signal.close() {
            return Ok(()); // Already closed
        }

        let mut write = self.write.lock().await;
        write.shutdown().await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.signal.is_open()
    }

    fn remote_addr(&self) -> Option<String> {
        Some(self.remote_addr.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpStream;

    async fn local_transport(max_message_size: usize) -> TcpTransport {
        TcpTransport::new(TcpConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_message_size,
        })
        .await
        .unwrap()
    }

    #[test]
    fn test_tcp_config_default() {
        let config = TcpConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.max_message_size, 64 * 1024);
    }

    #[tokio::test]
    async fn test_recv_lines() {
        let transport = local_transport(1024).await;
        let addr = transport.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut accepted = transport.accept().await.unwrap();

        client.write_all(b"{\"queue\":\"a\"}\n{\"queue\":").await.unwrap();
        client.write_all(b"\"b\"}\r\ntail").await.unwrap();
        client.shutdown().await.unwrap();

        let first = accepted.reader.recv().await.unwrap().unwrap();
        assert_eq!(&first[..], br#"{"queue":"a"}"#);
        let second = accepted.reader.recv().await.unwrap().unwrap();
        assert_eq!(&second[..], br#"{"queue":"b"}"#);
        let tail = accepted.reader.recv().await.unwrap().unwrap();
        assert_eq!(&tail[..], b"tail");
        assert!(accepted.reader.recv().await.unwrap().is_none());
        assert!(!accepted.writer.is_open());
    }

    #[tokio::test]
    async fn test_send_and_close() {
        let transport = local_transport(1024).await;
        let addr = transport.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let mut accepted = transport.accept().await.unwrap();
        assert!(accepted.writer.remote_addr().is_some());

        accepted
            .writer
            .send_raw(Bytes::from_static(b"{\"code\":200}\n"))
            .await
            .unwrap();

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("{\"code\":200}"));

        accepted.writer.close().await.unwrap();
        let ended = tokio::time::timeout(Duration::from_secs(1), accepted.reader.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(ended.is_none());
        assert!(matches!(
            accepted.writer.send_raw(Bytes::from_static(b"x\n")).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_do_not_interleave() {
        const TASKS: usize = 16;
        const FRAMES: usize = 8;
        const PAD: usize = 32 * 1024;

        let transport = local_transport(1024).await;
        let addr = transport.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let accepted = transport.accept().await.unwrap();

        let mut senders = Vec::new();
        for task in 0..TASKS {
            let writer = Arc::clone(&accepted.writer);
            senders.push(tokio::spawn(async move {
                for seq in 0..FRAMES {
                    let mut line = serde_json::json!({
                        "task": task,
                        "seq": seq,
                        "pad": "x".repeat(PAD),
                    })
                    .to_string();
                    line.push('\n');
                    writer.send_raw(Bytes::from(line)).await.unwrap();
                }
            }));
        }

        let mut lines = BufReader::new(client).lines();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..TASKS * FRAMES {
            let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            let frame: serde_json::Value = serde_json::from_str(&line).unwrap();
            assert_eq!(frame["pad"].as_str().unwrap().len(), PAD);
            let key = (frame["task"].as_u64().unwrap(), frame["seq"].as_u64().unwrap());
            assert!(seen.insert(key), "duplicate frame {key:?}");
        }
        assert_eq!(seen.len(), TASKS * FRAMES);

        for sender in senders {
            sender.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_oversized_line() {
        let transport = local_transport(8).await;
        let addr = transport.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut accepted = transport.accept().await.unwrap();

        client.write_all(b"0123456789abcdef").await.unwrap();
        assert!(matches!(
            accepted.reader.recv().await,
            Err(TransportError::Protocol(_))
        ));
    }
}
