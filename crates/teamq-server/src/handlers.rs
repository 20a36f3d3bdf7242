//! Connection handlers for the TeaMQ server.
//!
//! This module runs the accept loop and one read loop per connection,
//! handing every line to the broker.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard, MeteredWriter};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use teamq_core::{Broker, FrameOutcome, HttpAuthenticator};
use teamq_protocol::Response;
use teamq_transport::{Accepted, FrameWriter, TcpTransport, Transport, TransportError};
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Build the broker described by `config`.
///
/// # Errors
///
/// Returns an error if the identity service client cannot be created.
pub fn build_broker(config: &Config) -> Result<Broker> {
    let mut broker = Broker::new(config.broker_config());
    if let Some(auth) = config.auth_config() {
        let authenticator =
            HttpAuthenticator::new(auth).context("Failed to create identity service client")?;
        let auth = authenticator.config();
        info!(
            "Authenticating tokens against {} (field {}, timeout {:?})",
            auth.endpoint, auth.token_field, auth.timeout
        );
        broker = broker.with_authenticator(Arc::new(authenticator));
    }
    Ok(broker)
}

/// Run the TCP broker until interrupted.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let broker = Arc::new(build_broker(&config)?);
    let tcp_config = config.tcp_config()?;
    let addr = tcp_config.bind_addr;
    let transport = TcpTransport::new(tcp_config)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(
        "TeaMQ listening on {} ({:?} mode)",
        addr,
        broker.config().mode
    );

    tokio::select! {
        result = serve(transport, broker) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

/// Accept connections forever, spawning a read loop for each.
///
/// # Errors
///
/// Never returns in normal operation; accept failures are logged and retried.
pub async fn serve<T: Transport>(transport: T, broker: Arc<Broker>) -> Result<()> {
    loop {
        match transport.accept().await {
            Ok(accepted) => {
                tokio::spawn(handle_connection(accepted, Arc::clone(&broker)));
            }
            Err(e) => {
                warn!(transport = transport.name(), error = %e, "Accept failed");
                metrics::record_error("accept");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Drive one connection until it closes, then tear it down.
async fn handle_connection(accepted: Accepted, broker: Arc<Broker>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let Accepted { mut reader, writer } = accepted;
    let writer: Arc<dyn FrameWriter> = Arc::new(MeteredWriter::new(writer));
    let id = broker.accept(Arc::clone(&writer));

    loop {
        match reader.recv().await {
            Ok(Some(frame)) => {
                let start = Instant::now();
                metrics::record_frame(frame.len(), "inbound");

                let outcome = broker.handle_frame(id, &frame).await;
                metrics::record_outcome(&outcome);
                if matches!(outcome, FrameOutcome::Command(_)) {
                    metrics::set_broker_stats(broker.stats());
                }

                metrics::record_latency(start.elapsed().as_secs_f64());
            }
            Ok(None) => {
                debug!(connection = id, "Stream ended");
                break;
            }
            Err(TransportError::Protocol(e)) => {
                warn!(connection = id, error = %e, "Protocol error, closing connection");
                metrics::record_error("protocol");
                if let Ok(data) = Response::error(e.to_string()).encode() {
                    if let Err(e) = writer.send_raw(data).await {
                        debug!(connection = id, error = %e, "Failed to send error response");
                    }
                }
                break;
            }
            Err(e) => {
                warn!(connection = id, error = %e, "Read failed");
                metrics::record_error("transport");
                break;
            }
        }
    }

    if let Err(e) = writer.close().await {
        debug!(connection = id, error = %e, "Close failed");
    }
    broker.disconnect(id);
    metrics::set_broker_stats(broker.stats());
}
