//! Best-effort telemetry link.
//!
//! Each guidance sample is flattened to one CSV line and pushed to a remote
//! collector.  Delivery is never allowed to slow the sensor stream: when a
//! send is already in flight the new record is skipped, and failures are
//! logged and forgotten.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use beacon_types::{GuidanceError, TelemetryRecord};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// A transport that can carry one newline-terminated record.
#[async_trait]
pub trait TelemetryTransport: Send + Sync + 'static {
    async fn send(&self, line: String) -> Result<(), GuidanceError>;
}

/// Opens a fresh TCP connection per record, writes it, and closes it.
#[derive(Debug, Clone)]
pub struct TcpTelemetryTransport {
    address: String,
    connect_timeout: Duration,
}

impl TcpTelemetryTransport {
    pub fn new(host: &str, port: u16, connect_timeout: Duration) -> Self {
        Self {
            address: format!("{host}:{port}"),
            connect_timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl TelemetryTransport for TcpTelemetryTransport {
    async fn send(&self, line: String) -> Result<(), GuidanceError> {
        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| GuidanceError::Transport(format!("connect to {} timed out", self.address)))?
            .map_err(|e| GuidanceError::Transport(format!("connect to {}: {e}", self.address)))?;

        stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| GuidanceError::Transport(format!("write to {}: {e}", self.address)))?;
        stream
            .shutdown()
            .await
            .map_err(|e| GuidanceError::Transport(format!("close {}: {e}", self.address)))
    }
}

/// Counters exposed to hosts for status output.
#[derive(Debug, Default)]
pub struct TelemetryStats {
    pub sent: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
}

/// Fire-and-forget dispatcher with a single in-flight slot.
#[derive(Clone)]
pub struct TelemetryDispatcher {
    transport: Arc<dyn TelemetryTransport>,
    in_flight: Arc<AtomicBool>,
    stats: Arc<TelemetryStats>,
    runtime: Handle,
}

impl TelemetryDispatcher {
    pub fn new(transport: Arc<dyn TelemetryTransport>, runtime: Handle) -> Self {
        Self {
            transport,
            in_flight: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(TelemetryStats::default()),
            runtime,
        }
    }

    /// Start sending `record` unless a previous send is still running.
    ///
    /// Returns `false` when the record was skipped.
    pub fn dispatch(&self, record: &TelemetryRecord) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(timestamp = record.timestamp, "telemetry busy, record skipped");
            return false;
        }

        let line = record.to_csv_line();
        let transport = Arc::clone(&self.transport);
        let in_flight = Arc::clone(&self.in_flight);
        let stats = Arc::clone(&self.stats);
        self.runtime.spawn(async move {
            match transport.send(line).await {
                Ok(()) => {
                    stats.sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "telemetry send failed");
                }
            }
            in_flight.store(false, Ordering::Release);
        });
        true
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &TelemetryStats {
        &self.stats
    }
}
