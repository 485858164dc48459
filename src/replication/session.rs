//! Replication session
//!
//! Owns the replication-mode connection and drives the stream: ensures the
//! slot exists, starts replication against the configured publication, pumps
//! COPY-BOTH frames through the decoder, forwards events into the bounded
//! queue, and acknowledges progress back to the server.

use crate::core::{CdcConfig, CdcError, CdcResult};
use crate::events::CdcEvent;
use crate::protocol::messages::{Keepalive, StandbyStatusUpdate, TAG_KEEPALIVE, TAG_XLOG_DATA, XLogData};
use crate::protocol::{INVALID_XLOG_REC_PTR, PgOutputDecoder};
use crate::replication::state::StreamState;
use crate::utils::connection::{CopyData, PgConnection, SQLSTATE_DUPLICATE_OBJECT};
use crate::utils::timestamp::to_postgres_timestamp;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Idle poll interval while the server has no data
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Session lifecycle phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connected,
    SlotReady,
    Streaming,
    Stopped,
}

/// Escalates repeated protocol violations to a fatal error.
///
/// A single corrupt frame is skipped; an unbroken run of them means the
/// stream itself is unreadable and continuing would only spin.
#[derive(Debug)]
pub struct ViolationCircuit {
    consecutive: u32,
    limit: u32,
}

impl ViolationCircuit {
    pub fn new(limit: u32) -> Self {
        Self {
            consecutive: 0,
            limit,
        }
    }

    /// Record one violation; returns true when the circuit trips
    pub fn record(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= self.limit
    }

    /// A successfully processed frame resets the run
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Drives one logical replication stream end to end
pub struct ReplicationSession {
    config: CdcConfig,
    connection: Option<PgConnection>,
    decoder: PgOutputDecoder,
    state: StreamState,
    phase: SessionPhase,
    circuit: ViolationCircuit,
    shutdown: Arc<AtomicBool>,
}

impl ReplicationSession {
    pub fn new(config: CdcConfig, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            config,
            connection: None,
            decoder: PgOutputDecoder::new(),
            state: StreamState::new(),
            phase: SessionPhase::Disconnected,
            circuit: ViolationCircuit::new(5),
            shutdown,
        }
    }

    #[allow(unused)]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Request a cooperative stop; the pump exits at the next frame boundary
    #[allow(unused)]
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Connect → ensure slot → stream until stopped or a fatal error.
    pub async fn run(&mut self, events: mpsc::Sender<CdcEvent>) -> CdcResult<()> {
        self.connect()?;
        self.ensure_slot()?;
        self.start(events).await
    }

    /// Open the replication-mode connection.
    pub fn connect(&mut self) -> CdcResult<()> {
        info!(
            "Connecting to PostgreSQL at {}:{}/{}",
            self.config.host, self.config.port, self.config.database
        );

        let connection = PgConnection::connect(&self.config.replication_conninfo())?;
        self.connection = Some(connection);
        self.phase = SessionPhase::Connected;

        info!("Replication connection established");
        Ok(())
    }

    /// Create the replication slot, reusing it when it already exists.
    ///
    /// Any failure other than duplicate-object is fatal: without a slot the
    /// server retains no replay cursor for this consumer.
    pub fn ensure_slot(&mut self) -> CdcResult<()> {
        let slot_name = self.config.slot_name.clone();
        let create_slot_sql = format!(
            "CREATE_REPLICATION_SLOT \"{}\" LOGICAL pgoutput NOEXPORT_SNAPSHOT;",
            slot_name
        );

        let result = self.connection()?.exec(&create_slot_sql)?;

        if result.is_ok() {
            info!("Created replication slot: {}", slot_name);
        } else if result.sqlstate().as_deref() == Some(SQLSTATE_DUPLICATE_OBJECT) {
            info!("Replication slot '{}' already exists, reusing it", slot_name);
        } else {
            return Err(CdcError::slot(format!(
                "Failed to create replication slot '{}': {}",
                slot_name,
                result
                    .error_message()
                    .unwrap_or_else(|| format!("status {:?}", result.status()))
            )));
        }

        self.phase = SessionPhase::SlotReady;
        Ok(())
    }

    /// Start streaming and pump frames until stopped.
    pub async fn start(&mut self, events: mpsc::Sender<CdcEvent>) -> CdcResult<()> {
        let start_replication_sql = format!(
            "START_REPLICATION SLOT \"{}\" LOGICAL 0/0 (proto_version '1', publication_names '{}');",
            self.config.slot_name, self.config.publication_name
        );

        info!(
            "Starting replication on slot '{}' with publication '{}'",
            self.config.slot_name, self.config.publication_name
        );

        let result = self.connection()?.exec(&start_replication_sql)?;
        if !result.is_copy_both() {
            return Err(CdcError::protocol(format!(
                "START_REPLICATION did not enter COPY-BOTH mode: {}",
                result
                    .error_message()
                    .unwrap_or_else(|| format!("status {:?}", result.status()))
            )));
        }

        self.phase = SessionPhase::Streaming;
        info!("Streaming started, listening for changes");

        let outcome = self.stream_loop(&events).await;
        self.finish();
        outcome
    }

    async fn stream_loop(&mut self, events: &mpsc::Sender<CdcEvent>) -> CdcResult<()> {
        let keepalive_interval = Duration::from_secs(self.config.keepalive_interval_secs);

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("Stop requested, leaving the stream at a frame boundary");
                return Ok(());
            }

            if self.state.feedback_due(keepalive_interval) {
                self.send_feedback()?;
            }

            let copy_data = self.connection()?.poll_copy_data()?;
            match copy_data {
                CopyData::Pending => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                CopyData::Ended => {
                    return Err(CdcError::connection(
                        "Server ended the replication stream",
                    ));
                }
                CopyData::Frame(frame) => {
                    self.handle_frame(&frame, events).await?;
                }
            }
        }
    }

    async fn handle_frame(
        &mut self,
        frame: &[u8],
        events: &mpsc::Sender<CdcEvent>,
    ) -> CdcResult<()> {
        match frame.first().copied() {
            Some(TAG_KEEPALIVE) => self.handle_keepalive(frame),
            Some(TAG_XLOG_DATA) => self.handle_xlog_data(frame, events).await,
            Some(other) => {
                warn!("Ignoring unknown stream message type {:#04x}", other);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn handle_keepalive(&mut self, frame: &[u8]) -> CdcResult<()> {
        let keepalive = Keepalive::parse(frame)?;
        debug!(
            "Keepalive: server WAL end {:x}, reply requested: {}",
            keepalive.wal_end, keepalive.reply_requested
        );

        // Keepalives are answered immediately so an idle stream still
        // confirms liveness and lets the server reclaim WAL.
        self.send_feedback()?;
        Ok(())
    }

    async fn handle_xlog_data(
        &mut self,
        frame: &[u8],
        events: &mpsc::Sender<CdcEvent>,
    ) -> CdcResult<()> {
        let xlog = XLogData::parse(frame)?;

        match self.decoder.decode(xlog.payload) {
            Ok(Some(event)) => {
                debug!(
                    "Decoded {} for {} at {:x}",
                    event.operation,
                    event.qualified_table(),
                    xlog.wal_start
                );

                // Backpressure point: when the queue is full this send
                // suspends the pump and the socket goes unread.
                if events.send(event).await.is_err() {
                    return Err(CdcError::handler(
                        "Event queue closed while the stream was active",
                    ));
                }

                self.circuit.reset();
                // Only advanced after the enqueue so the acknowledged
                // position never passes an undelivered event.
                self.state.advance(xlog.wal_end);
                self.send_feedback()?;
            }
            Ok(None) => {
                self.circuit.reset();
                self.state.advance(xlog.wal_end);
                self.send_feedback()?;
            }
            Err(e) if e.is_protocol_violation() => {
                error!(
                    "Protocol violation ({} consecutive): {}; frame: {}",
                    self.circuit.consecutive() + 1,
                    e,
                    hex::encode(xlog.payload)
                );
                if self.circuit.record() {
                    return Err(CdcError::protocol(format!(
                        "{} consecutive protocol violations, aborting the stream",
                        self.circuit.consecutive()
                    )));
                }
                // Frame skipped; the watermark does not move past it
            }
            Err(e) => return Err(e),
        }

        Ok(())
    }

    /// Acknowledge the current watermark as both written and flushed.
    fn send_feedback(&mut self) -> CdcResult<()> {
        let update = StandbyStatusUpdate {
            write_lsn: self.state.flushed_lsn(),
            flush_lsn: self.state.flushed_lsn(),
            apply_lsn: INVALID_XLOG_REC_PTR,
            client_time: to_postgres_timestamp(SystemTime::now()),
            reply_requested: false,
        };

        let mut buf = [0u8; StandbyStatusUpdate::WIRE_SIZE];
        let written = update.write(&mut buf)?;

        let connection = self.connection()?;
        connection.put_copy_data(&buf[..written])?;
        connection.flush()?;

        self.state.mark_feedback_sent();
        debug!("Sent feedback with flushed LSN {:x}", update.flush_lsn);
        Ok(())
    }

    /// Final feedback and resource release on the way out.
    fn finish(&mut self) {
        if self.state.has_progress() {
            if let Err(e) = self.send_feedback() {
                warn!("Failed to send final feedback during shutdown: {}", e);
            }
        }

        self.connection = None;
        self.phase = SessionPhase::Stopped;
        info!("Replication session stopped");
    }

    fn connection(&self) -> CdcResult<&PgConnection> {
        self.connection
            .as_ref()
            .ok_or_else(|| CdcError::connection("Session is not connected"))
    }
}
