//! wal2events
//!
//! A PostgreSQL logical replication CDC consumer: connects in replication
//! mode, attaches to a durable slot, decodes the pgoutput stream into
//! structured change events, and dispatches them through a bounded queue to
//! a pool of worker tasks.

mod core;
mod diagnostics;
mod events;
mod health;
mod protocol;
mod replication;
mod utils;

use crate::core::CdcConfig;
use crate::events::dispatch::{WorkerPool, event_queue};
use crate::events::{EventHandler, StdoutHandler};
use crate::replication::ReplicationSession;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// Bounded wait for workers to drain the queue on shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    name = "wal2events",
    about = "PostgreSQL logical replication CDC consumer",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show wal_level, replication slots, and publications on the server
    Status,
    /// Drop the configured replication slot
    DropSlot,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();
    let config = CdcConfig::from_env()?;

    match args.command {
        Some(Command::Status) => {
            tokio::task::spawn_blocking(move || diagnostics::print_status(&config)).await??;
            Ok(())
        }
        Some(Command::DropSlot) => {
            tokio::task::spawn_blocking(move || diagnostics::drop_slot(&config)).await??;
            Ok(())
        }
        None => run_consumer(config).await,
    }
}

async fn run_consumer(config: CdcConfig) -> Result<()> {
    info!(
        "Starting CDC consumer: slot '{}', publication '{}', {} workers, queue capacity {}",
        config.slot_name, config.publication_name, config.worker_count, config.queue_capacity
    );

    let shutdown = Arc::new(AtomicBool::new(false));

    // Interrupt flips the stop flag; the session notices at the next frame
    // boundary.
    let signal_flag = Arc::clone(&shutdown);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received interrupt signal, shutting down gracefully...");
                signal_flag.store(true, Ordering::SeqCst);
            }
            Err(e) => error!("Failed to install interrupt handler: {}", e),
        }
    });

    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_port).await {
            error!("Health probe failed: {}", e);
        }
    });

    let (event_tx, event_rx) = event_queue(config.queue_capacity);
    let handler: Arc<dyn EventHandler> = Arc::new(StdoutHandler::new());
    let pool = WorkerPool::spawn(config.worker_count, event_rx, handler);

    let mut session = ReplicationSession::new(config, Arc::clone(&shutdown));
    // The sender moves into the session; when the stream ends it drops,
    // closing the queue so the workers drain and exit.
    let outcome = session.run(event_tx).await;

    pool.join(DRAIN_TIMEOUT).await;

    match outcome {
        Ok(()) => {
            info!("CDC consumer stopped");
            Ok(())
        }
        Err(e) => {
            error!("CDC consumer failed: {}", e);
            Err(e.into())
        }
    }
}
