//! Event types and dispatch
//!
//! Change events produced by the decoder flow through a bounded queue to a
//! pool of worker tasks, each of which invokes the application handler. The
//! handler is the seam where sinks plug in without touching the session.

use crate::core::CdcResult;
use async_trait::async_trait;

pub mod dispatch;
pub mod event;
pub mod stdout;

// Re-export for convenience
pub use dispatch::WorkerPool;
pub use event::{CdcEvent, CellValue, Operation};
pub use stdout::StdoutHandler;

/// Application handler invoked once per change event
///
/// Implementations substitute sinks (stdout, external queue, RPC). Delivery
/// is at-least-once and, with more than one worker, unordered; handlers are
/// responsible for their own idempotence.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: CdcEvent) -> CdcResult<()>;
}
