//! Bounded event queue and worker pool
//!
//! The session is the single producer; `worker_count` tasks consume. The
//! queue is a bounded mpsc channel: when it fills, the producer's send
//! suspends, the socket is no longer read, and the server's send buffer
//! absorbs the backpressure. Handler failures are contained per event and
//! never terminate a worker.

use crate::events::{CdcEvent, EventHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, warn};

/// Create the bounded dispatch queue
pub fn event_queue(capacity: usize) -> (mpsc::Sender<CdcEvent>, mpsc::Receiver<CdcEvent>) {
    mpsc::channel(capacity)
}

/// A pool of worker tasks consuming from the dispatch queue
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers over a shared receiver.
    ///
    /// Each worker loops: dequeue one event, invoke the handler, repeat.
    /// Workers exit when the channel is closed and drained, so dropping the
    /// sender is the shutdown signal.
    pub fn spawn(
        worker_count: usize,
        receiver: mpsc::Receiver<CdcEvent>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..worker_count)
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let handler = Arc::clone(&handler);
                tokio::spawn(worker_loop(worker_id, receiver, handler))
            })
            .collect();

        Self { handles }
    }

    /// Number of workers in the pool
    #[allow(unused)]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[allow(unused)]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for all workers to drain the queue and exit, bounded by
    /// `drain_timeout`. Workers still running at the deadline are aborted.
    pub async fn join(self, drain_timeout: Duration) {
        let deadline = Instant::now() + drain_timeout;

        for (worker_id, mut handle) in self.handles.into_iter().enumerate() {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Worker {} panicked: {}", worker_id, e),
                Err(_) => {
                    warn!("Worker {} did not drain in time, aborting", worker_id);
                    handle.abort();
                }
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<CdcEvent>>>,
    handler: Arc<dyn EventHandler>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        // Hold the lock only for the dequeue so a slow handler on one worker
        // never blocks its siblings.
        let event = receiver.lock().await.recv().await;

        match event {
            Some(event) => {
                let label = format!("{} {}", event.operation, event.qualified_table());
                if let Err(e) = handler.handle(event).await {
                    error!("Worker {} handler failed for {}: {:?}", worker_id, label, e);
                }
            }
            None => break,
        }
    }

    debug!("Worker {} exiting", worker_id);
}
