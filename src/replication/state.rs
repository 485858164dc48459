//! Stream progress tracking
//!
//! Tracks the highest fully-processed WAL position and the feedback timer.
//! The flush watermark only moves forward, which is what makes the
//! acknowledgements sent to the server monotonic.

use crate::protocol::{INVALID_XLOG_REC_PTR, XLogRecPtr};
use std::time::{Duration, Instant};

/// Progress state for one replication stream
#[derive(Debug)]
pub struct StreamState {
    /// Highest position whose frame has been fully decoded and, when it
    /// produced an event, enqueued. This is the value eligible for feedback.
    flushed_lsn: XLogRecPtr,
    /// When feedback was last sent to the server
    last_feedback_at: Instant,
}

impl StreamState {
    pub fn new() -> Self {
        Self {
            flushed_lsn: INVALID_XLOG_REC_PTR,
            last_feedback_at: Instant::now(),
        }
    }

    /// Advance the flush watermark. Positions at or below the current
    /// watermark are ignored, as is the invalid (zero) position.
    pub fn advance(&mut self, lsn: XLogRecPtr) {
        if lsn > self.flushed_lsn {
            self.flushed_lsn = lsn;
        }
    }

    /// The position eligible for feedback
    pub fn flushed_lsn(&self) -> XLogRecPtr {
        self.flushed_lsn
    }

    /// True once any position has been observed
    pub fn has_progress(&self) -> bool {
        self.flushed_lsn != INVALID_XLOG_REC_PTR
    }

    /// True when the keepalive interval has elapsed since the last feedback
    pub fn feedback_due(&self, interval: Duration) -> bool {
        self.last_feedback_at.elapsed() >= interval
    }

    /// Record that feedback was just sent
    pub fn mark_feedback_sent(&mut self) {
        self.last_feedback_at = Instant::now();
    }
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}
