//! Replication session management
//!
//! The session owns the replication connection and the decoder, pumps the
//! stream, and reports progress; the state tracker keeps the acknowledgement
//! watermark monotonic.

pub mod session;
pub mod state;

// Re-export for convenience
pub use session::{ReplicationSession, SessionPhase};
pub use state::StreamState;
