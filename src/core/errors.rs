//! Error types for the CDC consumer
//!
//! Structured error handling using thiserror. Fatal errors (connection,
//! slot lifecycle) surface to the caller and terminate the process;
//! decoder-level soft failures are logged and recovered locally and never
//! appear here.

use thiserror::Error;

/// Main error type for the CDC consumer
#[derive(Error, Debug)]
pub enum CdcError {
    /// Replication connection could not be opened or was lost
    #[error("Database connection error: {message}")]
    Connection { message: String },

    /// Replication slot creation failed for a reason other than already-exists
    #[error("Replication slot error: {message}")]
    Slot { message: String },

    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Wire protocol violations: truncated frames, unreadable headers
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        context: Option<String>,
    },

    /// Application handler failure, contained per-event
    #[error("Handler error: {message}")]
    Handler { message: String },

    /// Network/IO related errors
    #[error("Network IO error")]
    Io(#[from] std::io::Error),

    /// C string conversion errors from the libpq boundary
    #[error("C string conversion error")]
    CString(#[from] std::ffi::NulError),

    /// Task execution errors for async operations
    #[error("Task execution error")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type alias for convenience
pub type CdcResult<T> = std::result::Result<T, CdcError>;

impl CdcError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a slot lifecycle error
    pub fn slot<S: Into<String>>(message: S) -> Self {
        Self::Slot {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
            context: None,
        }
    }

    /// Create a protocol violation error with context
    pub fn protocol_with_context<S: Into<String>, C: Into<String>>(message: S, context: C) -> Self {
        Self::Protocol {
            message: message.into(),
            context: Some(context.into()),
        }
    }

    /// Create a handler error
    pub fn handler<S: Into<String>>(message: S) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// True for errors the session recovers from by skipping the frame
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}
