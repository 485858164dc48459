//! Core module containing configuration and error handling
//!
//! These are the building blocks the rest of the consumer is wired with:
//! environment-driven configuration and the structured error taxonomy.

pub mod config;
pub mod errors;

// Re-export for convenience
pub use config::CdcConfig;
pub use errors::{CdcError, CdcResult};
