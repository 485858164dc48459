//! PostgreSQL logical replication protocol handling
//!
//! Everything needed to go from raw COPY-BOTH frames to structured change
//! events: the byte cursor, transport frame parsing, relation bookkeeping,
//! and the pgoutput decoder itself.

pub mod buffer;
pub mod decoder;
pub mod messages;
pub mod relation;

// Type aliases matching PostgreSQL internal types
pub type XLogRecPtr = u64;
pub type Oid = u32;
pub type TimestampTz = i64;

/// The invalid WAL position, used where no position applies
pub const INVALID_XLOG_REC_PTR: XLogRecPtr = 0;

// Re-export for convenience
pub use buffer::{BufferReader, BufferWriter};
pub use decoder::PgOutputDecoder;
pub use relation::{ColumnDescriptor, RelationDescriptor, RelationRegistry, ReplicaIdentity};
