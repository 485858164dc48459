//! Timestamp conversion utilities
//!
//! Feedback messages carry microseconds since the PostgreSQL epoch
//! (2000-01-01); change events carry an ISO-8601 local timestamp.

use crate::protocol::TimestampTz;
use chrono::Local;
use std::time::{SystemTime, UNIX_EPOCH};

// Seconds from the Unix epoch (1970) to the PostgreSQL epoch (2000)
const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800;

/// Convert a SystemTime to PostgreSQL epoch microseconds.
pub fn to_postgres_timestamp(time: SystemTime) -> TimestampTz {
    let since_unix = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    let unix_micros = since_unix.as_secs() as i64 * 1_000_000 + since_unix.subsec_micros() as i64;
    unix_micros - PG_EPOCH_OFFSET_SECS * 1_000_000
}

/// ISO-8601 local timestamp for event records.
pub fn local_iso_timestamp() -> String {
    Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}
