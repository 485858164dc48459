//! Structured change events
//!
//! One `CdcEvent` describes one row mutation decoded from the stream. Events
//! are ephemeral: created by the decoder, owned by the queue until a worker
//! retrieves them, then discarded.

use crate::utils::timestamp::local_iso_timestamp;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Kind of row mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert => write!(f, "INSERT"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
        }
    }
}

/// A decoded tuple cell
///
/// The decoder does not coerce types beyond this; downstream code may
/// reinterpret text values using the column's `type_oid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    /// SQL NULL
    Null,
    /// TOASTed column the server did not re-send
    Unchanged,
    /// UTF-8 text value
    Text(String),
    /// Binary value, carried as its lowercase hex encoding
    Binary(String),
}

/// Sentinel emitted for unchanged TOASTed columns
pub const UNCHANGED_SENTINEL: &str = "[unchanged]";

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Null => serializer.serialize_none(),
            CellValue::Unchanged => serializer.serialize_str(UNCHANGED_SENTINEL),
            CellValue::Text(text) => serializer.serialize_str(text),
            CellValue::Binary(hex) => serializer.serialize_str(hex),
        }
    }
}

/// Column name to decoded value, in the relation's positional order by way
/// of the event's `columns` field
pub type ValueMap = HashMap<String, CellValue>;

/// One row mutation
///
/// Invariants: INSERT carries `new_values` only; DELETE carries `old_values`
/// only; UPDATE always carries `new_values` and carries `old_values` exactly
/// when the server shipped an old-tuple or key-tuple block.
#[derive(Debug, Clone, Serialize)]
pub struct CdcEvent {
    pub operation: Operation,
    pub schema: String,
    pub table: String,
    /// Column names copied from the relation descriptor at emission time,
    /// in positional order
    pub columns: Vec<String>,
    pub old_values: Option<ValueMap>,
    pub new_values: Option<ValueMap>,
    /// ISO-8601 local creation time of this event record
    pub timestamp: String,
}

impl CdcEvent {
    pub fn new(
        operation: Operation,
        schema: String,
        table: String,
        columns: Vec<String>,
        old_values: Option<ValueMap>,
        new_values: Option<ValueMap>,
    ) -> Self {
        Self {
            operation,
            schema,
            table,
            columns,
            old_values,
            new_values,
            timestamp: local_iso_timestamp(),
        }
    }

    /// `schema.table` for log lines
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_value_serialization() {
        let values = vec![
            (CellValue::Null, "null"),
            (CellValue::Unchanged, "\"[unchanged]\""),
            (CellValue::Text("Alice".to_string()), "\"Alice\""),
            (CellValue::Binary("deadbeef".to_string()), "\"deadbeef\""),
        ];

        for (value, expected) in values {
            assert_eq!(serde_json::to_string(&value).unwrap(), expected);
        }
    }

    #[test]
    fn test_operation_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Operation::Insert).unwrap(), "\"INSERT\"");
        assert_eq!(Operation::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_event_json_shape() {
        let mut new_values = ValueMap::new();
        new_values.insert("id".to_string(), CellValue::Text("7".to_string()));

        let event = CdcEvent::new(
            Operation::Insert,
            "public".to_string(),
            "users".to_string(),
            vec!["id".to_string()],
            None,
            Some(new_values),
        );

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["operation"], "INSERT");
        assert_eq!(json["schema"], "public");
        assert_eq!(json["table"], "users");
        assert_eq!(json["columns"], serde_json::json!(["id"]));
        assert!(json["old_values"].is_null());
        assert_eq!(json["new_values"]["id"], "7");
        assert!(json["timestamp"].is_string());
        assert_eq!(event.qualified_table(), "public.users");
    }
}
