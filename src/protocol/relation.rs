//! Relation descriptors and the relation registry
//!
//! The server describes each table once per session with an `R` frame before
//! the first tuple frame that references it. The registry maps the
//! server-assigned relation id to that description so tuple frames can be
//! decoded positionally.

use crate::protocol::Oid;
use serde::Serialize;
use std::collections::HashMap;

/// Replica identity mode of a relation
///
/// Controls which columns the server includes in the old-tuple blocks of
/// UPDATE and DELETE frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReplicaIdentity {
    Default,
    Nothing,
    Full,
    Index,
}

impl ReplicaIdentity {
    /// Decode the one-byte wire representation. Unknown bytes fall back to
    /// `Default`, matching the server's own fallback.
    pub fn from_wire(byte: u8) -> Self {
        match byte {
            b'n' => Self::Nothing,
            b'f' => Self::Full,
            b'i' => Self::Index,
            _ => Self::Default,
        }
    }
}

/// Metadata for one column of a replicated table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub type_oid: Oid,
    pub flags: u8,
}

/// Metadata for a replicated table, keyed by its server-assigned relation id
///
/// The column sequence order is positional: tuple cells are bound to columns
/// by index, not by name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationDescriptor {
    pub relation_id: Oid,
    pub schema: String,
    pub table: String,
    pub replica_identity: ReplicaIdentity,
    pub columns: Vec<ColumnDescriptor>,
}

impl RelationDescriptor {
    /// Column names in positional order
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Maps relation ids to their descriptors for the life of the session
///
/// Written and read by the decoder only; a new `R` frame for a known id
/// replaces the previous descriptor atomically.
#[derive(Debug, Default)]
pub struct RelationRegistry {
    relations: HashMap<Oid, RelationDescriptor>,
}

impl RelationRegistry {
    pub fn new() -> Self {
        Self {
            relations: HashMap::new(),
        }
    }

    /// Register a descriptor, replacing any previous one for the same id
    pub fn register(&mut self, descriptor: RelationDescriptor) {
        self.relations.insert(descriptor.relation_id, descriptor);
    }

    /// Look up the descriptor for a relation id
    pub fn lookup(&self, relation_id: Oid) -> Option<&RelationDescriptor> {
        self.relations.get(&relation_id)
    }

    /// Number of registered relations
    #[allow(unused)]
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    #[allow(unused)]
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}
