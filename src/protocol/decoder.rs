//! pgoutput frame decoder
//!
//! Decodes one logical-replication payload at a time into either a relation
//! registration or a structured change event. The decoder owns the relation
//! registry: `R` frames populate it, tuple frames consult it.
//!
//! Soft failures (unregistered relation, column-count disagreement, unknown
//! cell kinds) are logged and recovered here so the stream keeps flowing;
//! truncated frames surface as protocol errors for the session to count.

use crate::core::{CdcError, CdcResult};
use crate::events::event::{CdcEvent, CellValue, Operation, ValueMap};
use crate::protocol::buffer::BufferReader;
use crate::protocol::relation::{
    ColumnDescriptor, RelationDescriptor, RelationRegistry, ReplicaIdentity,
};
use tracing::{debug, info, warn};

// pgoutput message tags
const MSG_BEGIN: u8 = b'B';
const MSG_COMMIT: u8 = b'C';
const MSG_RELATION: u8 = b'R';
const MSG_INSERT: u8 = b'I';
const MSG_UPDATE: u8 = b'U';
const MSG_DELETE: u8 = b'D';

// Tuple block markers
const TUPLE_NEW: u8 = b'N';
const TUPLE_OLD: u8 = b'O';
const TUPLE_KEY: u8 = b'K';

// Tuple cell kinds
const CELL_NULL: u8 = b'n';
const CELL_UNCHANGED: u8 = b'u';
const CELL_TEXT: u8 = b't';
const CELL_BINARY: u8 = b'b';

/// Stateful decoder for the pgoutput plugin's binary protocol
#[derive(Debug, Default)]
pub struct PgOutputDecoder {
    registry: RelationRegistry,
}

impl PgOutputDecoder {
    pub fn new() -> Self {
        Self {
            registry: RelationRegistry::new(),
        }
    }

    /// The relation registry populated by `R` frames
    pub fn registry(&self) -> &RelationRegistry {
        &self.registry
    }

    /// Decode one pgoutput payload.
    ///
    /// Returns `Ok(Some(event))` for insert/update/delete frames,
    /// `Ok(None)` for frames that carry no row mutation (relation, begin,
    /// commit, unrecognized tags, and tuple frames skipped as soft
    /// failures). `Err` means the frame itself was unreadable.
    pub fn decode(&mut self, payload: &[u8]) -> CdcResult<Option<CdcEvent>> {
        let Some(&tag) = payload.first() else {
            return Ok(None);
        };
        let mut reader = BufferReader::new(&payload[1..]);

        match tag {
            MSG_RELATION => {
                self.decode_relation(&mut reader)?;
                Ok(None)
            }
            MSG_BEGIN => {
                debug!("Transaction BEGIN");
                Ok(None)
            }
            MSG_COMMIT => {
                debug!("Transaction COMMIT");
                Ok(None)
            }
            MSG_INSERT => self.decode_insert(&mut reader),
            MSG_UPDATE => self.decode_update(&mut reader),
            MSG_DELETE => self.decode_delete(&mut reader),
            other => {
                debug!("Ignoring unrecognized message tag {:#04x}", other);
                Ok(None)
            }
        }
    }

    fn decode_relation(&mut self, reader: &mut BufferReader<'_>) -> CdcResult<()> {
        let relation_id = reader.read_u32()?;
        let schema = reader.read_cstring()?;
        let table = reader.read_cstring()?;
        let replica_identity = ReplicaIdentity::from_wire(reader.read_u8()?);
        let num_columns = reader.read_u16()?;

        let mut columns = Vec::with_capacity(num_columns as usize);
        for _ in 0..num_columns {
            let flags = reader.read_u8()?;
            let name = reader.read_cstring()?;
            let type_oid = reader.read_u32()?;
            let _type_modifier = reader.read_i32()?;
            columns.push(ColumnDescriptor {
                name,
                type_oid,
                flags,
            });
        }

        info!(
            "Registered relation {}.{} (id {}) with {} columns",
            schema, table, relation_id, num_columns
        );

        self.registry.register(RelationDescriptor {
            relation_id,
            schema,
            table,
            replica_identity,
            columns,
        });

        Ok(())
    }

    fn decode_insert(&mut self, reader: &mut BufferReader<'_>) -> CdcResult<Option<CdcEvent>> {
        let relation_id = reader.read_u32()?;
        let Some(relation) = self.registry.lookup(relation_id) else {
            warn!("Skipping INSERT for unknown relation id {}", relation_id);
            return Ok(None);
        };
        let relation = relation.clone();

        let marker = reader.read_u8()?;
        if marker != TUPLE_NEW {
            return Err(CdcError::protocol(format!(
                "INSERT frame missing new-tuple marker, got {:#04x}",
                marker
            )));
        }

        let new_values = read_tuple(reader, &relation)?;

        Ok(Some(CdcEvent::new(
            Operation::Insert,
            relation.schema.clone(),
            relation.table.clone(),
            relation.column_names(),
            None,
            Some(new_values),
        )))
    }

    fn decode_update(&mut self, reader: &mut BufferReader<'_>) -> CdcResult<Option<CdcEvent>> {
        let relation_id = reader.read_u32()?;
        let Some(relation) = self.registry.lookup(relation_id) else {
            warn!("Skipping UPDATE for unknown relation id {}", relation_id);
            return Ok(None);
        };
        let relation = relation.clone();

        // Optional old-image block: K carries the replica-identity key, O the
        // full previous row. Either way a mandatory N block follows.
        let mut marker = reader.read_u8()?;
        let old_values = match marker {
            TUPLE_KEY | TUPLE_OLD => {
                let values = read_tuple(reader, &relation)?;
                marker = reader.read_u8()?;
                Some(values)
            }
            _ => None,
        };

        if marker != TUPLE_NEW {
            return Err(CdcError::protocol(format!(
                "UPDATE frame missing new-tuple marker, got {:#04x}",
                marker
            )));
        }

        let new_values = read_tuple(reader, &relation)?;

        Ok(Some(CdcEvent::new(
            Operation::Update,
            relation.schema.clone(),
            relation.table.clone(),
            relation.column_names(),
            old_values,
            Some(new_values),
        )))
    }

    fn decode_delete(&mut self, reader: &mut BufferReader<'_>) -> CdcResult<Option<CdcEvent>> {
        let relation_id = reader.read_u32()?;
        let Some(relation) = self.registry.lookup(relation_id) else {
            warn!("Skipping DELETE for unknown relation id {}", relation_id);
            return Ok(None);
        };
        let relation = relation.clone();

        let marker = reader.read_u8()?;
        if marker != TUPLE_KEY && marker != TUPLE_OLD {
            return Err(CdcError::protocol(format!(
                "DELETE frame missing old-tuple marker, got {:#04x}",
                marker
            )));
        }

        let old_values = read_tuple(reader, &relation)?;

        Ok(Some(CdcEvent::new(
            Operation::Delete,
            relation.schema.clone(),
            relation.table.clone(),
            relation.column_names(),
            Some(old_values),
            None,
        )))
    }
}

/// Decode one TupleData block, binding cells to columns by position.
///
/// When the tuple's declared column count disagrees with the descriptor the
/// overlapping prefix is kept; every declared cell is still consumed so a
/// following tuple block in the same frame stays aligned.
fn read_tuple(
    reader: &mut BufferReader<'_>,
    relation: &RelationDescriptor,
) -> CdcResult<ValueMap> {
    let num_columns = reader.read_u16()? as usize;

    if num_columns != relation.columns.len() {
        warn!(
            "Column count mismatch for {}.{}: tuple has {}, descriptor has {}",
            relation.schema,
            relation.table,
            num_columns,
            relation.columns.len()
        );
    }

    let mut values = ValueMap::with_capacity(num_columns.min(relation.columns.len()));
    for index in 0..num_columns {
        let kind = reader.read_u8()?;
        let value = match kind {
            CELL_NULL => CellValue::Null,
            CELL_UNCHANGED => CellValue::Unchanged,
            CELL_TEXT => {
                let length = reader.read_u32()? as usize;
                let bytes = reader.read_bytes(length)?;
                CellValue::Text(String::from_utf8_lossy(bytes).into_owned())
            }
            CELL_BINARY => {
                let length = reader.read_u32()? as usize;
                let bytes = reader.read_bytes(length)?;
                CellValue::Binary(hex::encode(bytes))
            }
            other => {
                warn!("Unknown tuple cell kind {:#04x}, recording null", other);
                CellValue::Null
            }
        };

        if let Some(column) = relation.columns.get(index) {
            values.insert(column.name.clone(), value);
        }
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Frame builders mirroring the wire layout, used to keep the literal
    // scenarios below readable.

    fn relation_frame(id: u32, schema: &str, table: &str, columns: &[(&str, u32)]) -> Vec<u8> {
        let mut frame = vec![MSG_RELATION];
        frame.extend_from_slice(&id.to_be_bytes());
        frame.extend_from_slice(schema.as_bytes());
        frame.push(0);
        frame.extend_from_slice(table.as_bytes());
        frame.push(0);
        frame.push(b'd');
        frame.extend_from_slice(&(columns.len() as u16).to_be_bytes());
        for (name, type_oid) in columns {
            frame.push(0);
            frame.extend_from_slice(name.as_bytes());
            frame.push(0);
            frame.extend_from_slice(&type_oid.to_be_bytes());
            frame.extend_from_slice(&0i32.to_be_bytes());
        }
        frame
    }

    fn text_cell(value: &str) -> Vec<u8> {
        let mut cell = vec![CELL_TEXT];
        cell.extend_from_slice(&(value.len() as u32).to_be_bytes());
        cell.extend_from_slice(value.as_bytes());
        cell
    }

    fn binary_cell(value: &[u8]) -> Vec<u8> {
        let mut cell = vec![CELL_BINARY];
        cell.extend_from_slice(&(value.len() as u32).to_be_bytes());
        cell.extend_from_slice(value);
        cell
    }

    fn tuple_block(cells: &[Vec<u8>]) -> Vec<u8> {
        let mut block = (cells.len() as u16).to_be_bytes().to_vec();
        for cell in cells {
            block.extend_from_slice(cell);
        }
        block
    }

    fn users_decoder() -> PgOutputDecoder {
        let mut decoder = PgOutputDecoder::new();
        let frame = relation_frame(
            16,
            "public",
            "users",
            &[("id", 23), ("name", 25), ("email", 25)],
        );
        assert!(decoder.decode(&frame).unwrap().is_none());
        decoder
    }

    #[test]
    fn test_relation_registration_roundtrip() {
        let decoder = users_decoder();

        let relation = decoder.registry().lookup(16).unwrap();
        assert_eq!(relation.schema, "public");
        assert_eq!(relation.table, "users");
        assert_eq!(relation.replica_identity, ReplicaIdentity::Default);
        assert_eq!(relation.column_names(), vec!["id", "name", "email"]);
        assert_eq!(relation.columns[0].type_oid, 23);
        assert_eq!(relation.columns[1].type_oid, 25);
    }

    #[test]
    fn test_insert_emits_new_values() {
        let mut decoder = users_decoder();

        let mut frame = vec![MSG_INSERT];
        frame.extend_from_slice(&16u32.to_be_bytes());
        frame.push(TUPLE_NEW);
        frame.extend_from_slice(&tuple_block(&[
            text_cell("7"),
            text_cell("Alice"),
            text_cell("alice@example.com"),
        ]));

        let event = decoder.decode(&frame).unwrap().unwrap();
        assert_eq!(event.operation, Operation::Insert);
        assert_eq!(event.qualified_table(), "public.users");
        assert_eq!(event.columns, vec!["id", "name", "email"]);
        assert!(event.old_values.is_none());

        let new_values = event.new_values.unwrap();
        assert_eq!(new_values["id"], CellValue::Text("7".to_string()));
        assert_eq!(new_values["name"], CellValue::Text("Alice".to_string()));
        assert_eq!(
            new_values["email"],
            CellValue::Text("alice@example.com".to_string())
        );
    }

    #[test]
    fn test_update_with_key_tuple() {
        let mut decoder = users_decoder();

        let mut frame = vec![MSG_UPDATE];
        frame.extend_from_slice(&16u32.to_be_bytes());
        frame.push(TUPLE_KEY);
        frame.extend_from_slice(&tuple_block(&[
            text_cell("7"),
            vec![CELL_NULL],
            vec![CELL_NULL],
        ]));
        frame.push(TUPLE_NEW);
        frame.extend_from_slice(&tuple_block(&[
            text_cell("7"),
            text_cell("Alice B."),
            vec![CELL_UNCHANGED],
        ]));

        let event = decoder.decode(&frame).unwrap().unwrap();
        assert_eq!(event.operation, Operation::Update);

        let old_values = event.old_values.unwrap();
        assert_eq!(old_values["id"], CellValue::Text("7".to_string()));
        assert_eq!(old_values["name"], CellValue::Null);
        assert_eq!(old_values["email"], CellValue::Null);

        let new_values = event.new_values.unwrap();
        assert_eq!(new_values["name"], CellValue::Text("Alice B.".to_string()));
        assert_eq!(new_values["email"], CellValue::Unchanged);
    }

    #[test]
    fn test_update_without_old_block() {
        let mut decoder = users_decoder();

        let mut frame = vec![MSG_UPDATE];
        frame.extend_from_slice(&16u32.to_be_bytes());
        frame.push(TUPLE_NEW);
        frame.extend_from_slice(&tuple_block(&[
            text_cell("7"),
            text_cell("Bob"),
            vec![CELL_NULL],
        ]));

        let event = decoder.decode(&frame).unwrap().unwrap();
        assert!(event.old_values.is_none());
        assert!(event.new_values.is_some());
    }

    #[test]
    fn test_update_missing_new_tuple_is_protocol_error() {
        let mut decoder = users_decoder();

        let mut frame = vec![MSG_UPDATE];
        frame.extend_from_slice(&16u32.to_be_bytes());
        frame.push(TUPLE_KEY);
        frame.extend_from_slice(&tuple_block(&[
            text_cell("7"),
            vec![CELL_NULL],
            vec![CELL_NULL],
        ]));
        // Stream ends where the mandatory N block should start

        assert!(decoder.decode(&frame).is_err());
    }

    #[test]
    fn test_delete_emits_old_values_only() {
        let mut decoder = users_decoder();

        let mut frame = vec![MSG_DELETE];
        frame.extend_from_slice(&16u32.to_be_bytes());
        frame.push(TUPLE_KEY);
        frame.extend_from_slice(&tuple_block(&[
            text_cell("7"),
            vec![CELL_NULL],
            vec![CELL_NULL],
        ]));

        let event = decoder.decode(&frame).unwrap().unwrap();
        assert_eq!(event.operation, Operation::Delete);
        assert!(event.new_values.is_none());

        let old_values = event.old_values.unwrap();
        assert_eq!(old_values["id"], CellValue::Text("7".to_string()));
        assert_eq!(old_values.len(), 3);
    }

    #[test]
    fn test_unknown_relation_is_skipped() {
        let mut decoder = PgOutputDecoder::new();

        let mut frame = vec![MSG_INSERT];
        frame.extend_from_slice(&0x99u32.to_be_bytes());
        frame.push(TUPLE_NEW);
        frame.extend_from_slice(&tuple_block(&[text_cell("x")]));

        // No event and no error: the stream continues
        assert!(decoder.decode(&frame).unwrap().is_none());
    }

    #[test]
    fn test_binary_cell_hex_encodes() {
        let mut decoder = PgOutputDecoder::new();
        let frame = relation_frame(20, "public", "blobs", &[("data", 17)]);
        decoder.decode(&frame).unwrap();

        let mut insert = vec![MSG_INSERT];
        insert.extend_from_slice(&20u32.to_be_bytes());
        insert.push(TUPLE_NEW);
        insert.extend_from_slice(&tuple_block(&[binary_cell(&[0xDE, 0xAD, 0xBE, 0xEF])]));

        let event = decoder.decode(&insert).unwrap().unwrap();
        let new_values = event.new_values.unwrap();
        assert_eq!(new_values["data"], CellValue::Binary("deadbeef".to_string()));
    }

    #[test]
    fn test_zero_length_payloads_are_valid() {
        let mut decoder = PgOutputDecoder::new();
        let frame = relation_frame(21, "public", "t", &[("a", 25), ("b", 17)]);
        decoder.decode(&frame).unwrap();

        let mut insert = vec![MSG_INSERT];
        insert.extend_from_slice(&21u32.to_be_bytes());
        insert.push(TUPLE_NEW);
        insert.extend_from_slice(&tuple_block(&[text_cell(""), binary_cell(&[])]));

        let event = decoder.decode(&insert).unwrap().unwrap();
        let new_values = event.new_values.unwrap();
        assert_eq!(new_values["a"], CellValue::Text(String::new()));
        assert_eq!(new_values["b"], CellValue::Binary(String::new()));
    }

    #[test]
    fn test_unrecognized_message_tags_are_ignored() {
        let mut decoder = users_decoder();

        // Truncate ('T') and stream-start ('S') frames are not decoded
        for tag in [b'T', b'S', b'Y', b'z'] {
            let frame = vec![tag, 0xFF, 0xFF];
            assert!(decoder.decode(&frame).unwrap().is_none());
        }

        // The decoder still works afterwards
        let mut insert = vec![MSG_INSERT];
        insert.extend_from_slice(&16u32.to_be_bytes());
        insert.push(TUPLE_NEW);
        insert.extend_from_slice(&tuple_block(&[
            text_cell("1"),
            vec![CELL_NULL],
            vec![CELL_NULL],
        ]));
        assert!(decoder.decode(&insert).unwrap().is_some());
    }

    #[test]
    fn test_empty_payload_is_ignored() {
        let mut decoder = PgOutputDecoder::new();
        assert!(decoder.decode(&[]).unwrap().is_none());
    }

    #[test]
    fn test_begin_and_commit_emit_no_event() {
        let mut decoder = PgOutputDecoder::new();
        assert!(decoder.decode(&[MSG_BEGIN, 0, 0]).unwrap().is_none());
        assert!(decoder.decode(&[MSG_COMMIT, 0, 0]).unwrap().is_none());
    }

    #[test]
    fn test_tuple_with_fewer_cells_than_descriptor() {
        let mut decoder = users_decoder();

        let mut frame = vec![MSG_INSERT];
        frame.extend_from_slice(&16u32.to_be_bytes());
        frame.push(TUPLE_NEW);
        frame.extend_from_slice(&tuple_block(&[text_cell("7"), text_cell("Alice")]));

        let event = decoder.decode(&frame).unwrap().unwrap();
        let new_values = event.new_values.unwrap();
        assert_eq!(new_values.len(), 2);
        assert!(!new_values.contains_key("email"));
    }

    #[test]
    fn test_tuple_with_more_cells_than_descriptor() {
        let mut decoder = users_decoder();

        let mut frame = vec![MSG_INSERT];
        frame.extend_from_slice(&16u32.to_be_bytes());
        frame.push(TUPLE_NEW);
        frame.extend_from_slice(&tuple_block(&[
            text_cell("7"),
            text_cell("Alice"),
            text_cell("alice@example.com"),
            text_cell("surplus"),
        ]));

        // Best-effort event over the descriptor's columns; surplus consumed
        let event = decoder.decode(&frame).unwrap().unwrap();
        let new_values = event.new_values.unwrap();
        assert_eq!(new_values.len(), 3);
        assert!(!new_values.values().any(|v| *v == CellValue::Text("surplus".to_string())));
    }

    #[test]
    fn test_count_mismatch_keeps_following_block_aligned() {
        let mut decoder = users_decoder();

        // Old block declares only the key column; new block is complete.
        let mut frame = vec![MSG_UPDATE];
        frame.extend_from_slice(&16u32.to_be_bytes());
        frame.push(TUPLE_OLD);
        frame.extend_from_slice(&tuple_block(&[text_cell("7")]));
        frame.push(TUPLE_NEW);
        frame.extend_from_slice(&tuple_block(&[
            text_cell("7"),
            text_cell("Carol"),
            text_cell("carol@example.com"),
        ]));

        let event = decoder.decode(&frame).unwrap().unwrap();
        assert_eq!(event.old_values.unwrap().len(), 1);
        assert_eq!(event.new_values.unwrap().len(), 3);
    }

    #[test]
    fn test_unknown_cell_kind_recorded_as_null() {
        let mut decoder = users_decoder();

        let mut frame = vec![MSG_INSERT];
        frame.extend_from_slice(&16u32.to_be_bytes());
        frame.push(TUPLE_NEW);
        frame.extend_from_slice(&tuple_block(&[
            text_cell("7"),
            vec![b'q'],
            vec![CELL_NULL],
        ]));

        let event = decoder.decode(&frame).unwrap().unwrap();
        let new_values = event.new_values.unwrap();
        assert_eq!(new_values["name"], CellValue::Null);
    }

    #[test]
    fn test_truncated_tuple_is_protocol_error() {
        let mut decoder = users_decoder();

        let mut frame = vec![MSG_INSERT];
        frame.extend_from_slice(&16u32.to_be_bytes());
        frame.push(TUPLE_NEW);
        frame.extend_from_slice(&3u16.to_be_bytes());
        frame.push(CELL_TEXT);
        frame.extend_from_slice(&100u32.to_be_bytes());
        frame.extend_from_slice(b"short");

        let err = decoder.decode(&frame).unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn test_relation_replacement_changes_decoding() {
        let mut decoder = users_decoder();

        // Same id re-registered with a different column set
        let frame = relation_frame(16, "public", "users", &[("id", 23), ("nickname", 25)]);
        decoder.decode(&frame).unwrap();

        let mut insert = vec![MSG_INSERT];
        insert.extend_from_slice(&16u32.to_be_bytes());
        insert.push(TUPLE_NEW);
        insert.extend_from_slice(&tuple_block(&[text_cell("7"), text_cell("al")]));

        let event = decoder.decode(&insert).unwrap().unwrap();
        assert_eq!(event.columns, vec!["id", "nickname"]);
        assert_eq!(
            event.new_values.unwrap()["nickname"],
            CellValue::Text("al".to_string())
        );
    }
}
