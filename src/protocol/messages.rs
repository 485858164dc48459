//! Transport-level replication frames
//!
//! The COPY-BOTH stream carries two inbound frame kinds: XLogData (`w`)
//! wrapping a pgoutput payload, and keepalives (`k`). The one outbound frame
//! the consumer writes is the standby status update (`r`), which carries the
//! acknowledged positions back to the server.

use crate::core::{CdcError, CdcResult};
use crate::protocol::buffer::{BufferReader, BufferWriter};
use crate::protocol::{TimestampTz, XLogRecPtr};

/// Outer tag of an XLogData frame
pub const TAG_XLOG_DATA: u8 = b'w';
/// Outer tag of a server keepalive frame
pub const TAG_KEEPALIVE: u8 = b'k';
/// Outer tag of the standby status update sent to the server
pub const TAG_STATUS_UPDATE: u8 = b'r';

/// WAL data frame wrapping one pgoutput payload
#[derive(Debug)]
pub struct XLogData<'a> {
    /// Position of the payload's first byte in the WAL
    pub wal_start: XLogRecPtr,
    /// End position of the WAL on the server at send time
    pub wal_end: XLogRecPtr,
    /// Server clock at send time, PostgreSQL epoch microseconds
    pub send_time: TimestampTz,
    /// The pgoutput payload
    pub payload: &'a [u8],
}

impl<'a> XLogData<'a> {
    /// Parse an XLogData frame, including its leading tag byte
    pub fn parse(data: &'a [u8]) -> CdcResult<Self> {
        let mut reader = BufferReader::new(data);

        let tag = reader.read_u8()?;
        if tag != TAG_XLOG_DATA {
            return Err(CdcError::protocol(format!(
                "expected XLogData tag 'w', got {:#04x}",
                tag
            )));
        }

        let wal_start = reader.read_u64()?;
        let wal_end = reader.read_u64()?;
        let send_time = reader.read_i64()?;
        let payload = reader.read_bytes(reader.remaining())?;

        Ok(Self {
            wal_start,
            wal_end,
            send_time,
            payload,
        })
    }
}

/// Server keepalive frame
#[derive(Debug)]
pub struct Keepalive {
    /// End position of the WAL on the server
    pub wal_end: XLogRecPtr,
    /// Server clock at send time, PostgreSQL epoch microseconds
    pub send_time: TimestampTz,
    /// Server asks for an immediate status update
    pub reply_requested: bool,
}

impl Keepalive {
    /// Parse a keepalive frame, including its leading tag byte
    pub fn parse(data: &[u8]) -> CdcResult<Self> {
        let mut reader = BufferReader::new(data);

        let tag = reader.read_u8()?;
        if tag != TAG_KEEPALIVE {
            return Err(CdcError::protocol(format!(
                "expected keepalive tag 'k', got {:#04x}",
                tag
            )));
        }

        let wal_end = reader.read_u64()?;
        let send_time = reader.read_i64()?;
        let reply_requested = reader.read_u8()? != 0;

        Ok(Self {
            wal_end,
            send_time,
            reply_requested,
        })
    }
}

/// Standby status update acknowledging progress to the server
///
/// Advancing `flush_lsn` is what licenses the server to reclaim WAL up to
/// that position.
#[derive(Debug)]
pub struct StandbyStatusUpdate {
    pub write_lsn: XLogRecPtr,
    pub flush_lsn: XLogRecPtr,
    pub apply_lsn: XLogRecPtr,
    /// Client clock, PostgreSQL epoch microseconds
    pub client_time: TimestampTz,
    pub reply_requested: bool,
}

impl StandbyStatusUpdate {
    /// Wire size: tag + three positions + timestamp + reply flag
    pub const WIRE_SIZE: usize = 1 + 8 + 8 + 8 + 8 + 1;

    /// Serialize into `buf`, returning the number of bytes written
    pub fn write(&self, buf: &mut [u8]) -> CdcResult<usize> {
        let mut writer = BufferWriter::new(buf);

        writer.write_u8(TAG_STATUS_UPDATE)?;
        writer.write_u64(self.write_lsn)?;
        writer.write_u64(self.flush_lsn)?;
        writer.write_u64(self.apply_lsn)?;
        writer.write_i64(self.client_time)?;
        writer.write_u8(if self.reply_requested { 1 } else { 0 })?;

        Ok(writer.bytes_written())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xlog_data_parse() {
        let mut frame = vec![b'w'];
        frame.extend_from_slice(&100u64.to_be_bytes());
        frame.extend_from_slice(&200u64.to_be_bytes());
        frame.extend_from_slice(&42i64.to_be_bytes());
        frame.extend_from_slice(b"payload");

        let parsed = XLogData::parse(&frame).unwrap();
        assert_eq!(parsed.wal_start, 100);
        assert_eq!(parsed.wal_end, 200);
        assert_eq!(parsed.send_time, 42);
        assert_eq!(parsed.payload, b"payload");
    }

    #[test]
    fn test_xlog_data_empty_payload_is_valid() {
        let mut frame = vec![b'w'];
        frame.extend_from_slice(&[0u8; 24]);
        assert!(XLogData::parse(&frame).unwrap().payload.is_empty());
    }

    #[test]
    fn test_xlog_data_truncated_header() {
        let frame = [b'w', 0, 0, 0];
        assert!(XLogData::parse(&frame).is_err());
    }

    #[test]
    fn test_keepalive_parse() {
        let mut frame = vec![b'k'];
        frame.extend_from_slice(&7000u64.to_be_bytes());
        frame.extend_from_slice(&1i64.to_be_bytes());
        frame.push(1);

        let parsed = Keepalive::parse(&frame).unwrap();
        assert_eq!(parsed.wal_end, 7000);
        assert!(parsed.reply_requested);
    }

    #[test]
    fn test_keepalive_wrong_tag_rejected() {
        let mut frame = vec![b'w'];
        frame.extend_from_slice(&[0u8; 17]);
        assert!(Keepalive::parse(&frame).is_err());
    }

    #[test]
    fn test_status_update_layout() {
        let update = StandbyStatusUpdate {
            write_lsn: 0x1122_3344_5566_7788,
            flush_lsn: 0x1122_3344_5566_7788,
            apply_lsn: 0,
            client_time: 99,
            reply_requested: false,
        };

        let mut buf = [0u8; StandbyStatusUpdate::WIRE_SIZE];
        let written = update.write(&mut buf).unwrap();

        assert_eq!(written, StandbyStatusUpdate::WIRE_SIZE);
        assert_eq!(buf[0], b'r');
        assert_eq!(&buf[1..9], &0x1122_3344_5566_7788u64.to_be_bytes());
        assert_eq!(&buf[9..17], &0x1122_3344_5566_7788u64.to_be_bytes());
        assert_eq!(&buf[17..25], &0u64.to_be_bytes());
        assert_eq!(buf[33], 0);
    }
}
