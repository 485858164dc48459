//! Positional byte cursor over replication frames
//!
//! All multi-byte integers on the wire are network byte order. The reader is
//! single-pass: the position only ever advances, and every accessor fails
//! with a truncated-frame error when the remaining payload is shorter than
//! requested. The writer is the counterpart used to build the fixed-size
//! feedback message sent back to the server.

use crate::core::{CdcError, CdcResult};

/// Single-pass reader over a borrowed frame
#[derive(Debug)]
pub struct BufferReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BufferReader<'a> {
    /// Create a new reader positioned at the start of `buffer`
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Current position in the frame
    #[allow(unused)]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left between the position and the end of the frame
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Check whether at least `count` bytes remain
    pub fn has_bytes(&self, count: usize) -> bool {
        self.remaining() >= count
    }

    fn truncated(&self, what: &str) -> CdcError {
        CdcError::protocol_with_context(
            format!("truncated frame: not enough bytes for {}", what),
            format!("offset {}", self.position),
        )
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> CdcResult<u8> {
        if !self.has_bytes(1) {
            return Err(self.truncated("u8"));
        }
        let value = self.buffer[self.position];
        self.position += 1;
        Ok(value)
    }

    /// Read a big-endian 16-bit unsigned integer
    pub fn read_u16(&mut self) -> CdcResult<u16> {
        if !self.has_bytes(2) {
            return Err(self.truncated("u16"));
        }
        let value = u16::from_be_bytes(
            self.buffer[self.position..self.position + 2]
                .try_into()
                .expect("slice length checked"),
        );
        self.position += 2;
        Ok(value)
    }

    /// Read a big-endian 32-bit unsigned integer
    pub fn read_u32(&mut self) -> CdcResult<u32> {
        if !self.has_bytes(4) {
            return Err(self.truncated("u32"));
        }
        let value = u32::from_be_bytes(
            self.buffer[self.position..self.position + 4]
                .try_into()
                .expect("slice length checked"),
        );
        self.position += 4;
        Ok(value)
    }

    /// Read a big-endian 32-bit signed integer
    pub fn read_i32(&mut self) -> CdcResult<i32> {
        if !self.has_bytes(4) {
            return Err(self.truncated("i32"));
        }
        let value = i32::from_be_bytes(
            self.buffer[self.position..self.position + 4]
                .try_into()
                .expect("slice length checked"),
        );
        self.position += 4;
        Ok(value)
    }

    /// Read a big-endian 64-bit unsigned integer
    pub fn read_u64(&mut self) -> CdcResult<u64> {
        if !self.has_bytes(8) {
            return Err(self.truncated("u64"));
        }
        let value = u64::from_be_bytes(
            self.buffer[self.position..self.position + 8]
                .try_into()
                .expect("slice length checked"),
        );
        self.position += 8;
        Ok(value)
    }

    /// Read a big-endian 64-bit signed integer
    pub fn read_i64(&mut self) -> CdcResult<i64> {
        if !self.has_bytes(8) {
            return Err(self.truncated("i64"));
        }
        let value = i64::from_be_bytes(
            self.buffer[self.position..self.position + 8]
                .try_into()
                .expect("slice length checked"),
        );
        self.position += 8;
        Ok(value)
    }

    /// Read bytes up to and consuming the NUL terminator, decoded as UTF-8
    pub fn read_cstring(&mut self) -> CdcResult<String> {
        let start = self.position;
        while self.position < self.buffer.len() && self.buffer[self.position] != 0 {
            self.position += 1;
        }

        if self.position >= self.buffer.len() {
            return Err(CdcError::protocol_with_context(
                "truncated frame: string not NUL-terminated",
                format!("offset {}", start),
            ));
        }

        let value = String::from_utf8_lossy(&self.buffer[start..self.position]).into_owned();
        // Consume the terminator
        self.position += 1;
        Ok(value)
    }

    /// Read exactly `count` raw bytes
    pub fn read_bytes(&mut self, count: usize) -> CdcResult<&'a [u8]> {
        if !self.has_bytes(count) {
            return Err(self.truncated("byte run"));
        }
        let bytes = &self.buffer[self.position..self.position + count];
        self.position += count;
        Ok(bytes)
    }

    /// Look at the next byte without advancing
    #[allow(unused)]
    pub fn peek_u8(&self) -> CdcResult<u8> {
        if !self.has_bytes(1) {
            return Err(CdcError::protocol("truncated frame: no byte to peek"));
        }
        Ok(self.buffer[self.position])
    }
}

/// Positional writer over a mutable buffer, used for feedback messages
#[derive(Debug)]
pub struct BufferWriter<'a> {
    buffer: &'a mut [u8],
    position: usize,
}

impl<'a> BufferWriter<'a> {
    /// Create a new writer positioned at the start of `buffer`
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Check whether at least `count` bytes of space remain
    pub fn has_space(&self, count: usize) -> bool {
        self.buffer.len().saturating_sub(self.position) >= count
    }

    /// Total bytes written so far
    pub fn bytes_written(&self) -> usize {
        self.position
    }

    /// Write a single byte
    pub fn write_u8(&mut self, value: u8) -> CdcResult<()> {
        if !self.has_space(1) {
            return Err(CdcError::protocol("feedback buffer overflow writing u8"));
        }
        self.buffer[self.position] = value;
        self.position += 1;
        Ok(())
    }

    /// Write a big-endian 64-bit unsigned integer
    pub fn write_u64(&mut self, value: u64) -> CdcResult<()> {
        if !self.has_space(8) {
            return Err(CdcError::protocol("feedback buffer overflow writing u64"));
        }
        self.buffer[self.position..self.position + 8].copy_from_slice(&value.to_be_bytes());
        self.position += 8;
        Ok(())
    }

    /// Write a big-endian 64-bit signed integer
    pub fn write_i64(&mut self, value: i64) -> CdcResult<()> {
        if !self.has_space(8) {
            return Err(CdcError::protocol("feedback buffer overflow writing i64"));
        }
        self.buffer[self.position..self.position + 8].copy_from_slice(&value.to_be_bytes());
        self.position += 8;
        Ok(())
    }
}
