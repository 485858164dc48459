//! PostgreSQL connection handling
//!
//! Safe wrapper around libpq for replication operations: connection
//! lifecycle, query execution, COPY-BOTH data transfer, and SQLSTATE
//! extraction for error discrimination.

use crate::core::{CdcError, CdcResult};
use libpq_sys::*;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;

// PQresultErrorField code for the SQLSTATE, per postgres_ext.h
const PG_DIAG_SQLSTATE: c_int = b'C' as c_int;

/// SQLSTATE reported when an object (e.g. a replication slot) already exists
pub const SQLSTATE_DUPLICATE_OBJECT: &str = "42710";

/// One poll of the COPY-BOTH stream
#[derive(Debug)]
pub enum CopyData {
    /// A complete frame
    Frame(Vec<u8>),
    /// No complete frame available yet
    Pending,
    /// The server ended the COPY operation
    Ended,
}

/// Safe wrapper for a PostgreSQL connection using libpq
pub struct PgConnection {
    conn: *mut PGconn,
}

impl PgConnection {
    /// Establish a connection using a libpq conninfo string.
    pub fn connect(conninfo: &str) -> CdcResult<Self> {
        let c_conninfo = CString::new(conninfo)?;
        let conn = unsafe { PQconnectdb(c_conninfo.as_ptr()) };

        if conn.is_null() {
            return Err(CdcError::connection("Failed to allocate connection object"));
        }

        let status = unsafe { PQstatus(conn) };
        if status != ConnStatusType::CONNECTION_OK {
            let message = error_message(conn).unwrap_or_else(|| "Unknown error".to_string());
            unsafe { PQfinish(conn) };
            return Err(CdcError::connection(format!(
                "Connection failed: {}",
                message
            )));
        }

        Ok(Self { conn })
    }

    /// Execute a command and return its result.
    ///
    /// A failed command is not an `Err` here: the caller inspects the
    /// result's status and SQLSTATE to discriminate failures (slot creation
    /// needs to tell duplicate-object apart from everything else).
    pub fn exec(&self, query: &str) -> CdcResult<PgQueryResult> {
        let c_query = CString::new(query)?;
        let result = unsafe { PQexec(self.conn, c_query.as_ptr()) };

        if result.is_null() {
            let message = self.last_error().unwrap_or_else(|| "Unknown error".to_string());
            return Err(CdcError::connection(format!(
                "Command execution failed: {}",
                message
            )));
        }

        Ok(PgQueryResult { result })
    }

    /// Poll the COPY stream for one frame without blocking.
    ///
    /// Consumes any input available on the socket, then asks libpq for a
    /// complete row. `Pending` means the caller should yield and try again.
    pub fn poll_copy_data(&self) -> CdcResult<CopyData> {
        if unsafe { PQconsumeInput(self.conn) } == 0 {
            let message = self.last_error().unwrap_or_else(|| "Unknown error".to_string());
            return Err(CdcError::connection(format!(
                "Failed to read from server: {}",
                message
            )));
        }

        let mut buffer: *mut c_char = ptr::null_mut();
        let len = unsafe { PQgetCopyData(self.conn, &mut buffer, 1) };

        match len {
            -2 => {
                let message = self.last_error().unwrap_or_else(|| "Unknown error".to_string());
                Err(CdcError::connection(message))
            }
            -1 => {
                // COPY is done; collect the final command status
                let result = PgQueryResult {
                    result: unsafe { PQgetResult(self.conn) },
                };
                if !result.result.is_null() && !result.is_ok() {
                    let message =
                        self.last_error().unwrap_or_else(|| "Unknown error".to_string());
                    return Err(CdcError::connection(message));
                }
                Ok(CopyData::Ended)
            }
            0 => Ok(CopyData::Pending),
            len => {
                if buffer.is_null() {
                    return Err(CdcError::protocol("COPY returned a null buffer"));
                }
                let data = unsafe {
                    std::slice::from_raw_parts(buffer as *const u8, len as usize).to_vec()
                };
                unsafe { PQfreemem(buffer as *mut std::os::raw::c_void) };
                Ok(CopyData::Frame(data))
            }
        }
    }

    /// Send data into the COPY stream (feedback messages).
    pub fn put_copy_data(&self, data: &[u8]) -> CdcResult<()> {
        let result = unsafe {
            PQputCopyData(self.conn, data.as_ptr() as *const c_char, data.len() as i32)
        };

        if result != 1 {
            let message = self.last_error().unwrap_or_else(|| "Unknown error".to_string());
            return Err(CdcError::connection(format!(
                "Failed to send copy data: {}",
                message
            )));
        }

        Ok(())
    }

    /// Flush buffered output to the server.
    pub fn flush(&self) -> CdcResult<()> {
        if unsafe { PQflush(self.conn) } != 0 {
            return Err(CdcError::connection("Failed to flush connection"));
        }
        Ok(())
    }

    fn last_error(&self) -> Option<String> {
        error_message(self.conn)
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        if !self.conn.is_null() {
            unsafe { PQfinish(self.conn) };
        }
    }
}

fn error_message(conn: *const PGconn) -> Option<String> {
    unsafe {
        let error_ptr = PQerrorMessage(conn);
        if error_ptr.is_null() {
            None
        } else {
            Some(CStr::from_ptr(error_ptr).to_string_lossy().trim_end().to_string())
        }
    }
}

/// Safe wrapper for a PostgreSQL command result
pub struct PgQueryResult {
    result: *mut PGresult,
}

impl PgQueryResult {
    /// Raw execution status
    pub fn status(&self) -> ExecStatusType {
        unsafe { PQresultStatus(self.result) }
    }

    /// True for successful command or query results
    pub fn is_ok(&self) -> bool {
        matches!(
            self.status(),
            ExecStatusType::PGRES_TUPLES_OK | ExecStatusType::PGRES_COMMAND_OK
        )
    }

    /// True when the connection entered COPY-BOTH mode
    pub fn is_copy_both(&self) -> bool {
        self.status() == ExecStatusType::PGRES_COPY_BOTH
    }

    /// Number of rows in the result
    pub fn ntuples(&self) -> i32 {
        unsafe { PQntuples(self.result) }
    }

    /// Number of columns in the result
    #[allow(unused)]
    pub fn nfields(&self) -> i32 {
        unsafe { PQnfields(self.result) }
    }

    /// Value at (row, col), or None for NULL / out of range
    pub fn getvalue(&self, row: i32, col: i32) -> Option<String> {
        let value_ptr = unsafe { PQgetvalue(self.result, row, col) };
        if value_ptr.is_null() {
            None
        } else {
            unsafe { Some(CStr::from_ptr(value_ptr).to_string_lossy().into_owned()) }
        }
    }

    /// SQLSTATE of a failed command, when the server reported one
    pub fn sqlstate(&self) -> Option<String> {
        let state_ptr = unsafe { PQresultErrorField(self.result, PG_DIAG_SQLSTATE) };
        if state_ptr.is_null() {
            None
        } else {
            unsafe { Some(CStr::from_ptr(state_ptr).to_string_lossy().into_owned()) }
        }
    }

    /// Server error message for a failed command
    pub fn error_message(&self) -> Option<String> {
        let message_ptr = unsafe { PQresultErrorMessage(self.result) };
        if message_ptr.is_null() {
            None
        } else {
            let message = unsafe { CStr::from_ptr(message_ptr).to_string_lossy() };
            let trimmed = message.trim_end();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
    }
}

impl Drop for PgQueryResult {
    fn drop(&mut self) {
        if !self.result.is_null() {
            unsafe { PQclear(self.result) };
        }
    }
}
