//! Safe wrapper around libpq for replication-session connections
//!
//! Mirrors `pghx_ld_reader_connect`/`_slot_status`/`_do_stream` from the C
//! original: a thin, `unsafe`-isolated layer over `PQconnectdbParams`,
//! `PQexec`, `PQgetCopyData`, `PQputCopyData`, `PQflush`, `PQsocket`, and
//! `PQconsumeInput`. Everything above this module works with owned Rust
//! types (`Vec<u8>`, `String`, `Option<String>`) and never touches a raw
//! pointer.

use crate::core::errors::{ReplicationError, ReplicationResult};
use libpq_sys::*;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::time::Duration;

/// A single PostgreSQL connection opened through libpq.
///
/// Either a replication-mode (`replication=database`) or a regular-mode
/// connection, distinguished only by which parameter map built it — see
/// [`PgConnection::connect_params`].
pub struct PgConnection {
    conn: *mut PGconn,
}

unsafe impl Send for PgConnection {}

/// Result of a non-blocking `PQgetCopyData` call.
pub enum CopyData {
    /// A full row was available.
    Row(Vec<u8>),
    /// The COPY is still in progress but no row is available yet
    /// (`buf_len == 0`, only possible in async mode).
    InProgress,
    /// The COPY has ended (`buf_len == -1`); the final command result is
    /// retrievable via [`PgConnection::get_result`].
    Done,
}

impl PgConnection {
    /// Open a connection with an explicit keyword/value parameter map, via
    /// `PQconnectdbParams` (matches the C original's call with
    /// `expand_dbname = true`).
    pub fn connect_params(params: &[(&str, &str)]) -> ReplicationResult<Self> {
        let mut keywords: Vec<CString> = Vec::with_capacity(params.len() + 1);
        let mut values: Vec<CString> = Vec::with_capacity(params.len() + 1);
        for (k, v) in params {
            keywords.push(CString::new(*k)?);
            values.push(CString::new(*v)?);
        }

        let mut keyword_ptrs: Vec<*const c_char> = keywords.iter().map(|s| s.as_ptr()).collect();
        let mut value_ptrs: Vec<*const c_char> = values.iter().map(|s| s.as_ptr()).collect();
        keyword_ptrs.push(ptr::null());
        value_ptrs.push(ptr::null());

        let conn = unsafe { PQconnectdbParams(keyword_ptrs.as_ptr(), value_ptrs.as_ptr(), 1) };
        if conn.is_null() {
            return Err(ReplicationError::out_of_memory(
                "PQconnectdbParams returned NULL",
            ));
        }
        Ok(Self { conn })
    }

    pub fn status_ok(&self) -> bool {
        unsafe { PQstatus(self.conn) == ConnStatusType::CONNECTION_OK }
    }

    pub fn status_bad(&self) -> bool {
        unsafe { PQstatus(self.conn) == ConnStatusType::CONNECTION_BAD }
    }

    pub fn needs_password(&self) -> bool {
        unsafe { PQconnectionNeedsPassword(self.conn) != 0 }
    }

    pub fn parameter_status(&self, name: &str) -> Option<String> {
        let c_name = CString::new(name).ok()?;
        let ptr = unsafe { PQparameterStatus(self.conn, c_name.as_ptr()) };
        c_str_to_string(ptr)
    }

    pub fn error_message(&self) -> String {
        c_str_to_string(unsafe { PQerrorMessage(self.conn) }).unwrap_or_default()
    }

    pub fn exec(&self, query: &str) -> ReplicationResult<PgResult> {
        let c_query = CString::new(query)?;
        let result = unsafe { PQexec(self.conn, c_query.as_ptr()) };
        if result.is_null() {
            return Err(ReplicationError::query(format!(
                "PQexec returned NULL for query {query:?}: {}",
                self.error_message()
            )));
        }
        Ok(PgResult { result })
    }

    /// Non-blocking `PQgetCopyData(conn, &buf, async=1)`.
    pub fn get_copy_data_async(&self) -> ReplicationResult<CopyData> {
        let mut buffer: *mut c_char = ptr::null_mut();
        let len = unsafe { PQgetCopyData(self.conn, &mut buffer, 1) };
        match len {
            0 => Ok(CopyData::InProgress),
            -1 => Ok(CopyData::Done),
            -2 => Err(ReplicationError::Io(std::io::Error::other(
                self.error_message(),
            ))),
            len if len > 0 => {
                if buffer.is_null() {
                    return Err(ReplicationError::stream_protocol(
                        "PQgetCopyData returned a positive length with a NULL buffer",
                    ));
                }
                let data = unsafe {
                    std::slice::from_raw_parts(buffer as *const u8, len as usize).to_vec()
                };
                unsafe { PQfreemem(buffer as *mut std::os::raw::c_void) };
                Ok(CopyData::Row(data))
            }
            other => Err(ReplicationError::stream_protocol(format!(
                "unexpected PQgetCopyData return value {other}"
            ))),
        }
    }

    pub fn put_copy_data(&self, data: &[u8]) -> ReplicationResult<()> {
        let rc =
            unsafe { PQputCopyData(self.conn, data.as_ptr() as *const c_char, data.len() as i32) };
        if rc <= 0 {
            return Err(ReplicationError::connection(format!(
                "PQputCopyData failed: {}",
                self.error_message()
            )));
        }
        Ok(())
    }

    pub fn flush(&self) -> ReplicationResult<()> {
        let rc = unsafe { PQflush(self.conn) };
        if rc != 0 {
            return Err(ReplicationError::connection(format!(
                "PQflush failed: {}",
                self.error_message()
            )));
        }
        Ok(())
    }

    pub fn consume_input(&self) -> ReplicationResult<()> {
        let rc = unsafe { PQconsumeInput(self.conn) };
        if rc == 0 {
            return Err(ReplicationError::Io(std::io::Error::other(format!(
                "PQconsumeInput failed: {}",
                self.error_message()
            ))));
        }
        Ok(())
    }

    pub fn socket_fd(&self) -> i32 {
        unsafe { PQsocket(self.conn) }
    }

    pub fn get_result(&self) -> PgResult {
        PgResult {
            result: unsafe { PQgetResult(self.conn) },
        }
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        if !self.conn.is_null() {
            unsafe { PQfinish(self.conn) };
        }
    }
}

fn c_str_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

/// Safe wrapper over a `PGresult`.
pub struct PgResult {
    result: *mut PGresult,
}

impl PgResult {
    pub fn status(&self) -> ExecStatusType {
        unsafe { PQresultStatus(self.result) }
    }

    pub fn is_tuples_ok(&self) -> bool {
        self.status() == ExecStatusType::PGRES_TUPLES_OK
    }

    pub fn is_command_ok(&self) -> bool {
        self.status() == ExecStatusType::PGRES_COMMAND_OK
    }

    pub fn is_copy_both(&self) -> bool {
        self.status() == ExecStatusType::PGRES_COPY_BOTH
    }

    pub fn ntuples(&self) -> i32 {
        unsafe { PQntuples(self.result) }
    }

    pub fn nfields(&self) -> i32 {
        unsafe { PQnfields(self.result) }
    }

    pub fn getvalue(&self, row: i32, col: i32) -> Option<String> {
        let ptr = unsafe { PQgetvalue(self.result, row, col) };
        c_str_to_string(ptr)
    }

    pub fn error_message(&self) -> String {
        c_str_to_string(unsafe { PQresultErrorMessage(self.result) }).unwrap_or_default()
    }
}

impl Drop for PgResult {
    fn drop(&mut self) {
        if !self.result.is_null() {
            unsafe { PQclear(self.result) };
        }
    }
}

/// Outcome of waiting on a connection's socket for readability.
pub enum WaitOutcome {
    Readable,
    TimedOut,
    Interrupted,
}

/// Block on `select()` over a single fd, with an optional timeout —
/// mirrors the C original's `select(PQsocket(conn)+1, &input_mask, NULL,
/// NULL, timeoutptr)` call exactly, including EINTR being treated as a
/// harmless wakeup.
pub fn wait_readable(fd: i32, timeout: Option<Duration>) -> ReplicationResult<WaitOutcome> {
    unsafe {
        let mut read_fds: libc::fd_set = std::mem::zeroed();
        libc::FD_ZERO(&mut read_fds);
        libc::FD_SET(fd, &mut read_fds);

        let mut tv = timeout.map(|d| libc::timeval {
            tv_sec: d.as_secs() as libc::time_t,
            tv_usec: d.subsec_micros() as libc::suseconds_t,
        });
        let tv_ptr = match &mut tv {
            Some(tv) => tv as *mut libc::timeval,
            None => ptr::null_mut(),
        };

        let rc = libc::select(fd + 1, &mut read_fds, ptr::null_mut(), ptr::null_mut(), tv_ptr);
        if rc == 0 {
            Ok(WaitOutcome::TimedOut)
        } else if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                Ok(WaitOutcome::Interrupted)
            } else {
                Err(ReplicationError::Io(err))
            }
        } else {
            Ok(WaitOutcome::Readable)
        }
    }
}