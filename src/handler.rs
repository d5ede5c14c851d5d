//! The host-binding seam: what a caller implements to receive decoded WAL.
//!
//! The C original calls back through a single `stream_cb_` function pointer
//! carrying an opaque `void *user_data` and a NUL-terminated `char *`
//! payload. This crate replaces both with one trait: `user_data` becomes
//! `&self` (or whatever the implementor closes over), and the payload is an
//! explicit byte slice rather than a C string, since logical-decoding
//! output plugins are free to emit embedded NULs (e.g. `wal2json` payloads
//! containing binary bytea columns).

/// Receives decoded logical-replication payloads.
///
/// Returning `false` tells the session to treat the message as rejected:
/// `decoded_lsn` rolls back to its value before this message, so the next
/// feedback frame does not acknowledge it. The session does not retry the
/// message automatically — a rejected message is a signal to stop or
/// reconnect, not a request for redelivery.
pub trait Handler {
    /// Called once per `XLogData` message with the decoded payload bytes
    /// (the output plugin's wire format, unparsed).
    fn handle(&mut self, payload: &[u8]) -> bool;
}

/// A [`Handler`] built from a closure, for callers who don't need to keep
/// state across calls.
impl<F> Handler for F
where
    F: FnMut(&[u8]) -> bool,
{
    fn handle(&mut self, payload: &[u8]) -> bool {
        self(payload)
    }
}

/// Why a streaming session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `Session::stop` was called, or a process-wide cancellation signal
    /// fired.
    Requested,
    /// The server ended the COPY stream cleanly (`PQgetCopyData` returned
    /// `-1` followed by a `PGRES_COMMAND_OK` result).
    ServerEndedStream,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_implement_handler() {
        let mut seen = Vec::new();
        let mut handler = |payload: &[u8]| {
            seen.push(payload.to_vec());
            true
        };
        assert!(handler.handle(b"hello"));
        assert_eq!(seen, vec![b"hello".to_vec()]);
    }
}
