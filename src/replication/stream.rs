//! Connection establishment and the inner COPY-both streaming loop.
//!
//! Grounded in `pghx_ld_reader_connect`/`_init_replication`/`_do_stream`/
//! `_reply_keepalive`/`_consume_stream` from the C original.

use crate::core::config::SessionConfig;
use crate::core::errors::{ReplicationError, ReplicationResult};
use crate::handler::{Handler, StopReason};
use crate::replication::feedback::FeedbackTracker;
use crate::utils::binary::{decode_u64_be, format_lsn, XLogRecPtr};
use crate::utils::connection::{wait_readable, CopyData, PgConnection, WaitOutcome};
use crate::utils::timestamp;
use crate::CancellationToken;
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// A pending `Session::acknowledge()` call, marshalled onto whichever
/// thread is running `do_stream` (see `replication::session`). The reply
/// channel carries the outcome of committing `decoded_lsn` back to the
/// caller, who may be blocked on a different thread.
pub type AckReply = mpsc::SyncSender<ReplicationResult<()>>;

/// Cap on the exponential backoff between connection attempts, in
/// microseconds — `MAX_RETRY_INTERVAL` in the C original.
const MAX_RETRY_INTERVAL_US: i64 = 10_000_000;

/// Open a connection (replication or regular mode) with exponential
/// backoff, bounded by `config.connection_timeout_us` total elapsed time.
/// Mirrors `pghx_ld_reader_connect`'s retry loop exactly, including its
/// `integer_datetimes` sanity check.
pub fn connect_with_retry(
    config: &SessionConfig,
    replication: bool,
    cancel: &CancellationToken,
) -> ReplicationResult<PgConnection> {
    let params = build_conninfo_params(config, replication);
    let params_ref: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    let start_time = timestamp::now();
    let end_time = start_time + config.connection_timeout_us;
    let mut attempts: u32 = 0;
    let mut slept: i64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ReplicationError::connection("cancelled before connection established"));
        }

        let conn = PgConnection::connect_params(&params_ref)?;

        if conn.status_bad() && conn.needs_password() {
            return Err(ReplicationError::password("password needed"));
        }

        if conn.status_ok() {
            check_integer_datetimes(&conn)?;
            return Ok(conn);
        }

        if start_time + slept > end_time {
            return Err(ReplicationError::connection(format!(
                "could not connect to server: {}",
                conn.error_message()
            )));
        }

        let time_to_sleep_us = std::cmp::min(
            MAX_RETRY_INTERVAL_US,
            500_000i64.saturating_mul(1i64 << attempts.min(20)),
        );
        let time_to_sleep_us = std::cmp::min(end_time - start_time - slept + 1, time_to_sleep_us);
        warn!(
            error = %conn.error_message(),
            retry_in_ms = time_to_sleep_us / 1000,
            "cannot connect"
        );
        std::thread::sleep(Duration::from_micros(time_to_sleep_us.max(0) as u64));
        slept += time_to_sleep_us;
        attempts += 1;
    }
}

fn build_conninfo_params(config: &SessionConfig, replication: bool) -> Vec<(String, String)> {
    let mut params = Vec::with_capacity(7);
    params.push((
        "dbname".to_string(),
        config.dbname.clone().unwrap_or_else(|| "replication".to_string()),
    ));
    let replication_value = if config.dbname.is_none() {
        "true"
    } else if replication {
        "database"
    } else {
        "false"
    };
    params.push(("replication".to_string(), replication_value.to_string()));
    params.push(("fallback_application_name".to_string(), config.progname.clone()));
    if let Some(host) = &config.host {
        params.push(("host".to_string(), host.clone()));
    }
    if let Some(username) = &config.username {
        params.push(("user".to_string(), username.clone()));
    }
    if let Some(port) = &config.port {
        params.push(("port".to_string(), port.clone()));
    }
    if let Some(password) = &config.password {
        params.push(("password".to_string(), password.clone()));
    }
    params
}

fn check_integer_datetimes(conn: &PgConnection) -> ReplicationResult<()> {
    match conn.parameter_status("integer_datetimes") {
        Some(value) if value == "on" => Ok(()),
        Some(value) => Err(ReplicationError::connection(format!(
            "integer_datetimes compile flag does not match server (server reports {value:?})"
        ))),
        None => Err(ReplicationError::connection(
            "could not determine server setting for integer_datetimes",
        )),
    }
}

/// `START_REPLICATION SLOT "slot" LOGICAL <lsn> (opt1 'v1', opt2)`.
pub fn init_replication(
    conn: &PgConnection,
    slot: &str,
    startpos: XLogRecPtr,
    options: &[(String, Option<String>)],
) -> ReplicationResult<()> {
    let mut query = format!(
        "START_REPLICATION SLOT \"{slot}\" LOGICAL {}",
        format_lsn(startpos)
    );
    if !options.is_empty() {
        query.push_str(" (");
        for (i, (name, value)) in options.iter().enumerate() {
            if i > 0 {
                query.push_str(", ");
            }
            query.push_str(&format!("\"{name}\""));
            if let Some(value) = value {
                query.push_str(&format!(" '{value}'"));
            }
        }
        query.push(')');
    }

    info!(slot, startpos = %format_lsn(startpos), "starting log streaming");
    debug!(query = %query, "replication command");

    let res = conn.exec(&query)?;
    if !res.is_copy_both() {
        return Err(ReplicationError::command(format!(
            "could not send replication command {query:?}: {}",
            res.error_message()
        )));
    }
    info!("streaming initiated");
    Ok(())
}

const KEEPALIVE_HEADER_LEN: usize = 1 + 8 + 8; // 'k' + walEnd + sendTime
const XLOGDATA_HEADER_LEN: usize = 1 + 8 + 8 + 8; // 'w' + dataStart + walEnd + sendTime

struct Keepalive {
    wal_end: XLogRecPtr,
    reply_requested: bool,
}

fn decode_keepalive(buf: &[u8]) -> ReplicationResult<Keepalive> {
    if buf.len() < KEEPALIVE_HEADER_LEN + 1 {
        return Err(ReplicationError::stream_protocol(format!(
            "streaming header too small: {}",
            buf.len()
        )));
    }
    let wal_end = decode_u64_be(&buf[1..9]);
    let reply_requested = buf[KEEPALIVE_HEADER_LEN] != 0;
    Ok(Keepalive { wal_end, reply_requested })
}

fn decode_xlogdata(buf: &[u8]) -> ReplicationResult<(XLogRecPtr, &[u8])> {
    if buf.len() < XLOGDATA_HEADER_LEN + 1 {
        return Err(ReplicationError::stream_protocol(format!(
            "streaming header too small: {}",
            buf.len()
        )));
    }
    let data_start = decode_u64_be(&buf[1..9]);
    Ok((data_start, &buf[XLOGDATA_HEADER_LEN..]))
}

/// Send a standby status update if one is due: the periodic timer path of
/// the inner loop, not the "server asked for one" or "handler
/// acknowledged" paths (those call `send_feedback` directly).
fn maybe_send_periodic_feedback(
    conn: &PgConnection,
    feedback: &mut FeedbackTracker,
    now: i64,
) -> ReplicationResult<()> {
    if feedback.interval_ms > 0
        && timestamp::exceeds(feedback.last_status, now, feedback.interval_ms)
    {
        send_feedback(conn, feedback, now, true, false)?;
    }
    Ok(())
}

/// Drain any `Session::acknowledge()` calls queued up on `ack_rx`: commit
/// `committed_lsn = decoded_lsn` and force a feedback frame, replying to
/// the caller with the outcome. Mirrors `pghx_ld_reader_acknowledge`'s
/// "atomically set commited_lsn, sendFeedback(force), roll back on
/// failure" (see §4.5). A send failure both answers the waiting caller and
/// propagates to the outer loop so it reconnects, per §7's "feedback-send
/// failure ... escalated to the outer loop for reconnect if the session is
/// streaming".
fn drain_acknowledge_requests(
    conn: &PgConnection,
    feedback: &mut FeedbackTracker,
    ack_rx: &mpsc::Receiver<AckReply>,
) -> ReplicationResult<()> {
    while let Ok(reply) = ack_rx.try_recv() {
        let previous = feedback.advance_committed();
        let now = timestamp::now();
        match send_feedback(conn, feedback, now, true, false) {
            Ok(()) => {
                let _ = reply.send(Ok(()));
            }
            Err(err) => {
                feedback.rollback_committed(previous);
                let _ = reply.send(Err(ReplicationError::connection(err.to_string())));
                return Err(err);
            }
        }
    }
    Ok(())
}

/// Build and send a standby status update ('r') frame, matching
/// `pghx_ld_reader_sendFeedback` — a no-op unless `force` or the watermark
/// has moved.
pub fn send_feedback(
    conn: &PgConnection,
    feedback: &mut FeedbackTracker,
    now: i64,
    force: bool,
    reply_requested: bool,
) -> ReplicationResult<()> {
    if !feedback.should_send(force) {
        return Ok(());
    }
    trace!(committed_lsn = %format_lsn(feedback.committed_lsn), "sending feedback");
    let frame = super::feedback::build_feedback_frame(feedback.committed_lsn, now, reply_requested);
    conn.put_copy_data(&frame)?;
    conn.flush()?;
    feedback.note_status_sent(now);
    Ok(())
}

/// The inner `while (!abort) { ... }` loop from `pghx_ld_reader_do_stream`:
/// reads COPY data off `conn`, dispatches keepalive/XLogData frames, and
/// drives the handler. Returns once the server cleanly ends the stream or
/// cancellation is observed.
pub fn do_stream(
    conn: &PgConnection,
    feedback: &mut FeedbackTracker,
    handler: &mut dyn Handler,
    cancel: &CancellationToken,
    session_abort: &CancellationToken,
    ack_rx: &mpsc::Receiver<AckReply>,
) -> ReplicationResult<StopReason> {
    loop {
        if cancel.is_cancelled() || session_abort.is_cancelled() {
            return Ok(StopReason::Requested);
        }

        drain_acknowledge_requests(conn, feedback, ack_rx)?;

        let now = timestamp::now();
        maybe_send_periodic_feedback(conn, feedback, now)?;

        match conn.get_copy_data_async()? {
            CopyData::InProgress => {
                let timeout = feedback.compute_wakeup(now);
                match wait_readable(conn.socket_fd(), timeout)? {
                    WaitOutcome::TimedOut | WaitOutcome::Interrupted => continue,
                    WaitOutcome::Readable => {
                        conn.consume_input()?;
                        continue;
                    }
                }
            }
            CopyData::Done => {
                let result = conn.get_result();
                if !result.is_command_ok() {
                    return Err(ReplicationError::Io(std::io::Error::other(format!(
                        "unexpected termination of replication stream: {}",
                        result.error_message()
                    ))));
                }
                return Ok(StopReason::ServerEndedStream);
            }
            CopyData::Row(buf) => {
                if buf.is_empty() {
                    return Err(ReplicationError::stream_protocol("empty streaming message"));
                }
                match buf[0] {
                    b'k' => {
                        let keepalive = decode_keepalive(&buf)?;
                        feedback.observe(keepalive.wal_end);
                        if keepalive.reply_requested {
                            let now = timestamp::now();
                            send_feedback(conn, feedback, now, true, false)?;
                        }
                    }
                    b'w' => {
                        let (data_start, payload) = decode_xlogdata(&buf)?;
                        let previous = feedback.decoded_lsn;
                        feedback.observe(data_start);
                        // Only decoded_lsn moves here. Committing and
                        // sending feedback is the caller's job, driven
                        // through `Session::acknowledge` (see §4.5/§4.7) —
                        // not an automatic per-record side effect.
                        if !handler.handle(payload) {
                            feedback.decoded_lsn = previous;
                        }
                    }
                    other => {
                        return Err(ReplicationError::stream_protocol(format!(
                            "unrecognized streaming header: {:?}",
                            other as char
                        )));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keepalive_frame(wal_end: u64, reply_requested: bool) -> Vec<u8> {
        let mut buf = vec![b'k'];
        buf.extend_from_slice(&wal_end.to_be_bytes());
        buf.extend_from_slice(&0u64.to_be_bytes());
        buf.push(u8::from(reply_requested));
        buf
    }

    fn xlogdata_frame(data_start: u64, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![b'w'];
        buf.extend_from_slice(&data_start.to_be_bytes());
        buf.extend_from_slice(&0u64.to_be_bytes());
        buf.extend_from_slice(&0u64.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn decodes_keepalive_frame() {
        let frame = keepalive_frame(0x1234, true);
        let k = decode_keepalive(&frame).unwrap();
        assert_eq!(k.wal_end, 0x1234);
        assert!(k.reply_requested);
    }

    #[test]
    fn keepalive_frame_too_short_is_an_error() {
        assert!(decode_keepalive(&[b'k', 0, 0]).is_err());
    }

    #[test]
    fn decodes_xlogdata_frame_and_payload() {
        let frame = xlogdata_frame(0xABCD, b"BEGIN 42");
        let (lsn, payload) = decode_xlogdata(&frame).unwrap();
        assert_eq!(lsn, 0xABCD);
        assert_eq!(payload, b"BEGIN 42");
    }

    #[test]
    fn build_conninfo_uses_database_replication_mode_when_dbname_set() {
        let mut config = SessionConfig::new("slot", "plugin");
        config.dbname = Some("mydb".to_string());
        let params = build_conninfo_params(&config, true);
        assert!(params.contains(&("replication".to_string(), "database".to_string())));
        assert!(params.contains(&("dbname".to_string(), "mydb".to_string())));
    }

    #[test]
    fn build_conninfo_defaults_to_physical_replication_db_when_no_dbname() {
        let config = SessionConfig::new("slot", "plugin");
        let params = build_conninfo_params(&config, true);
        assert!(params.contains(&("replication".to_string(), "true".to_string())));
        assert!(params.contains(&("dbname".to_string(), "replication".to_string())));
    }
}
