//! The public session controller tying slot management, the stream driver,
//! and feedback bookkeeping together.
//!
//! Grounded in `pghx_ld_reader_prepare`/`_stream`/`_stop` from the C
//! original, and in the teacher's `ReplicationServer`'s outer
//! connect/stream/reconnect loop shape.

use crate::cancellation::CancellationToken;
use crate::core::config::SessionConfig;
use crate::core::errors::{ReplicationError, ReplicationResult};
use crate::handler::{Handler, StopReason};
use crate::replication::feedback::FeedbackTracker;
use crate::replication::slot::{self, SlotStatus};
use crate::replication::stream::{self, AckReply};
use crate::utils::binary::{XLogRecPtr, INVALID_XLOG_REC_PTR};
use crate::utils::timestamp;
use std::sync::{mpsc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// How long [`Session::acknowledge`] waits for the `stream()` loop to pick
/// up and answer the request before giving up. `stream()` drains pending
/// acknowledgements at the top of every inner-loop iteration (see
/// `replication::stream::drain_acknowledge_requests`), so under normal
/// operation a reply arrives almost immediately; this bound only protects
/// against calling `acknowledge` while no `stream()` call is running.
const ACKNOWLEDGE_TIMEOUT: Duration = Duration::from_secs(30);

/// A single logical-replication consumer session bound to one slot.
///
/// Owns no connection between calls to [`Session::stream`] — each call
/// opens (or reuses, on an internal reconnect) a fresh replication
/// connection, streams until the server ends the COPY or cancellation is
/// observed, and returns. `init` and `drop_slot` use their own short-lived
/// regular/replication connections.
///
/// Every operation but [`Session::init`] takes `&self`: once a session is
/// initialized, [`Session::stream`] is meant to run on its own thread while
/// [`Session::stop`]/[`Session::acknowledge`] are called from another —
/// the `ack_rx` end of the acknowledge channel is kept behind a [`Mutex`]
/// purely so `Session` stays `Sync` for that split, not because of any
/// real contention (only the thread running `stream()` ever locks it).
pub struct Session {
    config: SessionConfig,
    cancel: CancellationToken,
    session_abort: CancellationToken,
    startpos: XLogRecPtr,
    created_slot: bool,
    ack_tx: mpsc::Sender<AckReply>,
    ack_rx: Mutex<mpsc::Receiver<AckReply>>,
}

impl Session {
    /// Build a session bound to `config`. `cancel` is the process-wide
    /// token (share one across sessions so a single `SIGINT` stops all of
    /// them); each `Session` additionally gets its own independent abort
    /// flag, stoppable via [`Session::stop`] without affecting siblings.
    pub fn new(config: SessionConfig, cancel: CancellationToken) -> Self {
        let (ack_tx, ack_rx) = mpsc::channel();
        Self {
            config,
            cancel,
            session_abort: CancellationToken::new(),
            startpos: INVALID_XLOG_REC_PTR,
            created_slot: false,
            ack_tx,
            ack_rx: Mutex::new(ack_rx),
        }
    }

    /// Ask this session to stop at the next loop boundary. Safe to call
    /// from another thread while [`Session::stream`] is running elsewhere.
    pub fn stop(&self) {
        self.session_abort.cancel();
    }

    /// Commit `committed_lsn = decoded_lsn` and force a standby status
    /// update, per §4.5/§4.7. The live replication connection and
    /// `FeedbackTracker` live on the stack of whichever thread is running
    /// [`Session::stream`], so this marshals the request onto that loop
    /// over a channel (per §5's "marshalling acknowledge onto the stream
    /// loop via a channel") rather than touching either directly — safe to
    /// call from another thread while `stream()` runs, as scenario §8.4
    /// requires. On a feedback-send failure, `committed_lsn` is rolled
    /// back and the error is returned; `stream()`'s own loop also sees the
    /// failure and reconnects.
    pub fn acknowledge(&self) -> ReplicationResult<()> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(0);
        self.ack_tx.send(reply_tx).map_err(|_| {
            ReplicationError::connection("acknowledge: no stream() loop is running to process it")
        })?;
        reply_rx.recv_timeout(ACKNOWLEDGE_TIMEOUT).map_err(|_| {
            ReplicationError::connection(
                "acknowledge: timed out waiting for the stream() loop to reply",
            )
        })?
    }

    /// Check the slot exists (creating it if `config.create_slot` and it
    /// doesn't), matching `pghx_ld_reader_prepare`.
    pub fn init(&mut self) -> ReplicationResult<()> {
        self.config.validate()?;

        let regular = stream::connect_with_retry(&self.config, false, &self.cancel)?;
        let status = slot::slot_status(&regular, &self.config.slot)?;
        drop(regular);

        if !status.exists() {
            if self.config.create_slot {
                let replication = stream::connect_with_retry(&self.config, true, &self.cancel)?;
                let (confirmed_name, startpos) =
                    slot::create_slot(&replication, &self.config.slot, &self.config.plugin)?;
                self.config.slot = confirmed_name;
                self.startpos = startpos;
                self.created_slot = true;
            } else {
                return Err(crate::core::errors::ReplicationError::no_slot(format!(
                    "slot {:?} does not exist",
                    self.config.slot
                )));
            }
        } else if status.plugin != self.config.plugin {
            return Err(crate::core::errors::ReplicationError::bad_plugin(format!(
                "slot {:?} uses plugin {:?}, you required {:?}",
                self.config.slot, status.plugin, self.config.plugin
            )));
        }

        Ok(())
    }

    /// Look up the slot's current status without mutating it.
    pub fn slot_status(&self) -> ReplicationResult<SlotStatus> {
        let regular = stream::connect_with_retry(&self.config, false, &self.cancel)?;
        slot::slot_status(&regular, &self.config.slot)
    }

    /// Drop this session's replication slot.
    pub fn drop_slot(&self) -> ReplicationResult<()> {
        let replication = stream::connect_with_retry(&self.config, true, &self.cancel)?;
        slot::drop_slot(&replication, &self.config.slot)
    }

    /// The outer `while (!abort)` loop from `pghx_ld_reader_stream`:
    /// connect, `START_REPLICATION`, send an initial feedback frame, and
    /// drive the inner streaming loop. Reconnects only on a transient
    /// streaming failure; a clean end-of-copy from the server or an
    /// explicit `stop()`/cancellation both terminate `stream` (the two
    /// success paths §4.6 groups together: "if it returned success (end of
    /// copy, or stop), break").
    ///
    /// Takes `&self`, not `&mut self`: it mutates no `Session` field, only
    /// the `FeedbackTracker` and connection local to this call, which lets
    /// [`Session::stop`] and [`Session::acknowledge`] be called from
    /// another thread while this runs.
    pub fn stream(&self, handler: &mut dyn Handler) -> ReplicationResult<StopReason> {
        let mut feedback = FeedbackTracker::new(self.config.feedback_interval_ms);
        let ack_rx = match self.ack_rx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        loop {
            if self.cancel.is_cancelled() || self.session_abort.is_cancelled() {
                return Ok(StopReason::Requested);
            }

            let conn = stream::connect_with_retry(&self.config, true, &self.cancel)?;
            stream::init_replication(&conn, &self.config.slot, self.startpos, &self.config.replication_options)?;

            let now = timestamp::now();
            stream::send_feedback(&conn, &mut feedback, now, true, false)?;

            match stream::do_stream(
                &conn,
                &mut feedback,
                handler,
                &self.cancel,
                &self.session_abort,
                &ack_rx,
            ) {
                Ok(StopReason::Requested) => {
                    self.maybe_drop_slot_on_stop();
                    return Ok(StopReason::Requested);
                }
                Ok(StopReason::ServerEndedStream) => {
                    info!("replication stream ended cleanly by server");
                    return Ok(StopReason::ServerEndedStream);
                }
                Err(err) => {
                    warn!(error = %err, "streaming loop failed, reconnecting");
                    continue;
                }
            }
        }
    }

    fn maybe_drop_slot_on_stop(&self) {
        if self.config.drop_slot_on_stop && self.created_slot {
            if let Err(err) = self.drop_slot() {
                warn!(error = %err, "failed to drop slot on stop");
            } else {
                info!(slot = %self.config.slot, "dropped slot on stop");
            }
        }
    }

    /// Whether this session created the slot it is bound to (rather than
    /// attaching to a pre-existing one).
    pub fn created_slot(&self) -> bool {
        self.created_slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_has_not_created_a_slot() {
        let config = SessionConfig::new("slot", "test_decoding");
        let session = Session::new(config, CancellationToken::new());
        assert!(!session.created_slot());
    }

    #[test]
    fn stop_flips_only_this_sessions_abort_flag() {
        let config = SessionConfig::new("slot", "test_decoding");
        let cancel = CancellationToken::new();
        let session = Session::new(config, cancel.clone());
        session.stop();
        assert!(session.session_abort.is_cancelled());
        assert!(!cancel.is_cancelled());
    }
}
