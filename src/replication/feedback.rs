//! LSN bookkeeping and standby status update (feedback) frames.
//!
//! Grounded in `pghx_ld_reader_sendFeedback`/`_compute_wakeup`/
//! `_acknowledge` from the C original. `FeedbackTracker` owns the three LSN
//! fields the original keeps directly on `pghx_ld_reader`
//! (`decoded_lsn`/`commited_lsn`/`last_status`) plus the wakeup-timeout
//! computation that the stream driver's blocking wait depends on.

use crate::utils::binary::{encode_u64_be, TimestampTz, XLogRecPtr, INVALID_XLOG_REC_PTR};
use crate::utils::timestamp;
use std::time::Duration;

/// A standby status update ('r') frame is exactly 34 bytes: msgtype + three
/// LSNs + a timestamp + a reply-requested flag.
pub const FEEDBACK_FRAME_LEN: usize = 1 + 8 + 8 + 8 + 8 + 1;

/// Tracks the decode/commit watermark for a single streaming session and
/// builds the standby status update frames that report it upstream.
#[derive(Debug, Clone)]
pub struct FeedbackTracker {
    /// Highest LSN seen in any keepalive or XLogData message so far.
    pub decoded_lsn: XLogRecPtr,
    /// Highest LSN the handler has actually acknowledged (committed).
    pub committed_lsn: XLogRecPtr,
    /// PostgreSQL-epoch microsecond timestamp of the last feedback frame
    /// sent, or `-1` before any frame has gone out.
    pub last_status: TimestampTz,
    /// Feedback cadence, matching `standby_message_timeout`. Zero disables
    /// timer-driven feedback.
    pub interval_ms: i64,
}

impl FeedbackTracker {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            decoded_lsn: INVALID_XLOG_REC_PTR,
            committed_lsn: INVALID_XLOG_REC_PTR,
            last_status: -1,
            interval_ms: interval_ms as i64,
        }
    }

    /// Record a newly observed LSN from a keepalive or XLogData message.
    /// Monotonic: never moves `decoded_lsn` backwards.
    pub fn observe(&mut self, lsn: XLogRecPtr) {
        self.decoded_lsn = self.decoded_lsn.max(lsn);
    }

    /// Advance `committed_lsn` to `decoded_lsn`, returning the previous
    /// value so the caller can roll back if the feedback send fails.
    pub fn advance_committed(&mut self) -> XLogRecPtr {
        let old = self.committed_lsn;
        self.committed_lsn = self.decoded_lsn;
        old
    }

    pub fn rollback_committed(&mut self, previous: XLogRecPtr) {
        self.committed_lsn = previous;
    }

    /// True unless `force`: a feedback frame is worth sending when there is
    /// nothing new to report.
    pub fn should_send(&self, force: bool) -> bool {
        force || self.decoded_lsn != self.committed_lsn
    }

    /// How long the stream driver should block waiting for socket
    /// readability before it must wake up to send a keepalive-cadence
    /// feedback frame — `None` means block indefinitely (no timer
    /// configured).
    pub fn compute_wakeup(&self, now: TimestampTz) -> Option<Duration> {
        if self.interval_ms == 0 || self.last_status < 0 {
            return None;
        }
        let message_target = self.last_status + (self.interval_ms - 1) * 1000;
        if message_target <= 0 {
            return None;
        }
        let (secs, usecs) = timestamp::diff(now, message_target);
        let secs = if secs <= 0 { 1 } else { secs };
        Some(Duration::new(secs as u64, (usecs as u32) * 1000))
    }

    pub fn note_status_sent(&mut self, now: TimestampTz) {
        self.last_status = now;
    }
}

/// Build a 34-byte standby status update ('r') frame: write/flush LSN set
/// to `committed_lsn`, apply LSN always `InvalidXLogRecPtr` (this client
/// never reports an apply position), `sendTime` set to `now`.
pub fn build_feedback_frame(committed_lsn: XLogRecPtr, now: TimestampTz, reply_requested: bool) -> [u8; FEEDBACK_FRAME_LEN] {
    let mut buf = [0u8; FEEDBACK_FRAME_LEN];
    let mut pos = 0;
    buf[pos] = b'r';
    pos += 1;
    encode_u64_be(committed_lsn, &mut buf[pos..]);
    pos += 8;
    encode_u64_be(committed_lsn, &mut buf[pos..]);
    pos += 8;
    encode_u64_be(INVALID_XLOG_REC_PTR, &mut buf[pos..]);
    pos += 8;
    encode_u64_be(now as u64, &mut buf[pos..]);
    pos += 8;
    buf[pos] = u8::from(reply_requested);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_is_monotonic() {
        let mut t = FeedbackTracker::new(10_000);
        t.observe(100);
        t.observe(50);
        assert_eq!(t.decoded_lsn, 100);
        t.observe(200);
        assert_eq!(t.decoded_lsn, 200);
    }

    #[test]
    fn should_send_only_when_forced_or_lsn_changed() {
        let mut t = FeedbackTracker::new(10_000);
        assert!(!t.should_send(false));
        assert!(t.should_send(true));
        t.observe(42);
        assert!(t.should_send(false));
    }

    #[test]
    fn advance_and_rollback_committed() {
        let mut t = FeedbackTracker::new(10_000);
        t.observe(500);
        let previous = t.advance_committed();
        assert_eq!(previous, 0);
        assert_eq!(t.committed_lsn, 500);
        t.rollback_committed(previous);
        assert_eq!(t.committed_lsn, 0);
    }

    #[test]
    fn compute_wakeup_disabled_when_interval_zero() {
        let t = FeedbackTracker::new(0);
        assert!(t.compute_wakeup(0).is_none());
    }

    #[test]
    fn compute_wakeup_before_any_status_is_none() {
        let t = FeedbackTracker::new(10_000);
        assert!(t.compute_wakeup(0).is_none());
    }

    #[test]
    fn compute_wakeup_clamps_to_at_least_one_second() {
        let mut t = FeedbackTracker::new(10_000);
        t.note_status_sent(1_000_000);
        let wakeup = t.compute_wakeup(1_000_000).unwrap();
        assert!(wakeup.as_secs() >= 1);
    }

    #[test]
    fn feedback_frame_has_the_expected_byte_layout() {
        let frame = build_feedback_frame(0x1_0000_0000, 42, true);
        assert_eq!(frame.len(), FEEDBACK_FRAME_LEN);
        assert_eq!(frame[0], b'r');
        assert_eq!(&frame[1..9], &0x1_0000_0000u64.to_be_bytes());
        assert_eq!(&frame[9..17], &0x1_0000_0000u64.to_be_bytes());
        assert_eq!(&frame[17..25], &0u64.to_be_bytes());
        assert_eq!(&frame[25..33], &42i64.to_be_bytes());
        assert_eq!(frame[33], 1);
    }
}
