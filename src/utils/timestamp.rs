//! Timebase: monotonic-enough microsecond timestamps in the PostgreSQL epoch
//!
//! The replication protocol timestamps everything (feedback frames,
//! keepalives) in microseconds since 2000-01-01 UTC rather than the Unix
//! epoch. `now()`/`diff()`/`exceeds()` correspond to the C original's
//! `feGetCurrentTimestamp`/`feTimestampDifference`/
//! `feTimestampDifferenceExceeds`.

use crate::utils::binary::TimestampTz;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds from the Unix epoch (1970-01-01) to the PostgreSQL epoch
/// (2000-01-01): `(POSTGRES_EPOCH_JDATE - UNIX_EPOCH_JDATE) * 86400`.
const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800;

/// Current wall-clock time, in microseconds since the PostgreSQL epoch.
pub fn now() -> TimestampTz {
    let since_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let unix_micros = since_unix.as_secs() as i64 * 1_000_000 + since_unix.subsec_micros() as i64;
    unix_micros - PG_EPOCH_OFFSET_SECS * 1_000_000
}

/// Difference between two PostgreSQL-epoch timestamps, clamped to zero if
/// `stop` is not after `start`.
pub fn diff(start: TimestampTz, stop: TimestampTz) -> (i64, i32) {
    let delta = stop - start;
    if delta <= 0 {
        (0, 0)
    } else {
        ((delta / 1_000_000), (delta % 1_000_000) as i32)
    }
}

/// True if `stop - start >= ms` milliseconds.
pub fn exceeds(start: TimestampTz, stop: TimestampTz, ms: i64) -> bool {
    stop - start >= ms * 1_000
}

/// Render a PostgreSQL-epoch microsecond timestamp as a human-readable UTC
/// string, for log lines only.
pub fn format_pg_timestamp(ts: TimestampTz) -> String {
    let secs = ts / 1_000_000 + PG_EPOCH_OFFSET_SECS;
    let nsecs = ((ts.rem_euclid(1_000_000)) * 1_000) as u32;
    match chrono::DateTime::from_timestamp(secs, nsecs) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string(),
        None => format!("<invalid pg timestamp {ts}>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_clamps_negative_to_zero() {
        assert_eq!(diff(100, 50), (0, 0));
        assert_eq!(diff(100, 100), (0, 0));
    }

    #[test]
    fn diff_splits_secs_and_usecs() {
        assert_eq!(diff(0, 2_500_000), (2, 500_000));
    }

    #[test]
    fn exceeds_is_inclusive_at_the_boundary() {
        assert!(exceeds(0, 10_000, 10));
        assert!(!exceeds(0, 9_999, 10));
    }

    #[test]
    fn now_is_in_the_right_epoch() {
        // Sanity check: PostgreSQL-epoch "now" should be a large positive
        // number for any date after 2000-01-01, and strictly less than the
        // Unix-epoch microsecond timestamp for the same instant.
        let pg_now = now();
        assert!(pg_now > 0);
    }
}
