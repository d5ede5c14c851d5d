//! Wire codec: network byte order helpers for the replication protocol
//!
//! PostgreSQL's replication wire messages carry LSNs and timestamps as
//! big-endian 64-bit integers (`fe_recvint64`/`fe_sendint64` in the C
//! original). These two functions are the entire codec; everything else
//! in the stream driver is built on top of them.

pub type XLogRecPtr = u64;
pub type TimestampTz = i64;

pub const INVALID_XLOG_REC_PTR: XLogRecPtr = 0;

/// Decode a big-endian u64 from the first 8 bytes of `buf`.
///
/// # Panics
/// Panics if `buf` has fewer than 8 bytes — callers are expected to have
/// already checked frame length (see the stream driver's `StreamProtocol`
/// length checks).
pub fn decode_u64_be(buf: &[u8]) -> u64 {
    u64::from_be_bytes(buf[..8].try_into().unwrap())
}

/// Encode `val` as big-endian into the first 8 bytes of `buf`.
///
/// # Panics
/// Panics if `buf` has fewer than 8 bytes.
pub fn encode_u64_be(val: u64, buf: &mut [u8]) {
    buf[..8].copy_from_slice(&val.to_be_bytes());
}

/// Format an `XLogRecPtr` the way PostgreSQL does in human-readable
/// contexts and `START_REPLICATION`/`CREATE_REPLICATION_SLOT` commands:
/// `<hi 32 bits>/<lo 32 bits>` in uppercase hex, no leading zero padding.
pub fn format_lsn(lsn: XLogRecPtr) -> String {
    format!("{:X}/{:X}", (lsn >> 32) as u32, lsn as u32)
}

/// Parse an LSN out of a `"%X/%X"`-formatted string, as returned by
/// `CREATE_REPLICATION_SLOT`'s `consistent_point` column.
pub fn parse_lsn(s: &str) -> Option<XLogRecPtr> {
    let (hi, lo) = s.split_once('/')?;
    let hi = u32::from_str_radix(hi, 16).ok()?;
    let lo = u32::from_str_radix(lo, 16).ok()?;
    Some(((hi as u64) << 32) | lo as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_u64_values() {
        for val in [0u64, 1, u64::MAX, 0x1234_5678_9abc_def0, u32::MAX as u64] {
            let mut buf = [0u8; 8];
            encode_u64_be(val, &mut buf);
            assert_eq!(decode_u64_be(&buf), val);
        }
    }

    #[test]
    fn encodes_high_word_first() {
        let mut buf = [0u8; 8];
        encode_u64_be(0x0001_0000_0000_0002, &mut buf);
        assert_eq!(buf, [0, 0, 0, 1, 0, 0, 0, 2]);
    }

    #[test]
    fn formats_and_parses_lsn() {
        let lsn = 0x16B3780u64;
        assert_eq!(format_lsn(lsn), "0/16B3780");
        assert_eq!(parse_lsn("0/16B3780"), Some(lsn));

        let lsn2 = 0x1_0000_0000u64;
        assert_eq!(format_lsn(lsn2), "1/0");
        assert_eq!(parse_lsn("1/0"), Some(lsn2));
    }

    #[test]
    fn rejects_malformed_lsn_strings() {
        assert_eq!(parse_lsn("not-an-lsn"), None);
        assert_eq!(parse_lsn("ZZZZ/0"), None);
    }
}
