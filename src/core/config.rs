//! Session configuration
//!
//! Everything a [`crate::Session`] needs to know before `init` runs:
//! connection parameters, slot/plugin binding, and the two timers governing
//! reconnect budget and feedback cadence. Immutable once the session is
//! built, per the data model's "immutable after init" rule.

use crate::core::errors::{ReplicationError, ReplicationResult};

/// Connection and replication-session configuration.
///
/// Field defaults mirror `pghx_ld_reader_init` in the C original: a
/// 10 second feedback interval, a 60 second connect budget, and
/// `test_decoding`/`test_slot` as placeholder plugin/slot names a caller
/// is expected to override.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: Option<String>,
    pub port: Option<String>,
    pub username: Option<String>,
    pub dbname: Option<String>,
    pub password: Option<String>,
    pub progname: String,

    pub plugin: String,
    pub slot: String,
    pub create_slot: bool,

    /// Feedback interval, in milliseconds. Zero disables timer-driven
    /// feedback (only reply-requested keepalives trigger a frame).
    pub feedback_interval_ms: u64,
    /// Total budget for the initial connect retry loop, in microseconds.
    pub connection_timeout_us: i64,

    /// Extra `"name" 'value'` pairs appended to `START_REPLICATION`'s
    /// option list (proto_version, publication_names, ...). Empty by
    /// default, matching the distilled spec's "no options in current
    /// scope".
    pub replication_options: Vec<(String, Option<String>)>,

    /// When true, and this session created the slot, drop it on a clean
    /// `stop()`-initiated exit. Off by default (see DESIGN.md).
    pub drop_slot_on_stop: bool,
}

impl SessionConfig {
    pub fn new<S: Into<String>>(slot: S, plugin: S) -> Self {
        Self {
            host: None,
            port: None,
            username: None,
            dbname: None,
            password: None,
            progname: "pg_logical_session".to_string(),
            plugin: plugin.into(),
            slot: slot.into(),
            create_slot: true,
            feedback_interval_ms: 10_000,
            connection_timeout_us: 60_000_000,
            replication_options: Vec::new(),
            drop_slot_on_stop: false,
        }
    }

    /// Reject configurations `Session::init` should refuse before ever
    /// opening a connection: an empty slot or plugin name (neither
    /// `CREATE_REPLICATION_SLOT` nor `START_REPLICATION` accept one), or a
    /// slot name that cannot be safely embedded in the replication
    /// command strings this crate builds (see `replication::slot`).
    pub fn validate(&self) -> ReplicationResult<()> {
        if self.slot.trim().is_empty() {
            return Err(ReplicationError::parse("slot name cannot be empty"));
        }
        if self.plugin.trim().is_empty() {
            return Err(ReplicationError::parse("output plugin name cannot be empty"));
        }
        if self.slot.contains(['"', '\'', '\\']) {
            return Err(ReplicationError::parse(format!(
                "slot name {:?} contains characters that cannot be safely embedded in a replication command",
                self.slot
            )));
        }
        if self.plugin.contains(['"', '\'', '\\']) {
            return Err(ReplicationError::parse(format!(
                "plugin name {:?} contains characters that cannot be safely embedded in a replication command",
                self.plugin
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SessionConfig::new("slot", "test_decoding");
        assert!(config.create_slot);
        assert_eq!(config.feedback_interval_ms, 10_000);
        assert_eq!(config.connection_timeout_us, 60_000_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_empty_slot_or_plugin() {
        assert!(SessionConfig::new("", "test_decoding").validate().is_err());
        assert!(SessionConfig::new("slot", "").validate().is_err());
    }

    #[test]
    fn rejects_slot_names_with_quotes() {
        assert!(SessionConfig::new("bad\"slot", "test_decoding")
            .validate()
            .is_err());
    }
}
