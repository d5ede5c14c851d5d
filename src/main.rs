//! Thin CLI demo around the [`pg_logical_session`] library.
//!
//! Connects to a slot, streams decoded payloads, and logs each one. Real
//! hosts are expected to link the library directly and supply their own
//! [`pg_logical_session::Handler`] — this binary exists to exercise the
//! session state machine end to end, the way the teacher's `main.rs` wraps
//! its own server loop in a CLI.

use clap::Parser;
use pg_logical_session::{CancellationToken, Handler, Session, SessionConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pg_logical_session", about = "Stream a PostgreSQL logical replication slot")]
struct Args {
    /// Connection host.
    #[arg(long, env = "PGHOST")]
    host: Option<String>,

    /// Connection port.
    #[arg(long, env = "PGPORT")]
    port: Option<String>,

    /// Connection username.
    #[arg(long, env = "PGUSER")]
    username: Option<String>,

    /// Database name. Leave unset to use a physical-replication-mode
    /// connection (`replication=true`, no specific database bound).
    #[arg(long, env = "PGDATABASE")]
    dbname: Option<String>,

    /// Connection password. Prefer a `.pgpass` file or `PGPASSWORD` over
    /// passing this on the command line.
    #[arg(long, env = "PGPASSWORD")]
    password: Option<String>,

    /// Logical decoding output plugin.
    #[arg(long, default_value = "test_decoding")]
    plugin: String,

    /// Replication slot name.
    #[arg(long, default_value = "pg_logical_session")]
    slot: String,

    /// Create the slot if it does not already exist.
    #[arg(long, default_value_t = true)]
    create_slot: bool,

    /// Feedback cadence, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    feedback_interval_ms: u64,

    /// Total connection retry budget, in microseconds.
    #[arg(long, default_value_t = 60_000_000)]
    connection_timeout_us: i64,

    /// Drop the slot on a clean shutdown, if this process created it.
    #[arg(long, default_value_t = false)]
    drop_slot_on_stop: bool,
}

struct LoggingHandler {
    count: u64,
}

impl Handler for LoggingHandler {
    fn handle(&mut self, payload: &[u8]) -> bool {
        self.count += 1;
        tracing::info!(
            message_no = self.count,
            bytes = payload.len(),
            payload = %String::from_utf8_lossy(payload),
            "decoded payload"
        );
        true
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = SessionConfig::new(args.slot, args.plugin);
    config.host = args.host;
    config.port = args.port;
    config.username = args.username;
    config.dbname = args.dbname;
    config.password = args.password;
    config.create_slot = args.create_slot;
    config.feedback_interval_ms = args.feedback_interval_ms;
    config.connection_timeout_us = args.connection_timeout_us;
    config.drop_slot_on_stop = args.drop_slot_on_stop;

    let cancel = CancellationToken::new();
    cancel.install_ctrlc_handler()?;

    let mut session = Session::new(config, cancel);
    session.init()?;

    let mut handler = LoggingHandler { count: 0 };
    let reason = session.stream(&mut handler)?;
    tracing::info!(?reason, "session stopped");

    Ok(())
}
