//! A client-side session state machine for PostgreSQL logical replication.
//!
//! Wraps libpq's `COPY BOTH` replication sub-protocol: connecting and
//! retrying, checking and creating a replication slot, running
//! `START_REPLICATION`, and driving the keepalive/XLogData loop while
//! tracking the decode/commit LSN watermark and sending standby status
//! updates. What a decoded payload *means* is out of scope — it is handed
//! to a [`Handler`] as opaque bytes.

pub mod cancellation;
pub mod core;
pub mod handler;
pub mod replication;
pub mod utils;

pub use cancellation::CancellationToken;
pub use core::{ErrorKind, ReplicationError, ReplicationResult, SessionConfig};
pub use handler::{Handler, StopReason};
pub use replication::{Session, SlotStatus};
