//! Replication session internals
//!
//! Four pieces, each grounded in one phase of `pghx_ld_reader`'s lifecycle:
//! slot management (`slot`), feedback/LSN bookkeeping (`feedback`), the
//! connect/stream loop (`stream`), and the public controller that ties them
//! together (`session`).

pub mod feedback;
pub mod session;
pub mod slot;
pub mod stream;

pub use session::Session;
pub use slot::SlotStatus;
