//! Cooperative cancellation: a process-wide flag plus a per-session flag.
//!
//! The C original keeps a `volatile sig_atomic_t global_abort` set by a
//! `SIGINT` handler, checked alongside a per-reader `r->abort` at every loop
//! boundary in `pghx_ld_reader_stream`/`_do_stream`/`_connect`. This module
//! reproduces that split with `Arc<AtomicBool>` instead of a raw global, and
//! wires the signal handler through the `ctrlc` crate rather than `signal()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A process-wide cancellation flag. Cheap to clone; all clones observe the
/// same underlying flag. Call [`CancellationToken::install_ctrlc_handler`]
/// once per process (normally from `main`) to wire it to `SIGINT`.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Install a `ctrlc` handler that cancels this token on `SIGINT` (and
    /// `SIGTERM` where supported). Mirrors the C original's
    /// `signal(SIGINT, sigint_handler)` in `pghx_ld_reader_init`, but
    /// through a safe crate instead of a raw libc signal handler.
    pub fn install_ctrlc_handler(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || token.cancel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        assert!(!CancellationToken::new().is_cancelled());
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
