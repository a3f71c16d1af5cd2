//! Error counters for the dispatch loop (spec §3/§9 REDESIGN FLAG: "Global
//! error counters").
//!
//! Lock-free atomic counters shared across concurrent workers via `Arc`,
//! replacing the original copytool's two file-scope `int` globals
//! (`err_major`, `err_minor` in `lhsmtool_posix.c`) incremented from any
//! thread with no synchronization of their own.

use std::sync::atomic::{AtomicU64, Ordering};

/// Count of fatal action failures (a copy that failed outright) and soft
/// ones (attrs/xattr/stripe/shadow issues that didn't stop the copy).
/// `Ordering::Relaxed` throughout: these are end-of-run totals, not a
/// synchronization point between workers.
#[derive(Debug, Default)]
pub struct ErrorCounters {
    major: AtomicU64,
    minor: AtomicU64,
}

impl ErrorCounters {
    /// A fresh, zeroed pair of counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            major: AtomicU64::new(0),
            minor: AtomicU64::new(0),
        }
    }

    /// Record one fatal action failure.
    pub fn record_major(&self) {
        self.major.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one soft (non-fatal) action failure.
    pub fn record_minor(&self) {
        self.minor.fetch_add(1, Ordering::Relaxed);
    }

    /// Current major-error count.
    #[must_use]
    pub fn major(&self) -> u64 {
        self.major.load(Ordering::Relaxed)
    }

    /// Current minor-error count.
    #[must_use]
    pub fn minor(&self) -> u64 {
        self.minor.load(Ordering::Relaxed)
    }

    /// Process exit code contract (spec §6): nonzero iff any major error
    /// occurred. Minor errors are reported but don't affect the exit code,
    /// matching the original's `return (err_major == 0) ? 0 : 1`.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.major() != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero_with_clean_exit_code() {
        let counters = ErrorCounters::new();
        assert_eq!(counters.major(), 0);
        assert_eq!(counters.minor(), 0);
        assert_eq!(counters.exit_code(), 0);
    }

    #[test]
    fn major_error_flips_exit_code_minor_does_not() {
        let counters = ErrorCounters::new();
        counters.record_minor();
        assert_eq!(counters.exit_code(), 0);
        counters.record_major();
        assert_eq!(counters.exit_code(), 1);
        assert_eq!(counters.major(), 1);
        assert_eq!(counters.minor(), 1);
    }
}
