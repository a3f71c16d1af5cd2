//! Error taxonomy for the HSM copy agent (see spec §7: fatal / soft / retryable).

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, HsmError>;

/// Unified error type. Every variant knows whether it's retryable (the
/// coordinator should re-offer the action) independent of whether the
/// caller treats it as a major or minor outcome — that classification is
/// the handler's job (see `handlers::Outcome`), not the error's.
#[derive(Debug, Error)]
pub enum HsmError {
    /// Underlying OS error (open/read/write/rename/unlink/mkdir/...).
    #[error("{0}")]
    Io(#[source] std::io::Error),

    /// The non-blocking I/O primitive's readiness wait expired twice in a
    /// row with no bytes transferred this call (spec §4.C/§4.D).
    #[error("operation timed out")]
    Timeout,

    /// `src_fd`/`dst_fd` did not both refer to regular files (spec §4.D).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The coordinator's progress callback returned non-zero (spec §4.D, §8).
    #[error("cancelled by coordinator (rc={0})")]
    Cancelled(i32),

    /// `hal.fs_name` did not match the configured filesystem name (spec §4.G).
    #[error("filesystem name mismatch: expected {expected}, got {actual}")]
    FsNameMismatch {
        /// Name configured at startup.
        expected: String,
        /// Name reported by the action list.
        actual: String,
    },

    /// An action list was malformed or an item overran its declared bounds
    /// (spec §4.G, "protocol violation").
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A `.lov` stripe sidecar was missing or malformed in a context where
    /// that's fatal (e.g. `restore_stripe`, spec §4.B).
    #[error("stripe layout error: {0}")]
    Stripe(String),

    /// Wraps an error already classified at a lower level (e.g.
    /// `compio_fs_extended::ExtendedError` from the xattr/metadata crate).
    #[error(transparent)]
    Extended(#[from] compio_fs_extended::ExtendedError),
}

impl HsmError {
    /// Whether the coordinator should be told this is retryable
    /// (`HP_FLAG_RETRY`, spec §7). Currently exactly the timeout class,
    /// including a timeout buried inside an I/O error's `ETIMEDOUT`.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Io(e) => e.raw_os_error() == Some(libc::ETIMEDOUT),
            _ => false,
        }
    }

    /// The POSIX errno this error maps to, for `action.end(..., abs_errno)`
    /// and the process exit code (`-rc`, spec §6).
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Self::Timeout => libc::ETIMEDOUT,
            Self::InvalidInput(_) => libc::EINVAL,
            Self::Cancelled(rc) => *rc,
            Self::FsNameMismatch { .. } | Self::Protocol(_) => libc::EPROTO,
            Self::Stripe(_) => libc::EIO,
            Self::Extended(_) => libc::EIO,
        }
    }
}

impl From<std::io::Error> for HsmError {
    fn from(e: std::io::Error) -> Self {
        if e.raw_os_error() == Some(libc::ETIMEDOUT) {
            Self::Timeout
        } else {
            Self::Io(e)
        }
    }
}
