//! Error type for `compio-fs-extended`.

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ExtendedError>;

/// Errors raised by the fd-based filesystem extensions in this crate.
#[derive(Debug, thiserror::Error)]
pub enum ExtendedError {
    /// An xattr get/set/list operation failed.
    #[error("xattr operation failed: {0}")]
    Xattr(String),

    /// A statx/futimens metadata operation failed.
    #[error("metadata operation failed: {0}")]
    Metadata(String),

    /// A `compio::runtime::spawn`/`spawn_blocking` task panicked or was cancelled.
    #[error("background task failed: {0}")]
    SpawnJoin(String),

    /// Underlying OS error, passed through unchanged.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExtendedError {
    /// Build a [`ExtendedError::SpawnJoin`] from a `compio` join error.
    #[must_use]
    pub fn spawn_join(join_error: impl std::fmt::Debug) -> Self {
        Self::SpawnJoin(format!("{join_error:?}"))
    }
}

/// Build an [`ExtendedError::Xattr`].
#[must_use]
pub fn xattr_error(msg: &str) -> ExtendedError {
    ExtendedError::Xattr(msg.to_string())
}

/// Build an [`ExtendedError::Metadata`].
#[must_use]
pub fn metadata_error(msg: &str) -> ExtendedError {
    ExtendedError::Metadata(msg.to_string())
}
