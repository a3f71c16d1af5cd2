//! # compio-fs-extended
//!
//! Fd-based filesystem extensions for compio used by the HSM copy agent:
//! - Extended attributes (xattr) get/set/list on an open fd, using io_uring
//!   opcodes on Linux.
//! - Nanosecond-precision timestamps (`statx`) and fd-based timestamp
//!   changes (`futimens`).
//!
//! ## Example
//!
//! ```rust,no_run
//! use compio_fs_extended::{ExtendedFile, XattrOps};
//! use compio::fs::File;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let file = File::open("archived.dat").await?;
//! let extended = ExtendedFile::new(file);
//! let layout = extended.get_xattr("trusted.lov").await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod extended_file;
pub mod metadata;
pub mod xattr;

// Re-export main types
pub use error::{ExtendedError, Result};
pub use extended_file::ExtendedFile;

// Re-export the operation trait
pub use xattr::XattrOps;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Feature flags available
pub mod features {
    /// xattr support using io_uring opcodes
    pub const XATTR: &str = "xattr";
}
