//! File metadata operations using file descriptors
//!
//! - `FileMetadata`: a platform-normalized snapshot used by the attribute
//!   copier to compare/replicate mode, owner, and timestamps.
//! - `statx_at`: nanosecond-precision timestamps via io_uring `IORING_OP_STATX`.
//! - `futimens_fd`: FD-based timestamp change (`futimens`, no path lookup).

use crate::error::{metadata_error, ExtendedError, Result};
#[cfg(target_os = "linux")]
use compio::driver::OpCode;
use compio::fs::File;
#[cfg(target_os = "linux")]
use compio::runtime::submit;
#[cfg(target_os = "linux")]
use io_uring::{opcode, types};
use nix::sys::time::TimeSpec;
#[cfg(target_os = "linux")]
use std::ffi::CString;
#[cfg(target_os = "linux")]
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
#[cfg(target_os = "linux")]
use std::path::Path;
#[cfg(target_os = "linux")]
use std::pin::Pin;
use std::time::SystemTime;

/// Normalized file metadata used by the attribute/xattr copier.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// File size in bytes.
    pub size: u64,
    /// File mode (type + permissions).
    pub mode: u32,
    /// User ID of owner.
    pub uid: u32,
    /// Group ID of owner.
    pub gid: u32,
    /// Last access time.
    pub accessed: SystemTime,
    /// Last modification time.
    pub modified: SystemTime,
}

impl FileMetadata {
    /// Build from `std::fs::Metadata` (path- or fd-derived).
    #[must_use]
    pub fn from_std_metadata(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            size: metadata.len(),
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            accessed: metadata.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }

    /// Whether the mode bits mark a regular file.
    #[must_use]
    pub fn is_file(&self) -> bool {
        (self.mode & libc::S_IFMT as u32) == libc::S_IFREG as u32
    }

    /// Permission bits (`mode & 0o7777`).
    #[must_use]
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// io_uring STATX operation for getting file metadata with nanosecond timestamps (Linux)
#[cfg(target_os = "linux")]
pub struct StatxOp {
    dirfd: std::os::unix::io::RawFd,
    pathname: CString,
    statxbuf: Box<libc::statx>,
    flags: i32,
    mask: u32,
}

#[cfg(target_os = "linux")]
impl StatxOp {
    /// Create a new statx operation.
    #[must_use]
    pub fn new(dirfd: i32, pathname: CString, flags: i32, mask: u32) -> Self {
        Self {
            dirfd,
            pathname,
            statxbuf: Box::new(unsafe { std::mem::zeroed() }),
            flags,
            mask,
        }
    }
}

#[cfg(target_os = "linux")]
impl OpCode for StatxOp {
    fn create_entry(mut self: Pin<&mut Self>) -> compio::driver::OpEntry {
        compio::driver::OpEntry::Submission(
            opcode::Statx::new(
                types::Fd(self.dirfd),
                self.pathname.as_ptr(),
                &mut *self.statxbuf as *mut libc::statx as *mut types::statx,
            )
            .flags(self.flags)
            .mask(self.mask)
            .build(),
        )
    }
}

/// Get file metadata with nanosecond timestamps using io_uring STATX.
///
/// # Errors
///
/// Returns an error if the statx operation fails.
#[cfg(target_os = "linux")]
pub async fn statx_at(path: &Path) -> Result<(SystemTime, SystemTime)> {
    let path_cstr = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| metadata_error(&format!("Invalid path: {}", e)))?;

    // STATX_BASIC_STATS = 0x7ff (all basic fields)
    let op = StatxOp::new(libc::AT_FDCWD, path_cstr, 0, 0x0000_07ff);
    let result = submit(op).await;

    match result.0 {
        Ok(_) => {
            let statx_buf = result.1.statxbuf;

            let atime_secs = u64::try_from(statx_buf.stx_atime.tv_sec).unwrap_or(0);
            let atime_nanos = statx_buf.stx_atime.tv_nsec;
            let mtime_secs = u64::try_from(statx_buf.stx_mtime.tv_sec).unwrap_or(0);
            let mtime_nanos = statx_buf.stx_mtime.tv_nsec;

            let atime = SystemTime::UNIX_EPOCH + std::time::Duration::new(atime_secs, atime_nanos);
            let mtime = SystemTime::UNIX_EPOCH + std::time::Duration::new(mtime_secs, mtime_nanos);

            Ok((atime, mtime))
        }
        Err(e) => Err(metadata_error(&format!("statx failed: {}", e))),
    }
}

/// Fallback statx for non-Linux Unix: nanosecond precision via `std::fs::metadata`.
#[cfg(not(target_os = "linux"))]
pub async fn statx_at(path: &std::path::Path) -> Result<(SystemTime, SystemTime)> {
    let path = path.to_path_buf();
    compio::runtime::spawn_blocking(move || {
        let meta = std::fs::metadata(&path)
            .map_err(|e| metadata_error(&format!("stat failed: {}", e)))?;
        Ok((
            meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
            meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        ))
    })
    .await
    .map_err(ExtendedError::spawn_join)?
}

fn system_time_to_timespec(time: SystemTime) -> Result<TimeSpec> {
    let duration = time
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(|e| metadata_error(&format!("Invalid time: {}", e)))?;

    Ok(TimeSpec::new(
        duration.as_secs() as i64,
        duration.subsec_nanos() as i64,
    ))
}

/// Change file timestamps using the file descriptor (`futimens`, FD-based, no TOCTOU).
///
/// # Errors
///
/// Returns an error if the fd is invalid, permission is denied, or the
/// timestamp values are invalid.
pub async fn futimens_fd(file: &File, accessed: SystemTime, modified: SystemTime) -> Result<()> {
    let fd = file.as_raw_fd();
    compio::runtime::spawn_blocking(move || {
        let atime = system_time_to_timespec(accessed)?;
        let mtime = system_time_to_timespec(modified)?;

        // SAFETY: caller guarantees fd stays open for the duration of this call.
        nix::sys::stat::futimens(fd, &atime, &mtime)
            .map_err(|e| metadata_error(&format!("futimens failed: {}", e)))
    })
    .await
    .map_err(ExtendedError::spawn_join)?
}
