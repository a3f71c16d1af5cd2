//! Extended attributes (xattr) operations on an open file descriptor, using
//! io_uring opcodes on Linux.
//!
//! # Platform Differences
//!
//! Extended attribute APIs differ between Linux and macOS:
//!
//! ## Linux (simpler API):
//! - `getxattr(path, name, value, size)` - 4 args
//! - `setxattr(path, name, value, size, flags)` - 5 args
//! - `listxattr(path, list, size)` - 3 args
//!
//! ## macOS (BSD API with extra features):
//! - `getxattr(path, name, value, size, position, options)` - 6 args
//! - `setxattr(path, name, value, size, position, options)` - 6 args
//!
//! This crate only needs fd-based operations (the copytool never has a bare
//! path once the source/destination are open), so only the Linux io_uring
//! path is accelerated; other platforms return a not-yet-implemented error.

use crate::error::{xattr_error, Result};
#[cfg(target_os = "linux")]
use compio::driver::OpCode;
use compio::fs::File;
#[cfg(target_os = "linux")]
use compio::runtime::submit;
#[cfg(target_os = "linux")]
use io_uring::{opcode, types};
#[cfg(target_os = "linux")]
use std::ffi::CString;
#[cfg(target_os = "linux")]
use std::pin::Pin;

/// XATTR_CREATE: fail if the attribute already exists (used by stripe restore).
#[cfg(target_os = "linux")]
pub const XATTR_CREATE: i32 = libc::XATTR_CREATE;

/// Trait for xattr operations on an already-open file.
#[allow(async_fn_in_trait)]
pub trait XattrOps {
    /// Get an extended attribute value.
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute doesn't exist, permission is denied,
    /// or the underlying syscall fails.
    async fn get_xattr(&self, name: &str) -> Result<Vec<u8>>;

    /// Set an extended attribute value, failing if it already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if permission is denied, the value already exists,
    /// or the underlying syscall fails.
    async fn set_xattr_create(&self, name: &str, value: &[u8]) -> Result<()>;

    /// Set an extended attribute value, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns an error if permission is denied or the underlying syscall fails.
    async fn set_xattr(&self, name: &str, value: &[u8]) -> Result<()>;

    /// List all extended attribute names.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying syscall fails.
    async fn list_xattr(&self) -> Result<Vec<String>>;
}

#[cfg(target_os = "linux")]
struct GetXattrOp {
    fd: std::os::unix::io::RawFd,
    name: CString,
    buffer: Vec<u8>,
}

#[cfg(target_os = "linux")]
impl GetXattrOp {
    fn new(fd: std::os::unix::io::RawFd, name: CString, size: usize) -> Self {
        Self {
            fd,
            name,
            buffer: vec![0u8; size],
        }
    }
}

#[cfg(target_os = "linux")]
impl OpCode for GetXattrOp {
    fn create_entry(mut self: Pin<&mut Self>) -> compio::driver::OpEntry {
        compio::driver::OpEntry::Submission(
            opcode::FGetXattr::new(
                types::Fd(self.fd),
                self.name.as_ptr(),
                self.buffer.as_mut_ptr() as *mut libc::c_void,
                self.buffer.len() as u32,
            )
            .build(),
        )
    }
}

#[cfg(target_os = "linux")]
struct SetXattrOp {
    fd: std::os::unix::io::RawFd,
    name: CString,
    value: Vec<u8>,
    flags: i32,
}

#[cfg(target_os = "linux")]
impl SetXattrOp {
    fn new(fd: std::os::unix::io::RawFd, name: CString, value: Vec<u8>, flags: i32) -> Self {
        Self {
            fd,
            name,
            value,
            flags,
        }
    }
}

#[cfg(target_os = "linux")]
impl OpCode for SetXattrOp {
    fn create_entry(self: Pin<&mut Self>) -> compio::driver::OpEntry {
        compio::driver::OpEntry::Submission(
            opcode::FSetXattr::new(
                types::Fd(self.fd),
                self.name.as_ptr(),
                self.value.as_ptr() as *const libc::c_void,
                self.value.len() as u32,
            )
            .flags(self.flags as u32)
            .build(),
        )
    }
}

/// Get an extended attribute off an open fd (io_uring `FGETXATTR`).
///
/// # Errors
///
/// Returns an error if the attribute doesn't exist or the syscall fails.
#[cfg(target_os = "linux")]
pub async fn get_xattr_impl(file: &File, name: &str) -> Result<Vec<u8>> {
    use std::os::fd::AsRawFd;

    let name_cstr =
        CString::new(name).map_err(|e| xattr_error(&format!("Invalid xattr name: {e}")))?;
    let fd = file.as_raw_fd();

    // io_uring FGETXATTR requires two calls: first to get the size, then the value.
    let size_op = GetXattrOp::new(fd, name_cstr.clone(), 0);
    let size_result = submit(size_op).await;

    let size = match size_result.0 {
        Ok(s) => s,
        Err(e) => return Err(xattr_error(&format!("fgetxattr size query failed: {}", e))),
    };

    if size == 0 {
        return Ok(Vec::new());
    }

    let value_op = GetXattrOp::new(fd, name_cstr, size);
    let value_result = submit(value_op).await;

    match value_result.0 {
        Ok(actual_size) => {
            let mut buffer = value_result.1.buffer;
            buffer.truncate(actual_size);
            Ok(buffer)
        }
        Err(e) => Err(xattr_error(&format!("fgetxattr failed: {}", e))),
    }
}

#[cfg(not(target_os = "linux"))]
pub async fn get_xattr_impl(_file: &File, _name: &str) -> Result<Vec<u8>> {
    Err(xattr_error(
        "file-descriptor based xattr get is only implemented on Linux",
    ))
}

/// Set an extended attribute on an open fd (io_uring `FSETXATTR`).
///
/// # Errors
///
/// Returns an error if the syscall fails (including `EEXIST` when `flags`
/// requests create-only semantics and the attribute is already set).
#[cfg(target_os = "linux")]
async fn set_xattr_impl_flags(file: &File, name: &str, value: &[u8], flags: i32) -> Result<()> {
    use std::os::fd::AsRawFd;

    let name_cstr =
        CString::new(name).map_err(|e| xattr_error(&format!("Invalid xattr name: {e}")))?;
    let fd = file.as_raw_fd();
    let value_vec = value.to_vec();

    let op = SetXattrOp::new(fd, name_cstr, value_vec, flags);
    let result = submit(op).await;

    match result.0 {
        Ok(_) => Ok(()),
        Err(e) => Err(xattr_error(&format!("fsetxattr failed: {}", e))),
    }
}

#[cfg(not(target_os = "linux"))]
async fn set_xattr_impl_flags(_file: &File, _name: &str, _value: &[u8], _flags: i32) -> Result<()> {
    Err(xattr_error(
        "file-descriptor based xattr set is only implemented on Linux",
    ))
}

/// Set (overwrite) an extended attribute on an open fd.
///
/// # Errors
///
/// Returns an error if the underlying syscall fails.
pub async fn set_xattr_impl(file: &File, name: &str, value: &[u8]) -> Result<()> {
    set_xattr_impl_flags(file, name, value, 0).await
}

/// Set an extended attribute on an open fd, failing if it already exists.
///
/// # Errors
///
/// Returns an error if the attribute already exists or the syscall fails.
pub async fn set_xattr_create_impl(file: &File, name: &str, value: &[u8]) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        set_xattr_impl_flags(file, name, value, XATTR_CREATE).await
    }
    #[cfg(not(target_os = "linux"))]
    {
        set_xattr_impl_flags(file, name, value, 0).await
    }
}

/// List extended attribute names on an open fd.
///
/// The kernel has no `IORING_OP_FLISTXATTR` (as of 6.x, only `FGETXATTR` and
/// `FSETXATTR` exist), so this falls back to the safe `xattr` crate's
/// `FileExt::list_xattr`, run off the reactor thread via `compio::runtime::spawn`.
///
/// # Errors
///
/// Returns an error if the underlying syscall fails.
#[cfg(target_os = "linux")]
pub async fn list_xattr_impl(file: &File) -> Result<Vec<String>> {
    use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd};
    use xattr::FileExt as _;

    let fd = file.as_raw_fd();

    compio::runtime::spawn(async move {
        // SAFETY: fd is valid for the duration of this call; we return it below.
        let temp_file = unsafe { std::fs::File::from_raw_fd(fd) };

        let attrs = temp_file
            .list_xattr()
            .map_err(|e| xattr_error(&format!("flistxattr failed: {}", e)))?;

        let _ = temp_file.into_raw_fd();

        let names: Vec<String> = attrs
            .filter_map(|os_str| os_str.to_str().map(|s| s.to_string()))
            .collect();

        Ok(names)
    })
    .await
    .map_err(|e| xattr_error(&format!("spawn failed: {e:?}")))?
}

#[cfg(not(target_os = "linux"))]
pub async fn list_xattr_impl(_file: &File) -> Result<Vec<String>> {
    Err(xattr_error(
        "file-descriptor based xattr list is only implemented on Linux",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExtendedFile;
    use std::fs;
    use tempfile::TempDir;

    #[compio::test]
    async fn test_xattr_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        fs::write(&file_path, "test content").unwrap();

        let file = compio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&file_path)
            .await
            .unwrap();
        let extended = ExtendedFile::new(file);

        if extended.set_xattr("user.test", b"value").await.is_ok() {
            let value = extended.get_xattr("user.test").await.unwrap();
            assert_eq!(value, b"value");

            let names = extended.list_xattr().await.unwrap();
            assert!(names.contains(&"user.test".to_string()));

            let err = extended.set_xattr_create("user.test", b"other").await;
            assert!(err.is_err());
        } else {
            println!("xattrs not supported on this filesystem - test skipped");
        }
    }
}
