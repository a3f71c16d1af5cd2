//! Thin wrapper adding the extended fd-based operations to a `compio::fs::File`.

use crate::metadata::futimens_fd;
use crate::xattr::{self, XattrOps};
use crate::Result;
use compio::fs::File;
use std::ops::Deref;
use std::time::SystemTime;

/// A `compio::fs::File` plus the fd-based xattr/timestamp operations this
/// crate adds. Derefs to the inner `File` for ordinary reads/writes.
#[derive(Debug)]
pub struct ExtendedFile {
    inner: File,
}

impl ExtendedFile {
    /// Wrap an already-open file.
    #[must_use]
    pub fn new(file: File) -> Self {
        Self { inner: file }
    }

    /// Borrow the inner `compio::fs::File`.
    #[must_use]
    pub fn inner(&self) -> &File {
        &self.inner
    }

    /// Unwrap back to the inner `compio::fs::File`.
    #[must_use]
    pub fn into_inner(self) -> File {
        self.inner
    }

    /// Change access/modification timestamps on this fd.
    ///
    /// # Errors
    ///
    /// Returns an error if `futimens` fails.
    pub async fn set_times(&self, accessed: SystemTime, modified: SystemTime) -> Result<()> {
        futimens_fd(&self.inner, accessed, modified).await
    }
}

impl Deref for ExtendedFile {
    type Target = File;

    fn deref(&self) -> &File {
        &self.inner
    }
}

impl XattrOps for ExtendedFile {
    async fn get_xattr(&self, name: &str) -> Result<Vec<u8>> {
        xattr::get_xattr_impl(&self.inner, name).await
    }

    async fn set_xattr_create(&self, name: &str, value: &[u8]) -> Result<()> {
        xattr::set_xattr_create_impl(&self.inner, name, value).await
    }

    async fn set_xattr(&self, name: &str, value: &[u8]) -> Result<()> {
        xattr::set_xattr_impl(&self.inner, name, value).await
    }

    async fn list_xattr(&self) -> Result<Vec<String>> {
        xattr::list_xattr_impl(&self.inner).await
    }
}
