//! Attribute/xattr copier (spec §4.E): best-effort replication of mode,
//! owner, timestamps, and extended attributes from the source fd to the
//! destination fd.
//!
//! Grounded in `ct_copy_attr`/`ct_copy_xattr` of the original copytool. Both
//! are "minor" failures (spec §7): a mismatched mode or a missing xattr
//! should not fail the whole archive/restore action, only be logged and
//! counted against `err_minor`.
//!
//! `ct_copy_attr` in the original has a brace bug — its `CT_ERROR` +
//! `return -errno` sit outside the `if` that guards them, so the function
//! always returns early regardless of whether `fchmod`/`fchown`/`futimes`
//! actually failed. The intent is unambiguous from the log message itself
//! ("fchmod fchown or futimes failed"): report and return an error only
//! when one of the three calls failed. This module implements that intent.

use crate::error::Result;
use compio_fs_extended::metadata::FileMetadata;
use compio_fs_extended::{ExtendedFile, XattrOps};
use std::os::unix::io::AsRawFd;

/// Prefix filtered out of xattrs copied *to* the filesystem during a
/// restore (lustre's own `trusted.*` xattrs aren't meaningful outside the
/// archive and usually aren't supported on other filesystems).
const XATTR_TRUSTED_PREFIX: &str = "trusted.";

/// Copy `src`'s mode, owner, and timestamps onto `dst`. Best-effort: logs
/// and returns an error if any of `fchmod`/`fchown`/`futimens` fails, but
/// the caller treats that as a minor (non-fatal) outcome.
///
/// # Errors
///
/// Returns an error if the source's metadata can't be read, or if
/// `fchmod`/`fchown`/`futimens` on the destination fails.
pub async fn copy_attrs(src: &ExtendedFile, dst: &ExtendedFile) -> Result<()> {
    let meta = std::fs::metadata(format!("/proc/self/fd/{}", src.as_raw_fd()))?;
    let meta = FileMetadata::from_std_metadata(&meta);

    let dst_fd = dst.as_raw_fd();
    let chmod_rc = unsafe { libc::fchmod(dst_fd, meta.mode as libc::mode_t) };
    let chown_rc = unsafe { libc::fchown(dst_fd, meta.uid, meta.gid) };
    let times_result = dst.set_times(meta.accessed, meta.modified).await;

    if chmod_rc < 0 {
        let e = std::io::Error::last_os_error();
        tracing::error!(error = %e, "fchmod failed while copying attributes");
        return Err(e.into());
    }
    if chown_rc < 0 {
        let e = std::io::Error::last_os_error();
        tracing::error!(error = %e, "fchown failed while copying attributes");
        return Err(e.into());
    }
    if let Err(e) = times_result {
        tracing::error!(error = %e, "futimens failed while copying attributes");
        return Err(e.into());
    }

    Ok(())
}

/// Copy every extended attribute from `src` to `dst`. On a restore
/// (`is_restore`), `trusted.*` attributes are not copied (they're only
/// meaningful on the originating filesystem). A destination that doesn't
/// support xattrs at all (`EOPNOTSUPP`) is tolerated per-attribute; any
/// other failure is fatal to the copy.
///
/// # Errors
///
/// Returns an error if the source's attribute list/values can't be read, or
/// if setting an attribute on the destination fails for a reason other than
/// `EOPNOTSUPP`.
pub async fn copy_xattrs(src: &ExtendedFile, dst: &ExtendedFile, is_restore: bool) -> Result<()> {
    let names = src.list_xattr().await?;

    for name in names {
        if is_restore && name.starts_with(XATTR_TRUSTED_PREFIX) {
            continue;
        }

        let value = src.get_xattr(&name).await?;
        if let Err(e) = dst.set_xattr(&name, &value).await {
            if is_eopnotsupp(&e) {
                tracing::trace!(attr = %name, "destination does not support xattrs, skipping");
                continue;
            }
            return Err(e.into());
        }
    }

    Ok(())
}

fn is_eopnotsupp(e: &compio_fs_extended::ExtendedError) -> bool {
    matches!(e, compio_fs_extended::ExtendedError::Io(io) if io.raw_os_error() == Some(libc::EOPNOTSUPP))
        || e.to_string().contains("EOPNOTSUPP")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[compio::test]
    async fn copy_attrs_replicates_mode_and_timestamps() {
        let dir = TempDir::new().unwrap();
        let src_path = dir.path().join("src");
        let dst_path = dir.path().join("dst");
        std::fs::write(&src_path, b"hello").unwrap();
        std::fs::write(&dst_path, b"world!!").unwrap();
        std::fs::set_permissions(&src_path, std::fs::Permissions::from_mode(0o640)).unwrap();

        let src_file = compio::fs::OpenOptions::new()
            .read(true)
            .open(&src_path)
            .await
            .unwrap();
        let dst_file = compio::fs::OpenOptions::new()
            .write(true)
            .open(&dst_path)
            .await
            .unwrap();
        let src = ExtendedFile::new(src_file);
        let dst = ExtendedFile::new(dst_file);

        copy_attrs(&src, &dst).await.unwrap();

        let dst_meta = std::fs::metadata(&dst_path).unwrap();
        assert_eq!(dst_meta.permissions().mode() & 0o777, 0o640);
    }

    use std::os::unix::fs::PermissionsExt;

    #[compio::test]
    async fn copy_xattrs_skips_trusted_prefix_on_restore() {
        let dir = TempDir::new().unwrap();
        let src_path = dir.path().join("src");
        let dst_path = dir.path().join("dst");
        std::fs::write(&src_path, b"hello").unwrap();
        std::fs::write(&dst_path, b"world").unwrap();

        let src_file = compio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&src_path)
            .await
            .unwrap();
        let src = ExtendedFile::new(src_file);

        if src.set_xattr("trusted.lov", b"blob").await.is_err() {
            eprintln!("xattrs unsupported on this filesystem, skipping");
            return;
        }
        src.set_xattr("user.note", b"hi").await.unwrap();

        let dst_file = compio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&dst_path)
            .await
            .unwrap();
        let dst = ExtendedFile::new(dst_file);

        copy_xattrs(&src, &dst, true).await.unwrap();

        let dst_names = dst.list_xattr().await.unwrap();
        assert!(dst_names.iter().any(|n| n == "user.note"));
        assert!(!dst_names.iter().any(|n| n == "trusted.lov"));
    }
}
