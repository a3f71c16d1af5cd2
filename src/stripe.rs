//! Stripe sidecar (spec §4.B): save/restore the filesystem layout hint as a
//! `.lov`-suffixed sidecar file next to the archived data.
//!
//! Grounded in `ct_save_stripe`/`ct_load_stripe`/`ct_restore_stripe` of the
//! original copytool, and in `compio-fs-extended`'s fd-based `XattrOps` for
//! the actual `getxattr`/`setxattr` calls.

use crate::error::{HsmError, Result};
use compio_fs_extended::{ExtendedFile, XattrOps};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

/// Extended attribute holding the layout blob on the distributed filesystem.
pub const XATTR_LUSTRE_LOV: &str = "trusted.lov";

/// `lov_user_md_v1`/`_v3` magic values that mark a blob this agent knows how
/// to patch. An unrecognized magic is copied through verbatim.
const LOV_USER_MAGIC_V1: u32 = 0x0BD1_0BD0;
const LOV_USER_MAGIC_V3: u32 = 0x0BD3_0BD0;

/// Byte offset of the `lmm_stripe_offset` (`__u16`) field in both the v1 and
/// v3 header, per the shared `lov_user_md_v1` prefix: magic(4) + pattern(4)
/// + object_id(8) + object_seq(8) + stripe_size(4) + stripe_count(2).
const STRIPE_OFFSET_FIELD_OFFSET: usize = 30;

/// Sidecar file mode: owner read/write only (`0600`).
const SIDECAR_MODE: u32 = 0o600;

/// The `.lov`-suffixed sidecar path for a given archive data path.
#[must_use]
pub fn sidecar_path(dst_path: &Path) -> PathBuf {
    let mut s = dst_path.as_os_str().to_owned();
    s.push(".lov");
    PathBuf::from(s)
}

/// Read the layout xattr off `src`, force `stripe_offset` to `-1` on a
/// recognized magic so restore doesn't pin to the originating device, and
/// write the blob to `<dst_path>.lov` (truncate-create, `0600`).
///
/// Soft failure: any error here is reported by the caller as a minor error,
/// not fatal to the archive (spec §4.F).
///
/// # Errors
///
/// Returns an error if the layout xattr is missing/unreadable or the
/// sidecar file cannot be written.
pub async fn save_stripe(src_fd: &ExtendedFile, dst_path: &Path) -> Result<()> {
    let mut blob = src_fd.get_xattr(XATTR_LUSTRE_LOV).await?;

    if blob.len() >= STRIPE_OFFSET_FIELD_OFFSET + 2 {
        let magic = u32::from_le_bytes(blob[0..4].try_into().unwrap());
        if magic == LOV_USER_MAGIC_V1 || magic == LOV_USER_MAGIC_V3 {
            blob[STRIPE_OFFSET_FIELD_OFFSET..STRIPE_OFFSET_FIELD_OFFSET + 2]
                .copy_from_slice(&(-1i16).to_le_bytes());
        }
    }

    let lov_path = sidecar_path(dst_path);
    let file = compio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&lov_path)
        .await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        compio::fs::set_permissions(&lov_path, std::fs::Permissions::from_mode(SIDECAR_MODE))
            .await?;
    }
    use compio::io::AsyncWriteAt;
    let (res, _) = file.write_at(blob, 0).await;
    res?;
    Ok(())
}

/// Read `<src_path>.lov`. A missing file is a soft failure: returns `Ok(None)`
/// so the caller can proceed with default striping, matching `ct_load_stripe`
/// plus its caller's "use default" fallback.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub async fn load_stripe(src_path: &Path) -> Result<Option<Vec<u8>>> {
    use compio::io::AsyncReadAt;

    let lov_path = sidecar_path(src_path);
    let file = match compio::fs::File::open(&lov_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    // The sidecar is a small, fixed-size layout blob (<= XATTR_SIZE_MAX in
    // the original), so one bounded read is enough.
    const MAX_LOV_SIZE: usize = 64 * 1024;
    let buf = vec![0u8; MAX_LOV_SIZE];
    let (res, mut buf) = file.read_at(buf, 0).await;
    let n = res?;
    buf.truncate(n);
    Ok(Some(buf))
}

/// Load the sidecar for `src_path`, then set the layout xattr on `dst_fd`
/// with create-only semantics (`XATTR_CREATE`). Failure here is fatal for
/// the restore (spec §4.B/§4.F), except a missing sidecar which is a no-op.
///
/// `dst_fd` is a raw fd rather than an `ExtendedFile` because the restore
/// destination is the volatile fd handed back by `Coordinator::get_fd`
/// (spec §6) — a fd this crate never opens itself, so there is no
/// `compio::fs::File` to wrap.
///
/// # Errors
///
/// Returns an error if the sidecar exists but `dst_fd`'s layout xattr could
/// not be set (e.g. the filesystem disagrees with the hinted layout).
pub async fn restore_stripe(src_path: &Path, dst_fd: RawFd) -> Result<()> {
    let Some(blob) = load_stripe(src_path).await? else {
        return Ok(());
    };
    compio::runtime::spawn_blocking(move || {
        let name = std::ffi::CString::new(XATTR_LUSTRE_LOV).expect("xattr name has no NUL");
        let rc = unsafe {
            libc::fsetxattr(
                dst_fd,
                name.as_ptr(),
                blob.as_ptr().cast(),
                blob.len(),
                libc::XATTR_CREATE,
            )
        };
        if rc < 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    })
    .await
    .map_err(|e| HsmError::Extended(compio_fs_extended::ExtendedError::spawn_join(e)))?
    .map_err(|e| HsmError::Stripe(format!("restore_stripe: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[compio::test]
    async fn load_stripe_missing_file_is_soft_none() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("nope");
        assert!(load_stripe(&src).await.unwrap().is_none());
    }

    #[compio::test]
    async fn save_then_load_stripe_roundtrips_blob() {
        let dir = TempDir::new().unwrap();
        let src_path = dir.path().join("source");
        let dst_path = dir.path().join("archived");
        std::fs::write(&src_path, b"data").unwrap();

        let mut magic_blob = vec![0u8; 32];
        magic_blob[0..4].copy_from_slice(&LOV_USER_MAGIC_V1.to_le_bytes());
        magic_blob[STRIPE_OFFSET_FIELD_OFFSET..STRIPE_OFFSET_FIELD_OFFSET + 2]
            .copy_from_slice(&42u16.to_le_bytes());

        let src_file = compio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&src_path)
            .await
            .unwrap();
        let extended = ExtendedFile::new(src_file);
        if extended.set_xattr(XATTR_LUSTRE_LOV, &magic_blob).await.is_err() {
            eprintln!("xattrs unsupported on this filesystem, skipping");
            return;
        }

        save_stripe(&extended, &dst_path).await.unwrap();

        let loaded = load_stripe(&dst_path).await.unwrap().unwrap();
        assert_eq!(
            &loaded[STRIPE_OFFSET_FIELD_OFFSET..STRIPE_OFFSET_FIELD_OFFSET + 2],
            &(-1i16).to_le_bytes()
        );

        let sidecar_meta = std::fs::metadata(sidecar_path(&dst_path)).unwrap();
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(sidecar_meta.permissions().mode() & 0o777, SIDECAR_MODE);
    }

    #[compio::test]
    async fn restore_stripe_sets_xattr_on_raw_fd() {
        use std::os::unix::io::AsRawFd;

        let dir = TempDir::new().unwrap();
        let archived_path = dir.path().join("archived");
        let dst_path = dir.path().join("restored");
        std::fs::write(&archived_path, b"data").unwrap();
        std::fs::write(&dst_path, b"volatile").unwrap();

        std::fs::write(sidecar_path(&archived_path), vec![9u8; 16]).unwrap();

        let dst_file = std::fs::OpenOptions::new()
            .write(true)
            .open(&dst_path)
            .unwrap();
        if restore_stripe(&archived_path, dst_file.as_raw_fd())
            .await
            .is_err()
        {
            eprintln!("xattrs unsupported on this filesystem, skipping");
            return;
        }

        let dst_open = compio::fs::OpenOptions::new()
            .read(true)
            .open(&dst_path)
            .await
            .unwrap();
        let extended = ExtendedFile::new(dst_open);
        let value = extended.get_xattr(XATTR_LUSTRE_LOV).await.unwrap();
        assert_eq!(value, vec![9u8; 16]);
    }
}
