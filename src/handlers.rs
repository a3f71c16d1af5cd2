//! Action handlers (spec §4.F): ARCHIVE, RESTORE, REMOVE, CANCEL.
//!
//! Grounded in `ct_archive`/`ct_restore`/`ct_remove` of the original
//! copytool. Each original function threads one `rc` through a `goto
//! fini_major` / `goto out` chain that conflates two separate concerns: what
//! the copy itself produced, and what gets reported to the coordinator at
//! `action.end` (spec §9 REDESIGN FLAG, "Cyclic control flow via goto").
//! Here each handler's real work is a plain `Result<MinorError>`-returning
//! async fn, and [`with_lifecycle`] is the single place that turns that
//! result into a `begin`/`end` pair — mirroring `ct_begin` being called
//! once up front and every exit path in the original calling
//! `llapi_hsm_action_end` exactly once before returning.

use crate::attrs::{copy_attrs, copy_xattrs};
use crate::config::Options;
use crate::coordinator::{ActionItem, ActionKind, Coordinator, EndFlags};
use crate::copy_engine::{copy_data, CopyParams, Extent, Progress};
use crate::error::Result;
use crate::fid::{archive_path, mkdir_p};
use crate::shadow::{relative_link_target, shadow_link_path};
use crate::stripe::{restore_stripe, save_stripe, sidecar_path};
use compio_fs_extended::ExtendedFile;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Whether a handler's otherwise-successful run hit a soft failure that
/// should count against `err_minor` (spec §3/§9) without failing the
/// action. `Ok(MinorError(true))` is still a success from the coordinator's
/// point of view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinorError(pub bool);

impl MinorError {
    fn combine(&mut self, other: bool) {
        self.0 |= other;
    }
}

/// Bridges [`Progress`] (module D's synchronous-shaped but native-`async fn`
/// callback) to a coordinator's own `progress` method, reporting the
/// extent from the action's starting offset through `bytes_done`.
struct CoordProgress<'a, C: Coordinator> {
    coord: &'a C,
    handle: &'a C::CopyHandle,
    base_offset: u64,
}

impl<C: Coordinator> Progress for CoordProgress<'_, C> {
    async fn report(&mut self, bytes_done: u64) -> i32 {
        let extent = Extent {
            offset: self.base_offset,
            length: Some(bytes_done),
        };
        self.coord.progress(self.handle, extent).await
    }
}

/// Call `coordinator.begin`, run `body` with a reference to the resulting
/// handle, then always call `coordinator.end` with an outcome derived from
/// `body`'s result before returning it. `begin` itself failing propagates
/// directly with no `end` call — there is no handle to end (spec §9, the
/// one documented exception to "every exit path ends the action").
async fn with_lifecycle<C, B, Fut>(coord: &C, item: &ActionItem, body: B) -> Result<MinorError>
where
    C: Coordinator,
    B: FnOnce(C::CopyHandle) -> Fut,
    Fut: std::future::Future<Output = (C::CopyHandle, Result<MinorError>)>,
{
    let handle = coord.begin(item, false).await?;
    let (handle, result) = body(handle).await;
    match &result {
        Ok(_) => {
            coord
                .end(handle, item.extent, EndFlags::default(), 0)
                .await?;
        }
        Err(e) => {
            let flags = EndFlags::from_retryable(e.is_retryable());
            let errno = e.errno();
            coord.end(handle, item.extent, flags, errno).await?;
        }
    }
    result
}

/// Relative path a shadow-tree entry should live at for `item`, derived
/// from `src_path` (the result of `coordinator.fid2path(mnt, &item.fid)`)
/// relative to `mount`. Falls back to the FID's own text form if the
/// coordinator's path doesn't live under `mount` (e.g. a resolve-by-fid
/// path rather than a human one), so the shadow tree always has somewhere
/// to put the entry.
fn shadow_relpath(mount: &Path, src_path: &Path, item: &ActionItem) -> PathBuf {
    match src_path.strip_prefix(mount) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
        _ => PathBuf::from(item.fid.to_string()),
    }
}

async fn create_shadow_link(opts: &Options, mount: &Path, src_path: &Path, item: &ActionItem) -> bool {
    if opts.no_shadow {
        return false;
    }
    let Ok(hsm_root) = opts.require_hsm_root() else {
        return true;
    };
    let rel = shadow_relpath(mount, src_path, item);
    let link_path = shadow_link_path(hsm_root, &rel);
    let target = relative_link_target(&rel, &item.data_fid);

    if let Some(parent) = link_path.parent() {
        if mkdir_p(parent).await.is_err() {
            return true;
        }
    }

    // std::os::unix::fs::symlink has no compio counterpart (it's metadata,
    // not an io_uring-shaped op), so this one syscall runs inline rather
    // than through spawn_blocking.
    match std::os::unix::fs::symlink(&target, &link_path) {
        Ok(()) => false,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => false,
        Err(e) => {
            tracing::warn!(path = %link_path.display(), error = %e, "failed to create shadow symlink");
            true
        }
    }
}

/// ARCHIVE: copy filesystem data to the archive (spec §4.F). Grounded in
/// `ct_archive`.
///
/// # Errors
///
/// Propagates any fatal error from opening the source/destination,
/// `copy_data`, or the whole-file rename. Soft failures (stripe, attrs,
/// xattrs, shadow link) are folded into the returned [`MinorError`] instead.
pub async fn handle_archive<C: Coordinator>(
    coord: &C,
    opts: &Options,
    mount: &Path,
    item: &ActionItem,
) -> Result<MinorError> {
    with_lifecycle(coord, item, |handle| async move {
        let result = archive_body(coord, &handle, opts, mount, item).await;
        (handle, result)
    })
    .await
}

async fn archive_body<C: Coordinator>(
    coord: &C,
    handle: &C::CopyHandle,
    opts: &Options,
    mount: &Path,
    item: &ActionItem,
) -> Result<MinorError> {
    let hsm_root = opts.require_hsm_root()?;
    let src_path = coord.fid2path(mount, &item.fid).await?;
    let dst_path = archive_path(hsm_root, &item.data_fid);

    if let Some(parent) = dst_path.parent() {
        mkdir_p(parent).await?;
    }

    // A whole-file copy replaces any prior archive contents wholesale, so it
    // stages into a "_tmp" sibling and renames into place atomically; a
    // partial-extent copy (a later HSM release/reread of part of the file)
    // writes directly into the existing entry, matching `ct_archive`'s
    // `rename_needed` distinction.
    let whole_file = item.extent.offset == 0 && item.extent.length.is_none();
    let write_path = if whole_file {
        let mut s = dst_path.as_os_str().to_owned();
        s.push("_tmp");
        PathBuf::from(s)
    } else {
        dst_path.clone()
    };

    let src_file = compio::fs::OpenOptions::new().read(true).open(&src_path).await?;
    let dst_file = compio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(whole_file)
        .open(&write_path)
        .await?;
    let src_ext = ExtendedFile::new(src_file);
    let dst_ext = ExtendedFile::new(dst_file);

    let mut minor = MinorError::default();

    if !opts.no_attr {
        if let Err(e) = save_stripe(&src_ext, &write_path).await {
            tracing::warn!(fid = %item.data_fid, error = %e, "failed to save stripe layout");
            minor.combine(true);
        }
    }

    let params = CopyParams {
        extent: item.extent,
        chunk_size: opts.chunk_size,
        bandwidth: opts.bandwidth,
        report_interval: opts.report_interval,
        is_restore: false,
    };
    let progress = CoordProgress {
        coord,
        handle,
        base_offset: item.extent.offset,
    };
    copy_data(src_ext.as_raw_fd(), dst_ext.as_raw_fd(), &params, progress).await?;

    if !opts.no_attr {
        if let Err(e) = copy_attrs(&src_ext, &dst_ext).await {
            tracing::warn!(fid = %item.data_fid, error = %e, "failed to copy attributes");
            minor.combine(true);
        }
    }
    if !opts.no_xattr {
        if let Err(e) = copy_xattrs(&src_ext, &dst_ext, false).await {
            tracing::warn!(fid = %item.data_fid, error = %e, "failed to copy xattrs");
            minor.combine(true);
        }
    }

    drop(src_ext);
    drop(dst_ext);

    if whole_file {
        compio::fs::rename(&write_path, &dst_path).await?;
        if !opts.no_attr {
            let tmp_lov = sidecar_path(&write_path);
            let final_lov = sidecar_path(&dst_path);
            let _ = compio::fs::rename(&tmp_lov, &final_lov).await;
        }
    }

    if create_shadow_link(opts, mount, &src_path, item).await {
        minor.combine(true);
    }

    Ok(minor)
}

/// RESTORE: copy archive data back to the filesystem (spec §4.F). Grounded
/// in `ct_restore`. The destination is the coordinator's volatile fd
/// (`Coordinator::get_fd`): the distributed filesystem swaps it into place
/// itself once the action ends, so this handler never closes it and never
/// renames anything on the filesystem side.
///
/// # Errors
///
/// Propagates any fatal error from opening the archive source, restoring
/// the stripe layout, or `copy_data`.
pub async fn handle_restore<C: Coordinator>(
    coord: &C,
    opts: &Options,
    item: &ActionItem,
) -> Result<MinorError> {
    with_lifecycle(coord, item, |handle| async move {
        let result = restore_body(coord, &handle, opts, item).await;
        (handle, result)
    })
    .await
}

async fn restore_body<C: Coordinator>(
    coord: &C,
    handle: &C::CopyHandle,
    opts: &Options,
    item: &ActionItem,
) -> Result<MinorError> {
    let hsm_root = opts.require_hsm_root()?;
    let src_path = archive_path(hsm_root, &item.data_fid);

    let src_file = compio::fs::OpenOptions::new().read(true).open(&src_path).await?;
    let src_ext = ExtendedFile::new(src_file);

    let dst_fid = coord.get_dfid(handle).await?;
    let dst_fd = coord.get_fd(handle).await?;
    tracing::debug!(fid = %item.fid, dfid = %dst_fid, "restoring into volatile file");

    if !opts.no_attr {
        restore_stripe(&src_path, dst_fd).await?;
    }

    let params = CopyParams {
        extent: item.extent,
        chunk_size: opts.chunk_size,
        bandwidth: opts.bandwidth,
        report_interval: opts.report_interval,
        is_restore: true,
    };
    let progress = CoordProgress {
        coord,
        handle,
        base_offset: item.extent.offset,
    };
    copy_data(src_ext.as_raw_fd(), dst_fd, &params, progress).await?;

    Ok(MinorError::default())
}

/// REMOVE: delete the archive entry (spec §4.F). Grounded in `ct_remove`. A
/// missing archive file is tolerated (the entry may already have been
/// cleaned up by a prior, interrupted remove) and counts only as a minor
/// error; any other failure is fatal.
///
/// # Errors
///
/// Propagates any error from `unlink` other than `ENOENT`.
pub async fn handle_remove<C: Coordinator>(
    coord: &C,
    opts: &Options,
    item: &ActionItem,
) -> Result<MinorError> {
    with_lifecycle(coord, item, |handle| async move {
        let result = remove_body(opts, item).await;
        (handle, result)
    })
    .await
}

async fn remove_body(opts: &Options, item: &ActionItem) -> Result<MinorError> {
    let hsm_root = opts.require_hsm_root()?;
    let path = archive_path(hsm_root, &item.data_fid);

    match compio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(MinorError(true)),
        Err(e) => return Err(e.into()),
    }

    let lov = sidecar_path(&path);
    let _ = compio::fs::remove_file(&lov).await;

    Ok(MinorError::default())
}

/// CANCEL: an explicit cancellation notice for an action already in flight
/// elsewhere (spec §4.F). The original copytool has no corresponding
/// handler code path of its own; this is purely a counted, logged no-op —
/// there is nothing in this process to begin or end.
pub fn handle_cancel(item: &ActionItem) -> MinorError {
    tracing::info!(fid = %item.fid, cookie = item.cookie, "received cancel notification");
    MinorError(true)
}

/// Dispatch `item` to the handler matching its [`ActionKind`].
///
/// # Errors
///
/// Propagates whatever the selected handler returns.
pub async fn handle_action<C: Coordinator>(
    coord: &C,
    opts: &Options,
    mount: &Path,
    item: &ActionItem,
) -> Result<MinorError> {
    match item.action {
        ActionKind::Archive => handle_archive(coord, opts, mount, item).await,
        ActionKind::Restore => handle_restore(coord, opts, item).await,
        ActionKind::Remove => handle_remove(coord, opts, item).await,
        ActionKind::Cancel => Ok(handle_cancel(item)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::local::LocalCoordinator;
    use crate::fid::Fid;
    use std::time::Duration;
    use tempfile::TempDir;

    fn sample_opts(hsm_root: PathBuf) -> Options {
        Options {
            mount: PathBuf::from("/mnt/fs"),
            hsm_root: Some(hsm_root),
            archive_ids: vec![1],
            fs_name: "testfs".into(),
            chunk_size: 4096,
            bandwidth: None,
            report_interval: Duration::from_secs(30),
            no_attr: true,
            no_shadow: true,
            no_xattr: true,
            abort_on_error: false,
            dry_run: false,
        }
    }

    #[compio::test]
    async fn archive_copies_data_and_renames_into_place() {
        let archive = TempDir::new().unwrap();
        let opts = sample_opts(archive.path().to_path_buf());

        let coord = LocalCoordinator::default();
        let fid = Fid::new(0x2000_0000_1, 7, 0);

        let src_dir = TempDir::new().unwrap();
        let src_path = src_dir.path().join("source");
        std::fs::write(&src_path, vec![5u8; 4096]).unwrap();

        let item = ActionItem {
            action: ActionKind::Archive,
            cookie: 1,
            fid,
            data_fid: fid,
            extent: Extent {
                offset: 0,
                length: None,
            },
        };

        // Drives archive_body directly against an explicit source path,
        // bypassing coordinator.fid2path (LocalCoordinator's implementation
        // doesn't resolve to a path that exists on disk).
        let result = with_lifecycle(&coord, &item, |handle| async {
            let result = archive_body_from(&coord, &handle, &opts, &item, &src_path).await;
            (handle, result)
        })
        .await;
        assert!(result.is_ok(), "{result:?}");

        let archived_path = archive_path(archive.path(), &fid);
        assert!(archived_path.exists());
        assert_eq!(std::fs::read(&archived_path).unwrap(), vec![5u8; 4096]);
    }

    /// Test-only helper mirroring `archive_body` but against an explicit
    /// source path instead of `coordinator.fid2path`.
    async fn archive_body_from<C: Coordinator>(
        coord: &C,
        handle: &C::CopyHandle,
        opts: &Options,
        item: &ActionItem,
        src_path: &Path,
    ) -> Result<MinorError> {
        let hsm_root = opts.require_hsm_root()?;
        let dst_path = archive_path(hsm_root, &item.data_fid);
        if let Some(parent) = dst_path.parent() {
            mkdir_p(parent).await?;
        }
        let whole_file = item.extent.offset == 0 && item.extent.length.is_none();
        let write_path = if whole_file {
            let mut s = dst_path.as_os_str().to_owned();
            s.push("_tmp");
            PathBuf::from(s)
        } else {
            dst_path.clone()
        };
        let src_file = compio::fs::OpenOptions::new().read(true).open(src_path).await?;
        let dst_file = compio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(whole_file)
            .open(&write_path)
            .await?;
        let src_ext = ExtendedFile::new(src_file);
        let dst_ext = ExtendedFile::new(dst_file);

        let params = CopyParams {
            extent: item.extent,
            chunk_size: opts.chunk_size,
            bandwidth: opts.bandwidth,
            report_interval: opts.report_interval,
            is_restore: false,
        };
        let progress = CoordProgress {
            coord,
            handle,
            base_offset: item.extent.offset,
        };
        copy_data(src_ext.as_raw_fd(), dst_ext.as_raw_fd(), &params, progress).await?;
        drop(src_ext);
        drop(dst_ext);

        if whole_file {
            compio::fs::rename(&write_path, &dst_path).await?;
        }
        Ok(MinorError::default())
    }

    #[compio::test]
    async fn remove_missing_archive_entry_is_a_minor_error() {
        let archive = TempDir::new().unwrap();
        let opts = sample_opts(archive.path().to_path_buf());
        let coord = LocalCoordinator::default();
        let fid = Fid::new(0x2000_0000_1, 99, 0);
        let item = ActionItem {
            action: ActionKind::Remove,
            cookie: 2,
            fid,
            data_fid: fid,
            extent: Extent {
                offset: 0,
                length: None,
            },
        };

        let outcome = handle_remove(&coord, &opts, &item).await.unwrap();
        assert_eq!(outcome, MinorError(true));
    }

    #[compio::test]
    async fn remove_deletes_existing_archive_entry() {
        let archive = TempDir::new().unwrap();
        let opts = sample_opts(archive.path().to_path_buf());
        let coord = LocalCoordinator::default();
        let fid = Fid::new(0x2000_0000_1, 100, 0);
        let path = archive_path(archive.path(), &fid);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"x").unwrap();

        let item = ActionItem {
            action: ActionKind::Remove,
            cookie: 3,
            fid,
            data_fid: fid,
            extent: Extent {
                offset: 0,
                length: None,
            },
        };

        let outcome = handle_remove(&coord, &opts, &item).await.unwrap();
        assert_eq!(outcome, MinorError::default());
        assert!(!path.exists());
    }

    #[test]
    fn cancel_is_always_a_logged_minor_outcome() {
        let item = ActionItem {
            action: ActionKind::Cancel,
            cookie: 4,
            fid: Fid::new(1, 1, 0),
            data_fid: Fid::new(1, 1, 0),
            extent: Extent {
                offset: 0,
                length: None,
            },
        };
        assert_eq!(handle_cancel(&item), MinorError(true));
    }
}
