//! Import admin mode (spec §4.H): link a pre-existing archive tree into the
//! filesystem namespace as logical entries.
//!
//! Grounded in `ct_import_one`/`ct_import_recurse`: a single regular file is
//! imported directly; a directory is walked, mirroring the directory
//! structure on the filesystem side and skipping `.`/`..` (handled here by
//! `walkdir`, which never yields them). Errors within a subtree are logged
//! and counted but don't stop the walk unless `abort_on_error` is set and a
//! major error has already been recorded.

use crate::config::Options;
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::fid::{archive_path, mkdir_p};
use crate::stats::ErrorCounters;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Import `src_rel` (a path relative to `hsm_root`) into the filesystem at
/// `dst_abs` (an absolute path). If `src_rel` resolves to a regular file,
/// imports it directly; otherwise recurses over the directory tree,
/// constructing parallel source/destination paths for each regular file
/// found (spec §4.H).
///
/// # Errors
///
/// Returns an error only for failures that prevent the walk from starting at
/// all (e.g. `src_rel` doesn't exist under `hsm_root`). Per-file failures
/// during a directory walk are logged and counted in `counters`, not
/// propagated, unless `opts.abort_on_error` stops the walk early.
pub async fn run_import<C: Coordinator>(
    coord: &C,
    opts: &Options,
    counters: &ErrorCounters,
    src_rel: &Path,
    dst_abs: &Path,
) -> Result<()> {
    let hsm_root = opts.require_hsm_root()?;
    let src_abs = hsm_root.join(src_rel);

    let meta = std::fs::metadata(&src_abs)?;
    if meta.is_file() {
        if let Err(e) = import_one(coord, opts, &src_abs, dst_abs).await {
            tracing::error!(src = %src_abs.display(), dst = %dst_abs.display(), error = %e, "import failed");
            counters.record_major();
            return Err(e);
        }
        return Ok(());
    }

    // Directory traversal walks real syscalls (readdir/lstat per entry), so
    // it runs off the reactor thread; only the resulting file list crosses
    // back into async code for the per-file import itself.
    let root = src_abs.clone();
    let follow = false;
    let entries: Vec<PathBuf> = compio::runtime::spawn_blocking(move || {
        WalkDir::new(&root)
            .follow_links(follow)
            .min_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) if e.file_type().is_file() => Some(e.path().to_path_buf()),
                Ok(_) => None,
                Err(e) => {
                    tracing::error!(error = %e, "import: directory walk error");
                    None
                }
            })
            .collect()
    })
    .await
    .map_err(|e| crate::error::HsmError::Extended(compio_fs_extended::ExtendedError::spawn_join(e)))?;

    for file_src in entries {
        let rel = match file_src.strip_prefix(&src_abs) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let file_dst = dst_abs.join(rel);

        if let Some(parent) = file_dst.parent() {
            if let Err(e) = mkdir_p(parent).await {
                tracing::error!(path = %file_dst.display(), error = %e, "import: mkdir_p failed");
                counters.record_major();
                if opts.abort_on_error {
                    break;
                }
                continue;
            }
        }

        if let Err(e) = import_one(coord, opts, &file_src, &file_dst).await {
            tracing::error!(src = %file_src.display(), dst = %file_dst.display(), error = %e, "import failed");
            counters.record_major();
            if opts.abort_on_error {
                break;
            }
        }
    }

    Ok(())
}

/// Import a single regular file at `src_abs` as a new logical entry at
/// `dst_abs`. Grounded in `ct_import_one`: `stat` the source, ask the
/// coordinator to mint a FID for `dst_abs`, compute that FID's archive
/// path, `mkdir_p` its parent, then hardlink the source into place.
async fn import_one<C: Coordinator>(
    coord: &C,
    opts: &Options,
    src_abs: &Path,
    dst_abs: &Path,
) -> Result<()> {
    tracing::info!(dst = %dst_abs.display(), src = %src_abs.display(), "importing");
    let stat = std::fs::metadata(src_abs)?;

    if opts.dry_run {
        tracing::info!(dst = %dst_abs.display(), src = %src_abs.display(), "dry-run: would import");
        return Ok(());
    }

    let hsm_root = opts.require_hsm_root()?;
    let archive_id = opts.archive_ids.first().copied().unwrap_or(0);
    let fid = coord.import(dst_abs, archive_id, &stat).await?;

    let newarc = archive_path(hsm_root, &fid);
    if let Some(parent) = newarc.parent() {
        mkdir_p(parent).await?;
    }

    let src_owned = src_abs.to_path_buf();
    let newarc_for_link = newarc.clone();
    compio::runtime::spawn_blocking(move || std::fs::hard_link(&src_owned, &newarc_for_link))
        .await
        .map_err(|e| crate::error::HsmError::Extended(compio_fs_extended::ExtendedError::spawn_join(e)))??;

    tracing::info!(dst = %dst_abs.display(), archive = %newarc.display(), fid = %fid, "imported");
    Ok(())
}
