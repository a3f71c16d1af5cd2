//! Rebind admin mode (spec §4.H): repoint an existing archive entry from
//! one FID to another, either as a single pair or a batch driven by a list
//! file.
//!
//! Grounded in `ct_rebind_one`/`ct_rebind_list`/`ct_rebind` of the original
//! copytool: rename the archive path from the old FID's location to the
//! new FID's, and rename the `.lov` sidecar alongside it if one exists.
//! `ct_rebind_list` reads whitespace-separated `old new` pairs, skipping
//! blank lines and `#`-prefixed comments, and keeps going past per-line
//! failures, tallying how many pairs were attempted vs. succeeded.

use crate::error::Result;
use crate::fid::{archive_path, mkdir_p, Fid};
use crate::stripe::sidecar_path;
use std::path::Path;

/// Tally of a batch rebind run (spec §4.H): the original tool's exit status
/// for `--rebind <listfile>` is driven by whether every attempted pair
/// succeeded, not by a hard failure, since a malformed individual line is
/// expected to happen in a large list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebindReport {
    /// Number of non-comment, non-blank lines seen (or 1, for a single pair).
    pub attempted: u64,
    /// Number that completed without error.
    pub succeeded: u64,
}

impl RebindReport {
    /// Whether every attempted rebind succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.attempted == self.succeeded
    }
}

/// Rebind a single archive entry: move `archive_path(root, old)` to
/// `archive_path(root, new)`, and its `.lov` sidecar if present.
///
/// # Errors
///
/// Returns an error if the old archive entry doesn't exist, or if the
/// rename itself fails for any other reason (e.g. cross-device, permission).
pub async fn rebind_one(root: &Path, old: &Fid, new: &Fid, dry_run: bool) -> Result<()> {
    let old_path = archive_path(root, old);
    let new_path = archive_path(root, new);

    tracing::info!(old = %old, new = %new, "rebinding");
    if dry_run {
        tracing::info!(old = %old_path.display(), new = %new_path.display(), "dry-run: would rebind");
        return Ok(());
    }

    if let Some(parent) = new_path.parent() {
        mkdir_p(parent).await?;
    }

    compio::fs::rename(&old_path, &new_path).await?;

    let old_sidecar = sidecar_path(&old_path);
    let new_sidecar = sidecar_path(&new_path);
    match compio::fs::rename(&old_sidecar, &new_sidecar).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

/// Parse and rebind a single `old_fid new_fid` pair (the `--rebind <old>
/// <new>` CLI form, spec §6).
///
/// # Errors
///
/// Returns an error if either FID fails to parse, or if the rebind itself
/// fails.
pub async fn rebind_pair(root: &Path, old_text: &str, new_text: &str, dry_run: bool) -> Result<()> {
    let old = Fid::parse(old_text)?;
    let new = Fid::parse(new_text)?;
    rebind_one(root, &old, &new, dry_run).await
}

/// Run a batch of rebinds from a list file: one `old_fid new_fid` pair per
/// line, blank lines and `#`-prefixed comments ignored. Per-line failures
/// are logged and counted, not propagated — the caller inspects the
/// returned [`RebindReport`] to decide the process exit code (spec §6).
///
/// # Errors
///
/// Returns an error only if the list file itself cannot be read.
pub async fn rebind_list(root: &Path, list_path: &Path, dry_run: bool) -> Result<RebindReport> {
    let contents = compio::fs::read(list_path).await?;
    let text = String::from_utf8_lossy(&contents);

    let mut report = RebindReport::default();

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split_whitespace();
        let (Some(old_text), Some(new_text), None) =
            (fields.next(), fields.next(), fields.next())
        else {
            tracing::error!(line = lineno + 1, text = line, "rebind: malformed line, skipping");
            report.attempted += 1;
            continue;
        };

        report.attempted += 1;
        match rebind_pair(root, old_text, new_text, dry_run).await {
            Ok(()) => report.succeeded += 1,
            Err(e) => {
                tracing::error!(
                    line = lineno + 1,
                    old = old_text,
                    new = new_text,
                    error = %e,
                    "rebind failed"
                );
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[compio::test]
    async fn rebind_one_moves_archive_entry_and_sidecar() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let old = Fid::new(1, 2, 0);
        let new = Fid::new(1, 3, 0);

        let old_path = archive_path(root, &old);
        mkdir_p(old_path.parent().unwrap()).await.unwrap();
        std::fs::write(&old_path, b"archived data").unwrap();
        std::fs::write(sidecar_path(&old_path), b"lov blob").unwrap();

        rebind_one(root, &old, &new, false).await.unwrap();

        let new_path = archive_path(root, &new);
        assert!(!old_path.exists());
        assert_eq!(std::fs::read(&new_path).unwrap(), b"archived data");
        assert_eq!(std::fs::read(sidecar_path(&new_path)).unwrap(), b"lov blob");
    }

    #[compio::test]
    async fn rebind_one_without_sidecar_still_succeeds() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let old = Fid::new(5, 6, 0);
        let new = Fid::new(5, 7, 0);

        let old_path = archive_path(root, &old);
        mkdir_p(old_path.parent().unwrap()).await.unwrap();
        std::fs::write(&old_path, b"data").unwrap();

        rebind_one(root, &old, &new, false).await.unwrap();
        assert!(archive_path(root, &new).exists());
    }

    #[compio::test]
    async fn rebind_list_tallies_attempted_and_succeeded_across_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        let good_old = Fid::new(10, 1, 0);
        let good_new = Fid::new(10, 2, 0);
        let good_path = archive_path(root, &good_old);
        mkdir_p(good_path.parent().unwrap()).await.unwrap();
        std::fs::write(&good_path, b"ok").unwrap();

        let missing_old = Fid::new(99, 99, 0);
        let missing_new = Fid::new(99, 100, 0);

        let list = format!(
            "# a comment\n\n{good_old} {good_new}\n{missing_old} {missing_new}\nnonsense line\n"
        );
        let list_path = dir.path().join("rebind.list");
        std::fs::write(&list_path, list).unwrap();

        let report = rebind_list(root, &list_path, false).await.unwrap();

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 1);
        assert!(!report.all_succeeded());
    }

    #[compio::test]
    async fn dry_run_does_not_move_anything() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let old = Fid::new(1, 2, 0);
        let new = Fid::new(1, 3, 0);

        let old_path = archive_path(root, &old);
        mkdir_p(old_path.parent().unwrap()).await.unwrap();
        std::fs::write(&old_path, b"archived data").unwrap();

        rebind_one(root, &old, &new, true).await.unwrap();

        assert!(old_path.exists());
        assert!(!archive_path(root, &new).exists());
    }
}
