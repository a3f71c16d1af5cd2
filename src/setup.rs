//! Setup/teardown (spec §4.I): open the archive root for the process
//! lifetime, resolve the backing filesystem name, and register/unregister
//! with the coordinator. Also owns the SIGINT/SIGTERM shutdown path for
//! daemon mode.
//!
//! Grounded in `ct_setup`/`ct_cleanup`/`handler` of the original copytool:
//! `arc_fd` is kept open with `O_DIRECTORY` for as long as the process runs
//! (closed only at exit) mostly so `umount` doesn't see a lingering
//! reference; `fs_name` is resolved once at startup and validated against
//! every action list afterward (spec §4.G); `SIGINT`/`SIGTERM` both trigger
//! an unregister-then-exit path rather than being treated differently.

use crate::config::Options;
use crate::coordinator::Coordinator;
use crate::error::{HsmError, Result};
use std::os::unix::io::RawFd;
use std::path::Path;

/// Holds the archive root open (`O_DIRECTORY`) for the process lifetime.
/// Dropping it closes the fd; `ct_cleanup` is just this running at scope
/// exit instead of being called explicitly from `main`.
pub struct ArchiveRootGuard {
    fd: RawFd,
}

impl ArchiveRootGuard {
    /// Open `path` with `O_DIRECTORY`, failing if it isn't a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` cannot be opened.
    pub async fn open(path: &Path) -> Result<Self> {
        let owned = path.to_path_buf();
        let fd = compio::runtime::spawn_blocking(move || {
            let c_path = std::ffi::CString::new(owned.as_os_str().as_encoded_bytes())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
            let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_DIRECTORY) };
            if fd < 0 {
                Err(std::io::Error::last_os_error())
            } else {
                Ok(fd)
            }
        })
        .await
        .map_err(|e| HsmError::Extended(compio_fs_extended::ExtendedError::spawn_join(e)))??;

        Ok(Self { fd })
    }

    /// The raw archive-root fd, for anything that needs `openat`-relative
    /// access rather than going through absolute paths.
    #[must_use]
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for ArchiveRootGuard {
    fn drop(&mut self) {
        if unsafe { libc::close(self.fd) } < 0 {
            let err = std::io::Error::last_os_error();
            tracing::error!(error = %err, "cannot close archive root fd");
        }
    }
}

/// Everything `ct_setup` assembles before the dispatch loop (or an admin
/// mode) can run: the open archive root and the resolved filesystem name.
pub struct Setup {
    /// Archive root kept open for the process lifetime.
    pub archive_root: ArchiveRootGuard,
    /// Filesystem name backing `opts.mount`, to validate action lists
    /// against (spec §4.G).
    pub fs_name: String,
}

/// Open the archive root and resolve the filesystem name, registering with
/// the coordinator for `opts.archive_ids` on `opts.mount`.
///
/// # Errors
///
/// Returns an error if the archive root can't be opened, the filesystem
/// name can't be resolved, or registration fails.
pub async fn setup<C: Coordinator>(coord: &C, opts: &Options) -> Result<Setup> {
    let archive_root = match &opts.hsm_root {
        Some(root) => ArchiveRootGuard::open(root).await?,
        None if opts.dry_run => {
            return Err(HsmError::InvalidInput(
                "dry-run without --hsm-root cannot open an archive root".into(),
            ))
        }
        None => {
            return Err(HsmError::InvalidInput(
                "--hsm-root is required outside --dry-run".into(),
            ))
        }
    };

    let fs_name = coord.resolve_fs_name(&opts.mount).await?;
    coord.register(&opts.mount, &opts.archive_ids).await?;

    Ok(Setup {
        archive_root,
        fs_name,
    })
}

/// Block until `SIGINT` or `SIGTERM` arrives. Grounded in `handler`: both
/// signals are handled identically, so the daemon's main loop just races
/// this future against `dispatch::run` and unregisters on whichever
/// finishes first (spec §4.I).
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
pub async fn wait_for_shutdown_signal() -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(HsmError::Io)?;

    compio::runtime::spawn_blocking(move || {
        for signal in signals.forever() {
            tracing::warn!(signal, "received shutdown signal, exiting");
            break;
        }
    })
    .await
    .map_err(|e| HsmError::Extended(compio_fs_extended::ExtendedError::spawn_join(e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[compio::test]
    async fn archive_root_guard_opens_and_closes_directory() {
        let dir = TempDir::new().unwrap();
        let guard = ArchiveRootGuard::open(dir.path()).await.unwrap();
        assert!(guard.as_raw_fd() >= 0);
        drop(guard);
    }

    #[compio::test]
    async fn opening_a_regular_file_as_archive_root_fails() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        assert!(ArchiveRootGuard::open(&file).await.is_err());
    }

    #[compio::test]
    async fn setup_resolves_fs_name_and_opens_archive_root() {
        use crate::coordinator::local::LocalCoordinator;
        use std::time::Duration;

        let dir = TempDir::new().unwrap();
        let opts = Options {
            mount: std::path::PathBuf::from("/mnt/testfs"),
            hsm_root: Some(dir.path().to_path_buf()),
            archive_ids: vec![1],
            fs_name: String::new(),
            chunk_size: 4096,
            bandwidth: None,
            report_interval: Duration::from_secs(30),
            no_attr: true,
            no_shadow: true,
            no_xattr: true,
            abort_on_error: false,
            dry_run: false,
        };
        let coord = LocalCoordinator::default();

        let result = setup(&coord, &opts).await.unwrap();
        assert_eq!(result.fs_name, "testfs");
    }
}
