//! Process-wide configuration (spec §3, "Options"; §9 REDESIGN FLAG "Global
//! option block"): a single immutable snapshot built once from parsed CLI
//! arguments, then `Arc`-cloned into every worker at spawn time instead of
//! read from a module-global singleton.

use std::path::PathBuf;
use std::time::Duration;

/// Immutable, process-wide configuration. Built once in `main` from
/// [`crate::cli::CommonOpts`] and handed to the dispatcher as an `Arc`.
#[derive(Debug, Clone)]
pub struct Options {
    /// Filesystem mount point (all modes take this as the final positional
    /// argument, spec §6).
    pub mount: PathBuf,
    /// Archive root directory; required except in dry-run mode.
    pub hsm_root: Option<PathBuf>,
    /// Archive ids this process registers for.
    pub archive_ids: Vec<u32>,
    /// Filesystem name validated against each received action list's
    /// `fs_name` (spec §4.G).
    pub fs_name: String,
    /// Copy buffer size in bytes (`opt.o_chunk_size`).
    pub chunk_size: usize,
    /// Bandwidth cap in bytes/sec, or `None` for unthrottled.
    pub bandwidth: Option<u64>,
    /// Progress-report / readiness-wait interval.
    pub report_interval: Duration,
    /// Skip `copy_attrs`.
    pub no_attr: bool,
    /// Skip shadow-tree symlink creation.
    pub no_shadow: bool,
    /// Skip `copy_xattrs`.
    pub no_xattr: bool,
    /// Exit the dispatch loop on the first major error.
    pub abort_on_error: bool,
    /// Log what would happen without touching the filesystem.
    pub dry_run: bool,
}

impl Options {
    /// `hsm_root`, or an [`crate::error::HsmError::InvalidInput`] if it was
    /// not supplied and this isn't a dry run.
    ///
    /// # Errors
    ///
    /// Returns an error if `hsm_root` is unset and `dry_run` is false.
    pub fn require_hsm_root(&self) -> crate::error::Result<&std::path::Path> {
        match (&self.hsm_root, self.dry_run) {
            (Some(root), _) => Ok(root),
            (None, true) => Ok(std::path::Path::new(".")),
            (None, false) => Err(crate::error::HsmError::InvalidInput(
                "--hsm-root is required outside --dry-run".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Options {
        Options {
            mount: PathBuf::from("/mnt/fs"),
            hsm_root: None,
            archive_ids: vec![1],
            fs_name: "testfs".into(),
            chunk_size: 1 << 20,
            bandwidth: None,
            report_interval: Duration::from_secs(30),
            no_attr: false,
            no_shadow: false,
            no_xattr: false,
            abort_on_error: false,
            dry_run: false,
        }
    }

    #[test]
    fn missing_hsm_root_is_an_error_unless_dry_run() {
        let opts = sample();
        assert!(opts.require_hsm_root().is_err());

        let mut dry = sample();
        dry.dry_run = true;
        assert!(dry.require_hsm_root().is_ok());
    }
}
