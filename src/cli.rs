//! Command-line interface (spec §6): flag-based mode selection mirroring
//! `ct_parseopts`'s `getopt_long` surface — `-d`/`--daemon`,
//! `-i`/`--import`, `-r`/`--rebind`, `-M`/`--max-sequence` pick the mode,
//! the trailing positional arguments are interpreted according to which
//! one was picked, and a shared [`CommonOpts`] group carries everything
//! else (archive ids, hsm root, chunk size, bandwidth cap, and so on).

use crate::error::{HsmError, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Default chunk size when `-c`/`--chunk-size` carries no unit suffix
/// (`ONE_MB` in the original tool).
const DEFAULT_SIZE_UNIT: u64 = 1024 * 1024;

/// Top-level CLI surface. Mode is selected by exactly one of the four
/// boolean flags; `positionals` holds whatever comes after the flags, its
/// meaning depending on which mode flag was set (validated in
/// [`Cli::resolve`]).
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Daemon mode: register with the coordinator and dispatch actions
    /// until shutdown.
    #[arg(short = 'd', long)]
    pub daemon: bool,

    /// Import mode: link a pre-existing archive subtree into the
    /// filesystem namespace.
    #[arg(short = 'i', long)]
    pub import: bool,

    /// Rebind mode: repoint an archive entry (or a list of entries) to a
    /// new FID.
    #[arg(short = 'r', long)]
    pub rebind: bool,

    /// Max-sequence mode: report the largest FID sequence found under the
    /// archive root.
    #[arg(short = 'M', long = "max-sequence")]
    pub max_sequence: bool,

    #[command(flatten)]
    pub common: CommonOpts,

    /// Mode-dependent positional arguments: `<src> <dst> <mount>` for
    /// `--import`; `<old_fid> <new_fid> <mount>` or `<list_file> <mount>`
    /// for `--rebind`; just `<mount>` for `--daemon`/`--max-sequence`.
    #[arg(value_name = "ARGS")]
    pub positionals: Vec<String>,
}

/// Options shared by every mode (spec §6).
#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Common Options")]
pub struct CommonOpts {
    /// Archive id this process serves; repeatable (spec §5, registration).
    #[arg(short = 'A', long = "archive")]
    pub archive: Vec<u32>,

    /// Archive root directory; required outside `--dry-run`.
    #[arg(short = 'p', long = "hsm-root")]
    pub hsm_root: Option<PathBuf>,

    /// Copy buffer size; accepts a `k`/`m`/`g` suffix, default unit MB.
    #[arg(short = 'c', long = "chunk-size", default_value = "1m")]
    pub chunk_size: String,

    /// Bandwidth cap; same size syntax as `--chunk-size`. Unset means
    /// unthrottled.
    #[arg(short = 'b', long = "bandwidth")]
    pub bandwidth: Option<String>,

    /// Progress-report / readiness-wait interval, in seconds.
    #[arg(long = "report", default_value = "30")]
    pub report: u64,

    /// Don't copy file attributes.
    #[arg(long = "no-attr")]
    pub no_attr: bool,

    /// Don't create the shadow-tree symlink.
    #[arg(long = "no-shadow")]
    pub no_shadow: bool,

    /// Don't copy extended attributes.
    #[arg(long = "no-xattr")]
    pub no_xattr: bool,

    /// Abort the dispatch loop (or admin-mode walk) on the first major
    /// error instead of continuing.
    #[arg(long = "abort-on-error")]
    pub abort_on_error: bool,

    /// Log what would happen without touching the filesystem.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Reduce log verbosity; repeatable.
    #[arg(short = 'q', long = "quiet", action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Increase log verbosity; repeatable.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl CommonOpts {
    /// Net verbosity (`-v` steps minus `-q` steps) mapped to a
    /// `tracing::Level` (spec §1 ambient stack: quiet → `WARN`, default →
    /// `INFO`, each `-v` step → `DEBUG` then `TRACE`).
    #[must_use]
    pub fn tracing_level(&self) -> tracing::Level {
        let net = i32::from(self.verbose) - i32::from(self.quiet);
        match net {
            i32::MIN..=-1 => tracing::Level::WARN,
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

/// Which one-shot or long-running action `main` should perform.
#[derive(Debug, Clone)]
pub enum Mode {
    /// Run the dispatch loop until shutdown.
    Daemon,
    /// Link `src` (relative to `hsm_root`) into the filesystem at `dst`
    /// (absolute).
    Import {
        /// Source path, relative to `hsm_root`.
        src: PathBuf,
        /// Destination path, absolute.
        dst: PathBuf,
    },
    /// Rebind one pair, or a batch read from a list file.
    Rebind(RebindTarget),
    /// Report the largest archived FID sequence.
    MaxSequence,
}

/// What to rebind.
#[derive(Debug, Clone)]
pub enum RebindTarget {
    /// A single `old_fid new_fid` pair, given directly on the command line.
    Pair {
        /// FID text the archive entry is currently bound to.
        old: String,
        /// FID text to rebind it to.
        new: String,
    },
    /// A file with one `old_fid new_fid` pair per line.
    List(PathBuf),
}

/// Everything `main` needs after parsing and validating the raw [`Cli`].
#[derive(Debug, Clone)]
pub struct ResolvedCli {
    /// Selected mode and its mode-specific arguments.
    pub mode: Mode,
    /// Filesystem mount point, the final positional argument in every mode.
    pub mount: PathBuf,
    /// Archive root directory.
    pub hsm_root: Option<PathBuf>,
    /// Archive ids this process registers for.
    pub archive_ids: Vec<u32>,
    /// Copy buffer size in bytes.
    pub chunk_size: usize,
    /// Bandwidth cap in bytes/sec, if any.
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
    /// Log level derived from `-q`/`-v`.
    pub verbosity: tracing::Level,
}

impl Cli {
    /// Validate the mode flags and positional arguments, mirroring
    /// `ct_parseopts`'s argument-count and relative/absolute-path checks.
    ///
    /// # Errors
    ///
    /// Returns an error if zero or more than one mode flag is set, if the
    /// positional argument count doesn't match the selected mode, or if an
    /// import source/destination violates the relative/absolute rule.
    pub fn resolve(self) -> Result<ResolvedCli> {
        let mode_flags = [self.daemon, self.import, self.rebind, self.max_sequence]
            .iter()
            .filter(|set| **set)
            .count();
        if mode_flags != 1 {
            return Err(HsmError::InvalidInput(
                "exactly one of --daemon, --import, --rebind, --max-sequence is required".into(),
            ));
        }

        let mut args = self.positionals;
        let mode = if self.daemon {
            expect_positionals(&args, 1, "--daemon")?;
            Mode::Daemon
        } else if self.import {
            expect_positionals(&args, 3, "--import")?;
            let dst = PathBuf::from(args.remove(1));
            let src = PathBuf::from(args.remove(0));
            if src.is_absolute() {
                return Err(HsmError::InvalidInput(
                    "import source path must be relative to the HSM root".into(),
                ));
            }
            if !dst.is_absolute() {
                return Err(HsmError::InvalidInput(
                    "import destination path must be absolute".into(),
                ));
            }
            Mode::Import { src, dst }
        } else if self.rebind {
            match args.len() {
                3 => {
                    let new = args.remove(1);
                    let old = args.remove(0);
                    Mode::Rebind(RebindTarget::Pair { old, new })
                }
                2 => {
                    let list = PathBuf::from(args.remove(0));
                    Mode::Rebind(RebindTarget::List(list))
                }
                _ => {
                    return Err(HsmError::InvalidInput(
                        "--rebind requires 1 or 2 arguments plus the mount point".into(),
                    ))
                }
            }
        } else {
            expect_positionals(&args, 1, "--max-sequence")?;
            Mode::MaxSequence
        };

        let mount = PathBuf::from(
            args.pop()
                .ok_or_else(|| HsmError::InvalidInput("no mount point specified".into()))?,
        );

        if self.common.hsm_root.is_none() && !self.common.dry_run {
            return Err(HsmError::InvalidInput("must specify a HSM root".into()));
        }

        let chunk_size = parse_size(&self.common.chunk_size)? as usize;
        let bandwidth = self
            .common
            .bandwidth
            .as_deref()
            .map(parse_size)
            .transpose()?;
        let verbosity = self.common.tracing_level();
        let common = self.common;

        Ok(ResolvedCli {
            mode,
            mount,
            hsm_root: common.hsm_root,
            archive_ids: common.archive,
            chunk_size,
            bandwidth,
            report_interval: Duration::from_secs(common.report),
            no_attr: common.no_attr,
            no_shadow: common.no_shadow,
            no_xattr: common.no_xattr,
            abort_on_error: common.abort_on_error,
            dry_run: common.dry_run,
            verbosity,
        })
    }
}

/// Check that `args` has exactly `n` entries (the mode's own positionals
/// plus the trailing mount point), erroring with `flag` named for context.
fn expect_positionals(args: &[String], n: usize, flag: &str) -> Result<()> {
    if args.len() != n {
        return Err(HsmError::InvalidInput(format!(
            "{flag} requires exactly {} argument(s), got {}",
            n - 1,
            args.len().saturating_sub(1)
        )));
    }
    Ok(())
}

/// Parse a size with an optional `k`/`m`/`g` suffix (case-insensitive);
/// with no suffix the value is interpreted in megabytes, matching
/// `llapi_parse_size`'s default unit for `-c`/`--bandwidth`.
///
/// # Errors
///
/// Returns an error if the numeric part doesn't parse or the suffix isn't
/// one of `k`/`m`/`g`.
pub fn parse_size(text: &str) -> Result<u64> {
    let text = text.trim();
    let bad = || HsmError::InvalidInput(format!("bad size value: {text:?}"));

    let (digits, unit) = match text.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&text[..text.len() - 1], Some(c.to_ascii_lowercase())),
        _ => (text, None),
    };

    let value: u64 = digits.parse().map_err(|_| bad())?;
    let multiplier = match unit {
        Some('k') => 1024,
        Some('m') => 1024 * 1024,
        Some('g') => 1024 * 1024 * 1024,
        None => DEFAULT_SIZE_UNIT,
        Some(_) => return Err(bad()),
    };

    Ok(value * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<ResolvedCli> {
        let mut full = vec!["hsmcopy"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full)
            .map_err(|e| HsmError::InvalidInput(e.to_string()))?
            .resolve()
    }

    #[test]
    fn parse_size_accepts_bare_number_as_megabytes() {
        assert_eq!(parse_size("4").unwrap(), 4 * 1024 * 1024);
    }

    #[test]
    fn parse_size_accepts_k_m_g_suffixes() {
        assert_eq!(parse_size("512k").unwrap(), 512 * 1024);
        assert_eq!(parse_size("2m").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn parse_size_rejects_unknown_suffix() {
        assert!(parse_size("4x").is_err());
    }

    #[test]
    fn daemon_mode_requires_exactly_one_positional() {
        let resolved = parse(&["-d", "-p", "/archive", "/mnt/fs"]).unwrap();
        assert!(matches!(resolved.mode, Mode::Daemon));
        assert_eq!(resolved.mount, PathBuf::from("/mnt/fs"));

        assert!(parse(&["-d", "-p", "/archive", "/mnt/fs", "extra"]).is_err());
    }

    #[test]
    fn import_mode_validates_relative_src_and_absolute_dst() {
        let resolved = parse(&[
            "-i",
            "-p",
            "/archive",
            "legacy/file",
            "/mnt/fs/file",
            "/mnt/fs",
        ])
        .unwrap();
        match resolved.mode {
            Mode::Import { src, dst } => {
                assert_eq!(src, PathBuf::from("legacy/file"));
                assert_eq!(dst, PathBuf::from("/mnt/fs/file"));
            }
            other => panic!("expected Import, got {other:?}"),
        }

        assert!(parse(&[
            "-i",
            "-p",
            "/archive",
            "/absolute/src",
            "/mnt/fs/file",
            "/mnt/fs",
        ])
        .is_err());
        assert!(parse(&[
            "-i",
            "-p",
            "/archive",
            "legacy/file",
            "relative/dst",
            "/mnt/fs",
        ])
        .is_err());
    }

    #[test]
    fn rebind_mode_accepts_pair_or_list_file() {
        let pair = parse(&[
            "-r",
            "-p",
            "/archive",
            "0x1:0x2:0x0",
            "0x1:0x3:0x0",
            "/mnt/fs",
        ])
        .unwrap();
        assert!(matches!(
            pair.mode,
            Mode::Rebind(RebindTarget::Pair { .. })
        ));

        let list = parse(&["-r", "-p", "/archive", "rebind.list", "/mnt/fs"]).unwrap();
        assert!(matches!(list.mode, Mode::Rebind(RebindTarget::List(_))));
    }

    #[test]
    fn max_sequence_mode_takes_only_the_mount_point() {
        let resolved = parse(&["-M", "-p", "/archive", "/mnt/fs"]).unwrap();
        assert!(matches!(resolved.mode, Mode::MaxSequence));
    }

    #[test]
    fn exactly_one_mode_flag_is_required() {
        assert!(parse(&["-p", "/archive", "/mnt/fs"]).is_err());
        assert!(parse(&["-d", "-M", "-p", "/archive", "/mnt/fs"]).is_err());
    }

    #[test]
    fn hsm_root_is_required_outside_dry_run() {
        assert!(parse(&["-d", "/mnt/fs"]).is_err());
        assert!(parse(&["-d", "--dry-run", "/mnt/fs"]).is_ok());
    }

    #[test]
    fn verbosity_maps_net_flag_count_to_tracing_level() {
        let common = |q: u8, v: u8| CommonOpts {
            archive: vec![],
            hsm_root: None,
            chunk_size: "1m".into(),
            bandwidth: None,
            report: 30,
            no_attr: false,
            no_shadow: false,
            no_xattr: false,
            abort_on_error: false,
            dry_run: true,
            quiet: q,
            verbose: v,
        };
        assert_eq!(common(1, 0).tracing_level(), tracing::Level::WARN);
        assert_eq!(common(0, 0).tracing_level(), tracing::Level::INFO);
        assert_eq!(common(0, 1).tracing_level(), tracing::Level::DEBUG);
        assert_eq!(common(0, 2).tracing_level(), tracing::Level::TRACE);
    }
}
