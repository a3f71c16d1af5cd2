//! Max-sequence admin mode (spec §4.H): scan the top four directory levels
//! under the archive root and report the largest FID-derived value found,
//! as a sanity check when seeding a new archive from an existing one.
//!
//! Grounded in `ct_dir_level_max`/`ct_max_sequence` of the original
//! copytool: at each of the four levels, `readdir` the current directory,
//! parse every entry name as a 4-hex-digit value (`sscanf("%hx")`,
//! non-numeric entries like `.`/`..` are skipped), keep the largest, and
//! descend into it for the next level. The four 16-bit values are packed
//! high-to-low into a 64-bit word and printed as 16 lowercase hex digits.

use crate::error::{HsmError, Result};
use std::path::{Path, PathBuf};

/// Number of directory levels `ct_max_sequence` walks.
const LEVELS: u32 = 4;

/// Largest 4-hex-digit subdirectory name directly inside `dir`, or `0` if
/// `dir` has no such entries (an empty archive root).
///
/// # Errors
///
/// Returns an error if `dir` cannot be opened or its entries cannot be
/// enumerated.
fn dir_level_max(dir: &Path) -> Result<u16> {
    let mut max = 0u16;
    let entries = std::fs::read_dir(dir)
        .map_err(|e| HsmError::Io(std::io::Error::new(e.kind(), format!("{}: {e}", dir.display()))))?;

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        match u16::from_str_radix(name, 16) {
            Ok(v) => max = max.max(v),
            Err(_) => tracing::trace!(name, "max-sequence: unexpected dirname format, skipping"),
        }
    }

    Ok(max)
}

/// Walk `LEVELS` directory levels under `root`, descending into the
/// largest subdirectory found at each level, and pack the four 16-bit
/// maxima into a single `u64` (level 0 highest, level 3 lowest).
///
/// # Errors
///
/// Returns an error if any of the four levels cannot be read (e.g. `root`
/// is shallower than four levels deep).
pub fn max_sequence(root: &Path) -> Result<u64> {
    let mut path = root.to_path_buf();
    let mut seq: u64 = 0;

    for level in 0..LEVELS {
        let sub = dir_level_max(&path)?;
        seq |= u64::from(sub) << ((LEVELS - 1 - level) * 16);
        path = descend(&path, sub);
    }

    Ok(seq)
}

fn descend(path: &Path, sub: u16) -> PathBuf {
    path.join(format!("{sub:04x}"))
}

/// Render a max-sequence value the way `ct_max_sequence` prints it:
/// `max_sequence: <16 lowercase hex digits>`.
#[must_use]
pub fn format_max_sequence(seq: u64) -> String {
    format!("max_sequence: {seq:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_archive_root_reports_zero() {
        let dir = TempDir::new().unwrap();
        // The walk descends into "0000" at every level, so that nested path
        // must actually exist all the way down even though each level is
        // otherwise empty.
        std::fs::create_dir_all(dir.path().join("0000/0000/0000/0000")).unwrap();
        assert_eq!(max_sequence(dir.path()).unwrap(), 0);
    }

    #[test]
    fn picks_largest_entry_at_each_level_and_packs_high_to_low() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        std::fs::create_dir_all(root.join("0001")).unwrap();
        std::fs::create_dir_all(root.join("0010")).unwrap();
        std::fs::create_dir_all(root.join("0010/0002")).unwrap();
        std::fs::create_dir_all(root.join("0010/0020")).unwrap();
        std::fs::create_dir_all(root.join("0010/0020/0003")).unwrap();
        std::fs::create_dir_all(root.join("0010/0020/0030")).unwrap();
        std::fs::create_dir_all(root.join("0010/0020/0030/0004")).unwrap();
        std::fs::create_dir_all(root.join("0010/0020/0030/0040")).unwrap();

        let seq = max_sequence(root).unwrap();
        let expected = (0x0010u64 << 48) | (0x0020 << 32) | (0x0030 << 16) | 0x0040;
        assert_eq!(seq, expected);
        assert_eq!(format_max_sequence(seq), format!("max_sequence: {expected:016x}"));
    }

    #[test]
    fn skips_non_hex_entries() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("not-hex")).unwrap();
        std::fs::create_dir_all(root.join("0005")).unwrap();
        assert_eq!(dir_level_max(root).unwrap(), 0x0005);
    }

    #[test]
    fn missing_level_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(max_sequence(dir.path()).is_err());
    }
}
