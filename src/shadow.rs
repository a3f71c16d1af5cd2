//! Shadow-tree path math (spec §3, "Archive entry"; §4.F ARCHIVE handler):
//! a namespace of relative symlinks under `<root>/shadow/` mirroring the
//! filesystem's original paths, each pointing back at the corresponding
//! archive entry.
//!
//! Grounded in the ARCHIVE handler's shadow-tree block in the original
//! copytool: the symlink target is computed as a *relative* path so the
//! shadow tree stays valid if the archive root is ever mounted elsewhere.
//! The original derives the `../` count from a running count of path
//! separators in `<root>/shadow/<relpath>` minus those in `<root>` itself;
//! this reduces to one `..` per path component of `<relpath>` (the
//! reconstructed original path, including its filename), which is what
//! this module counts directly.

use crate::fid::{archive_path, Fid};
use std::path::{Path, PathBuf};

/// Where the shadow symlink for `relpath` (the filesystem path returned by
/// `coordinator.fid2path`, relative, no leading slash) lives under
/// `archive_root`.
#[must_use]
pub fn shadow_link_path(archive_root: &Path, relpath: &Path) -> PathBuf {
    archive_root.join("shadow").join(relpath)
}

/// The relative symlink target for a shadow entry at `relpath`, pointing at
/// `fid`'s archive entry. One `..` per component of `relpath` walks back up
/// to `archive_root` from the shadow symlink's own location, then the usual
/// six-level archive layout descends back down to the FID.
///
/// Panics if `relpath` is empty (has no components) — a shadow entry always
/// corresponds to at least a filename.
#[must_use]
pub fn relative_link_target(relpath: &Path, fid: &Fid) -> PathBuf {
    let depth = relpath.components().count();
    assert!(depth > 0, "shadow relpath must have at least one component");

    let mut up = PathBuf::new();
    for _ in 0..depth {
        up.push("..");
    }
    archive_path(&up, fid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_component_relpath_needs_one_dotdot() {
        let fid = Fid::new(1, 2, 0);
        let target = relative_link_target(Path::new("file.txt"), &fid);
        assert!(target.starts_with(".."));
        assert!(!target.starts_with("../.."));
    }

    #[test]
    fn nested_relpath_needs_one_dotdot_per_component() {
        let fid = Fid::new(1, 2, 0);
        let target = relative_link_target(Path::new("dir1/dir2/file.txt"), &fid);
        let up_prefix: PathBuf = std::iter::repeat("..").take(3).collect();
        assert!(target.starts_with(&up_prefix));
    }

    #[test]
    fn shadow_link_path_is_rooted_under_shadow() {
        let path = shadow_link_path(Path::new("/archive"), Path::new("dir1/file.txt"));
        assert_eq!(path, Path::new("/archive/shadow/dir1/file.txt"));
    }
}
