//! Path/FID layout (spec §4.A): translate file identifiers to archive paths
//! and create parent directories.
//!
//! Grounded in `ct_path_archive`/`ct_path_lustre`/`ct_mkdir_p` of the
//! original copytool: the archive path's six-level fan-out and the FID's
//! canonical text form are reproduced byte-for-byte so that an archive tree
//! written by this agent stays addressable by anything else that implements
//! the same layout.

use crate::error::Result;
use std::fmt;
use std::path::{Path, PathBuf};

/// Sequence range reserved for IGIF (inode-generation) FIDs.
const FID_SEQ_IGIF: u64 = 12;
const FID_SEQ_IGIF_MAX: u64 = 0x0000_0000_ffff_ffff;
/// Normal (namespace-allocated) FIDs start here.
const FID_SEQ_NORMAL_START: u64 = 0x2000_0000_0;

/// Opaque 128-bit file identifier: `{sequence, oid, version}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fid {
    /// 64-bit sequence number.
    pub sequence: u64,
    /// 32-bit object id within the sequence.
    pub oid: u32,
    /// 32-bit version/generation.
    pub version: u32,
}

impl Fid {
    /// Build a FID from its three fields.
    #[must_use]
    pub const fn new(sequence: u64, oid: u32, version: u32) -> Self {
        Self {
            sequence,
            oid,
            version,
        }
    }

    /// IGIF ("inode and generation in FID") range: legacy FIDs synthesized
    /// from an inode number and generation rather than allocated normally.
    #[must_use]
    pub const fn is_igif(&self) -> bool {
        self.sequence >= FID_SEQ_IGIF && self.sequence <= FID_SEQ_IGIF_MAX
    }

    /// Namespace-allocated FID range.
    #[must_use]
    pub const fn is_normal(&self) -> bool {
        self.sequence >= FID_SEQ_NORMAL_START
    }

    /// "File-like": either predicate holds. Reserved sequences (0..12,
    /// the IDIF range) are neither.
    #[must_use]
    pub const fn is_file(&self) -> bool {
        self.is_normal() || self.is_igif()
    }

    /// Parse the canonical `seq:oid:ver` text form (each field `0x`-prefixed
    /// hex, as printed by `PFID`/`DFID_NOBRACE` in the original tool).
    ///
    /// # Errors
    ///
    /// Returns `HsmError::Protocol` if the text does not have exactly three
    /// colon-separated, `0x`-prefixed hex fields.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parts = text.split(':');
        let (seq, oid, ver) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(s), Some(o), Some(v), None) => (s, o, v),
            _ => {
                return Err(crate::error::HsmError::Protocol(format!(
                    "malformed FID text: {text:?}"
                )))
            }
        };
        let parse_hex = |s: &str| -> Result<u64> {
            let s = s.strip_prefix("0x").unwrap_or(s);
            u64::from_str_radix(s, 16).map_err(|e| {
                crate::error::HsmError::Protocol(format!("malformed FID field {s:?}: {e}"))
            })
        };
        Ok(Self::new(
            parse_hex(seq)?,
            parse_hex(oid)? as u32,
            parse_hex(ver)? as u32,
        ))
    }
}

impl fmt::Display for Fid {
    /// Canonical text form: `0x<seq>:0x<oid>:0x<ver>`, all lowercase hex,
    /// matching `PFID`/`DFID_NOBRACE`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}:{:#x}:{:#x}", self.sequence, self.oid, self.version)
    }
}

/// Compute the archive path for `fid` under `root`.
///
/// Layout: `<root>/XXXX/XXXX/XXXX/XXXX/XXXX/XXXX/<fid-text>`, where the six
/// 4-hex-digit segments are, low to high: `oid & 0xffff`, `oid >> 16`, then
/// the four 16-bit slices of `sequence` from bit 0 upward. This ordering is
/// load-bearing — it must match `ct_path_archive` exactly for pre-existing
/// archives to remain addressable.
#[must_use]
pub fn archive_path(root: &Path, fid: &Fid) -> PathBuf {
    root.join(format!(
        "{:04x}/{:04x}/{:04x}/{:04x}/{:04x}/{:04x}/{}",
        fid.oid & 0xffff,
        (fid.oid >> 16) & 0xffff,
        fid.sequence & 0xffff,
        (fid.sequence >> 16) & 0xffff,
        (fid.sequence >> 32) & 0xffff,
        (fid.sequence >> 48) & 0xffff,
        fid,
    ))
}

/// Compute the user-facing filesystem path for `fid` under mount point `mnt`
/// (`<mnt>/.lustre/fid/<fid-text>`, the mount's resolve-by-FID namespace).
#[must_use]
pub fn lustre_path(mnt: &Path, fid: &Fid) -> PathBuf {
    mnt.join(".lustre").join("fid").join(fid.to_string())
}

/// Create all missing ancestors of `path` (`path` itself is not created).
/// `EEXIST` on any component is success; any other error is fatal for the
/// caller, matching `ct_mkdir_p`.
///
/// # Errors
///
/// Returns an I/O error if a directory component could not be created for
/// any reason other than already existing.
pub async fn mkdir_p(path: &Path) -> Result<()> {
    match compio::fs::create_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.into()),
    }
}
