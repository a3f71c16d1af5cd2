//! Coordinator interface (spec §6): the opaque filesystem component that
//! issues action requests and consumes their outcomes. Out of scope per
//! spec §1 ("the coordinator transport itself"), so this module only
//! defines the trait boundary the rest of the crate is built against, plus
//! a local in-memory implementation used by the test suite.
//!
//! Grounded in the teacher's `traits/filesystem.rs`: a `Send + Sync +
//! 'static` trait with associated types and native `async fn` methods,
//! rather than `#[async_trait]` boxing — the same shape the teacher uses to
//! abstract over local vs. remote filesystem backends.

use crate::copy_engine::Extent;
use crate::error::Result;
use crate::fid::Fid;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

/// What an action item asks the agent to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Copy filesystem data to the archive.
    Archive,
    /// Copy archive data back to the filesystem.
    Restore,
    /// Delete the archive entry.
    Remove,
    /// Explicit cancel notification (spec §4.F).
    Cancel,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Archive => "ARCHIVE",
            Self::Restore => "RESTORE",
            Self::Remove => "REMOVE",
            Self::Cancel => "CANCEL",
        };
        f.write_str(s)
    }
}

/// One item inside an action list (spec §3, "Action item").
#[derive(Debug, Clone)]
pub struct ActionItem {
    /// What to do.
    pub action: ActionKind,
    /// Opaque coordinator-assigned identifier, echoed back at `end`/`progress`.
    pub cookie: u64,
    /// Logical (filesystem-visible) FID.
    pub fid: Fid,
    /// Data FID, distinct from `fid` when the filesystem splits metadata
    /// and data objects.
    pub data_fid: Fid,
    /// Byte range this action covers.
    pub extent: Extent,
}

/// An action list as delivered by `recv` (spec §3/§4.G).
#[derive(Debug, Clone)]
pub struct ActionList {
    /// Filesystem name the coordinator is issuing actions for; validated
    /// against the configured name before dispatch (spec §4.G).
    pub fs_name: String,
    /// Which configured archive this list targets.
    pub archive_id: u32,
    /// Opaque coordinator flags, passed through unexamined.
    pub flags: u64,
    /// The items themselves.
    pub items: Vec<ActionItem>,
}

/// Result of a `recv` call.
#[derive(Debug)]
pub enum RecvOutcome {
    /// A list of items to dispatch.
    List(ActionList),
    /// Clean shutdown requested.
    ShutDown,
    /// Spurious wake; call `recv` again.
    Retry,
}

/// Flags passed to `end` (spec §6, `action.end(..., flags, ...)`).
#[derive(Debug, Clone, Copy, Default)]
pub struct EndFlags {
    /// Mirrors `HP_FLAG_RETRY`: the coordinator should re-offer this item.
    pub retry: bool,
}

impl EndFlags {
    /// Build end flags from whether the terminating error was retryable.
    #[must_use]
    pub fn from_retryable(retryable: bool) -> Self {
        Self { retry: retryable }
    }
}

/// The coordinator transport boundary. One implementation wraps the real
/// transport (out of scope here, spec §1); another, [`LocalCoordinator`],
/// backs the test suite.
pub trait Coordinator: Send + Sync + 'static {
    /// Per-item copy handle returned by `begin`, consumed by `end`.
    type CopyHandle: Send;

    /// Register this process with the coordinator for `archive_ids` on
    /// `mnt`. Idempotent per process.
    async fn register(&self, mnt: &Path, archive_ids: &[u32]) -> Result<()>;

    /// Release kernel-side registration state.
    async fn unregister(&self) -> Result<()>;

    /// Resolve the filesystem name backing `mnt` (spec §4.I, `ct_setup`'s
    /// `llapi_search_fsname`). Populates `Options::fs_name`, which the
    /// dispatch loop then validates every action list's `hal.fs_name`
    /// against (spec §4.G).
    async fn resolve_fs_name(&self, mnt: &Path) -> Result<String>;

    /// Block for the next action list, shutdown, or spurious wake.
    async fn recv(&self) -> Result<RecvOutcome>;

    /// Obtain a private copy handle for `item`. `is_error` marks a
    /// best-effort begin used only to report a pre-existing failure.
    async fn begin(&self, item: &ActionItem, is_error: bool) -> Result<Self::CopyHandle>;

    /// Finish the action. Mandatory on every exit path after a successful
    /// `begin` (spec §4.F/§7).
    async fn end(
        &self,
        handle: Self::CopyHandle,
        extent: Extent,
        flags: EndFlags,
        abs_errno: i32,
    ) -> Result<()>;

    /// Report progress; a non-zero return means cancel (spec §4.D).
    async fn progress(&self, handle: &Self::CopyHandle, extent: Extent) -> i32;

    /// Volatile destination FID, for logging during restore.
    async fn get_dfid(&self, handle: &Self::CopyHandle) -> Result<Fid>;

    /// Volatile destination fd, for writing during restore.
    async fn get_fd(&self, handle: &Self::CopyHandle) -> Result<RawFd>;

    /// Resolve a FID to a user-facing path under `mnt`.
    async fn fid2path(&self, mnt: &Path, fid: &Fid) -> Result<PathBuf>;

    /// Register a pre-existing archive file at `dst_abs` as a new logical
    /// entry, returning its freshly assigned FID (spec §4.H, Import).
    async fn import(&self, dst_abs: &Path, archive_id: u32, stat: &std::fs::Metadata) -> Result<Fid>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod local {
    //! A minimal in-process [`Coordinator`] used by integration tests: no
    //! real transport, just enough bookkeeping to drive the handlers.

    use super::{ActionItem, Coordinator, EndFlags, RecvOutcome};
    use crate::copy_engine::Extent;
    use crate::error::{HsmError, Result};
    use crate::fid::Fid;
    use std::collections::VecDeque;
    use std::os::unix::io::RawFd;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// Handle returned by [`LocalCoordinator::begin`]: just the cookie it
    /// was given, echoed back at `end`.
    #[derive(Debug, Clone, Copy)]
    pub struct LocalCopyHandle {
        /// Cookie of the item this handle was opened for.
        pub cookie: u64,
    }

    /// Outcome recorded by a test after `end` is called, for assertions.
    #[derive(Debug, Clone)]
    pub struct EndRecord {
        /// Cookie of the completed item.
        pub cookie: u64,
        /// Extent reported at completion.
        pub extent: Extent,
        /// Flags reported at completion.
        pub flags: EndFlags,
        /// errno reported at completion (0 = success).
        pub abs_errno: i32,
    }

    /// No-op coordinator for tests: `recv` drains a pre-loaded queue of
    /// action lists, then returns `ShutDown`; `import` hands out
    /// sequentially increasing FIDs.
    #[derive(Default)]
    pub struct LocalCoordinator {
        pending: Mutex<VecDeque<super::ActionList>>,
        ends: Mutex<Vec<EndRecord>>,
        next_oid: AtomicU64,
    }

    impl LocalCoordinator {
        /// Build a coordinator that will hand out `lists` in order, then
        /// `ShutDown`.
        #[must_use]
        pub fn with_lists(lists: Vec<super::ActionList>) -> Self {
            Self {
                pending: Mutex::new(lists.into()),
                ends: Mutex::new(Vec::new()),
                next_oid: AtomicU64::new(1),
            }
        }

        /// Snapshot of every `end` call observed so far.
        pub fn ends(&self) -> Vec<EndRecord> {
            self.ends.lock().unwrap().clone()
        }
    }

    impl Coordinator for LocalCoordinator {
        type CopyHandle = LocalCopyHandle;

        async fn register(&self, _mnt: &Path, _archive_ids: &[u32]) -> Result<()> {
            Ok(())
        }

        async fn unregister(&self) -> Result<()> {
            Ok(())
        }

        async fn resolve_fs_name(&self, mnt: &Path) -> Result<String> {
            Ok(mnt
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "testfs".into()))
        }

        async fn recv(&self) -> Result<RecvOutcome> {
            let mut pending = self.pending.lock().unwrap();
            match pending.pop_front() {
                Some(list) => Ok(RecvOutcome::List(list)),
                None => Ok(RecvOutcome::ShutDown),
            }
        }

        async fn begin(&self, item: &ActionItem, _is_error: bool) -> Result<Self::CopyHandle> {
            Ok(LocalCopyHandle {
                cookie: item.cookie,
            })
        }

        async fn end(
            &self,
            handle: Self::CopyHandle,
            extent: Extent,
            flags: EndFlags,
            abs_errno: i32,
        ) -> Result<()> {
            self.ends.lock().unwrap().push(EndRecord {
                cookie: handle.cookie,
                extent,
                flags,
                abs_errno,
            });
            Ok(())
        }

        async fn progress(&self, _handle: &Self::CopyHandle, _extent: Extent) -> i32 {
            0
        }

        async fn get_dfid(&self, _handle: &Self::CopyHandle) -> Result<Fid> {
            Err(HsmError::Protocol(
                "LocalCoordinator has no volatile fds".into(),
            ))
        }

        async fn get_fd(&self, _handle: &Self::CopyHandle) -> Result<RawFd> {
            Err(HsmError::Protocol(
                "LocalCoordinator has no volatile fds".into(),
            ))
        }

        async fn fid2path(&self, mnt: &Path, fid: &Fid) -> Result<PathBuf> {
            Ok(crate::fid::lustre_path(mnt, fid))
        }

        async fn import(
            &self,
            _dst_abs: &Path,
            _archive_id: u32,
            _stat: &std::fs::Metadata,
        ) -> Result<Fid> {
            let oid = self.next_oid.fetch_add(1, Ordering::Relaxed);
            // Arbitrary fixed sequence in the normal (namespace-allocated)
            // range; a real coordinator assigns sequences itself.
            Ok(Fid::new(0x2000_0000_1, oid as u32, 0))
        }
    }
}
