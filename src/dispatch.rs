//! Dispatch loop (spec §4.G; §9 REDESIGN FLAG "Detached workers"): pull
//! action lists from the coordinator, validate the filesystem name, and fan
//! each item out to a bounded pool of concurrent workers.
//!
//! Grounded in `ct_run`'s main loop in the original copytool: `llapi_hsm_copytool_recv`
//! in a loop, `hal->hal_fsname` checked against the configured name, then one
//! `pthread_create` per `hsm_action_item` with no cap on how many run at
//! once. The original's own comment above that loop even notes the lack of
//! a limit is a known gap; this dispatcher bounds concurrency with a
//! `compio_sync::Semaphore`, the same primitive the teacher's
//! `SharedSemaphore` wraps to cap in-flight BFS work.

use crate::config::Options;
use crate::coordinator::{Coordinator, RecvOutcome};
use crate::error::Result;
use crate::handlers::handle_action;
use crate::stats::ErrorCounters;
use compio_sync::Semaphore;
use std::sync::Arc;

/// Run the dispatch loop until the coordinator signals shutdown, or until
/// the first major error if `opts.abort_on_error` is set.
///
/// # Errors
///
/// Returns an error if `coordinator.recv()` itself fails in a way that
/// isn't tolerated by `abort_on_error` (a malformed action list is a major
/// error recorded in `counters`, not a return here; this only returns on a
/// transport-level failure when aborting on error).
pub async fn run<C: Coordinator>(
    coord: Arc<C>,
    opts: Arc<Options>,
    counters: Arc<ErrorCounters>,
    max_in_flight: usize,
) -> Result<()> {
    let semaphore = Arc::new(Semaphore::new(max_in_flight));

    loop {
        let outcome = match coord.recv().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "coordinator recv failed");
                counters.record_major();
                if opts.abort_on_error {
                    return Err(e);
                }
                continue;
            }
        };

        match outcome {
            RecvOutcome::ShutDown => break,
            RecvOutcome::Retry => continue,
            RecvOutcome::List(list) => {
                if list.fs_name != opts.fs_name {
                    tracing::error!(
                        expected = %opts.fs_name,
                        actual = %list.fs_name,
                        "filesystem name mismatch, discarding action list"
                    );
                    counters.record_major();
                    if opts.abort_on_error {
                        break;
                    }
                    continue;
                }

                for item in list.items {
                    let coord = Arc::clone(&coord);
                    let opts = Arc::clone(&opts);
                    let counters = Arc::clone(&counters);
                    let semaphore = Arc::clone(&semaphore);
                    let mount = opts.mount.clone();

                    // Detached: the join handle is dropped immediately
                    // rather than collected. Dropping a compio `JoinHandle`
                    // does not cancel the task, so the spawned worker still
                    // runs to completion; the coordinator's own end/fail
                    // call (inside `handle_action`) is the only completion
                    // signal this dispatcher relies on. See spec §9
                    // "Detached workers" and DESIGN.md.
                    compio::runtime::spawn(async move {
                        let _permit = semaphore.acquire().await;
                        match handle_action(coord.as_ref(), &opts, &mount, &item).await {
                            Ok(minor) => {
                                if minor.0 {
                                    counters.record_minor();
                                }
                            }
                            Err(e) => {
                                tracing::error!(
                                    action = %item.action,
                                    fid = %item.fid,
                                    error = %e,
                                    "action failed"
                                );
                                counters.record_major();
                            }
                        }
                    });
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy_engine::Extent;
    use crate::coordinator::local::LocalCoordinator;
    use crate::coordinator::{ActionItem, ActionKind, ActionList};
    use crate::fid::Fid;
    use std::time::Duration;
    use tempfile::TempDir;

    fn sample_opts(hsm_root: std::path::PathBuf) -> Options {
        Options {
            mount: std::path::PathBuf::from("/mnt/fs"),
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
    async fn mismatched_fs_name_counts_as_major_and_is_skipped() {
        let archive = TempDir::new().unwrap();
        let opts = Arc::new(sample_opts(archive.path().to_path_buf()));
        let counters = Arc::new(ErrorCounters::new());

        let list = ActionList {
            fs_name: "othername".into(),
            archive_id: 1,
            flags: 0,
            items: vec![],
        };
        let coord = Arc::new(LocalCoordinator::with_lists(vec![list]));

        run(coord, opts, Arc::clone(&counters), 4).await.unwrap();

        assert_eq!(counters.major(), 1);
        assert_eq!(counters.minor(), 0);
    }

    #[compio::test]
    async fn cancel_item_is_dispatched_and_counted_as_minor() {
        let archive = TempDir::new().unwrap();
        let opts = Arc::new(sample_opts(archive.path().to_path_buf()));
        let counters = Arc::new(ErrorCounters::new());

        let item = ActionItem {
            action: ActionKind::Cancel,
            cookie: 1,
            fid: Fid::new(1, 1, 0),
            data_fid: Fid::new(1, 1, 0),
            extent: Extent {
                offset: 0,
                length: None,
            },
        };
        let list = ActionList {
            fs_name: "testfs".into(),
            archive_id: 1,
            flags: 0,
            items: vec![item],
        };
        let coord = Arc::new(LocalCoordinator::with_lists(vec![list]));

        run(coord, opts, Arc::clone(&counters), 4).await.unwrap();

        // `run` returns as soon as the coordinator reports shutdown; it does
        // not wait for the detached worker it just spawned, so the counter
        // update can still be in flight. Poll with a short bound instead of
        // assuming it has already landed.
        for _ in 0..50 {
            if counters.minor() > 0 {
                break;
            }
            compio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(counters.major(), 0);
        assert_eq!(counters.minor(), 1);
    }
}
