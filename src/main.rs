//! Binary entry point: parse the CLI, run the selected mode, and exit with
//! the status spec §6 calls for (`0` on a clean run, `-rc` — a positive
//! errno — when a mode fails outright).
//!
//! The daemon mode's coordinator is explicitly out of scope for this crate
//! (spec §1, "the coordinator transport itself"); the shipped binary runs
//! against [`hsmcopy::coordinator::local::LocalCoordinator`], the same
//! in-memory double the test suite uses, which is why this binary only
//! builds with the `test-support` feature. A real deployment swaps in a
//! `Coordinator` implementation that actually talks to the filesystem.

use clap::Parser;
use futures::{pin_mut, select, FutureExt};
use hsmcopy::cli::{Cli, Mode, RebindTarget};
use hsmcopy::config::Options;
use hsmcopy::coordinator::local::LocalCoordinator;
use hsmcopy::coordinator::Coordinator;
use hsmcopy::stats::ErrorCounters;
use hsmcopy::{admin, dispatch, setup};
use std::sync::Arc;

#[compio::main]
async fn main() {
    let cli = Cli::parse();
    let resolved = match cli.resolve() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("hsmcopy: {e}");
            std::process::exit(e.errno());
        }
    };

    init_logging(resolved.verbosity);

    let exit_code = match run(resolved).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "hsmcopy: fatal error");
            e.errno()
        }
    };

    std::process::exit(exit_code);
}

fn init_logging(level: tracing::Level) {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(level.to_string()))
        .init();
}

async fn run(resolved: hsmcopy::cli::ResolvedCli) -> hsmcopy::Result<i32> {
    let opts = Arc::new(Options {
        mount: resolved.mount.clone(),
        hsm_root: resolved.hsm_root.clone(),
        archive_ids: resolved.archive_ids.clone(),
        fs_name: String::new(),
        chunk_size: resolved.chunk_size,
        bandwidth: resolved.bandwidth,
        report_interval: resolved.report_interval,
        no_attr: resolved.no_attr,
        no_shadow: resolved.no_shadow,
        no_xattr: resolved.no_xattr,
        abort_on_error: resolved.abort_on_error,
        dry_run: resolved.dry_run,
    });
    let counters = Arc::new(ErrorCounters::new());

    match resolved.mode {
        Mode::Daemon => run_daemon(opts, counters).await,
        Mode::Import { src, dst } => run_import(&opts, &counters, &src, &dst).await,
        Mode::Rebind(target) => run_rebind(&opts, target).await,
        Mode::MaxSequence => run_max_sequence(&opts).await,
    }
}

/// Open the archive root, register, and dispatch actions until the
/// coordinator signals shutdown or a SIGINT/SIGTERM arrives, whichever
/// comes first (spec §4.G/§4.I).
async fn run_daemon(opts: Arc<Options>, counters: Arc<ErrorCounters>) -> hsmcopy::Result<i32> {
    let coord = Arc::new(LocalCoordinator::default());
    let setup_result = setup::setup(coord.as_ref(), &opts).await?;
    let opts = Arc::new(Options {
        fs_name: setup_result.fs_name,
        ..(*opts).clone()
    });
    let _archive_root = setup_result.archive_root;

    let max_in_flight = 64;
    let dispatch_fut = dispatch::run(
        Arc::clone(&coord),
        Arc::clone(&opts),
        Arc::clone(&counters),
        max_in_flight,
    )
    .fuse();
    let shutdown_fut = setup::wait_for_shutdown_signal().fuse();
    pin_mut!(dispatch_fut, shutdown_fut);

    let exit_code = select! {
        res = dispatch_fut => {
            res?;
            counters.exit_code()
        }
        _ = shutdown_fut => {
            coord.unregister().await?;
            // Matches the original's signal handler, which always exits 1
            // after unregistering, independent of the error tally so far.
            1
        }
    };

    tracing::info!(
        major = counters.major(),
        minor = counters.minor(),
        "hsmcopy finished"
    );

    Ok(exit_code)
}

async fn run_import(
    opts: &Options,
    counters: &ErrorCounters,
    src: &std::path::Path,
    dst: &std::path::Path,
) -> hsmcopy::Result<i32> {
    let coord = LocalCoordinator::default();
    admin::run_import(&coord, opts, counters, src, dst).await?;
    Ok(counters.exit_code())
}

async fn run_rebind(opts: &Options, target: RebindTarget) -> hsmcopy::Result<i32> {
    let root = opts.require_hsm_root()?;
    match target {
        RebindTarget::Pair { old, new } => {
            admin::rebind_pair(root, &old, &new, opts.dry_run).await?;
            Ok(0)
        }
        RebindTarget::List(list_path) => {
            let report = admin::rebind_list(root, &list_path, opts.dry_run).await?;
            tracing::info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                "rebind list finished"
            );
            Ok(i32::from(!report.all_succeeded()))
        }
    }
}

async fn run_max_sequence(opts: &Options) -> hsmcopy::Result<i32> {
    let root = opts.require_hsm_root()?.to_path_buf();
    let seq = compio::runtime::spawn_blocking(move || admin::max_sequence(&root))
        .await
        .map_err(|e| {
            hsmcopy::HsmError::Extended(compio_fs_extended::ExtendedError::spawn_join(e))
        })??;
    println!("{}", admin::format_max_sequence(seq));
    Ok(0)
}
