// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The long-running sync loop and the pieces it shares with one-shot commands.

use std::fs;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stint_core::{Database, RetryScheduler};
use stint_sync::{
    lock, shared, ChangeFeed, CycleReport, EditDebouncer, SharedDb, SharedRemote,
    SqliteLocalStore, SyncCoordinator, SyncExecutor, TriggerReason,
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// Lock filename for the single instance guarantee.
pub const LOCK_NAME: &str = "stintd.lock";
/// PID filename within the state directory.
pub const PID_NAME: &str = "stintd.pid";

/// How often the local database is checked for commits by other processes.
const EDIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A local database wired to the configured remote.
pub struct Engine {
    pub db: SharedDb,
    pub coordinator: SyncCoordinator,
    pub feed: Arc<ChangeFeed>,
}

impl Engine {
    pub fn open(config: &Config) -> Result<Self> {
        let remote = SharedRemote::open(config.remote_path()?)?;
        let db = shared(Database::open(&config.database_path())?);
        let feed = Arc::new(ChangeFeed::new());
        let executor = SyncExecutor::new(
            Arc::clone(&db),
            SqliteLocalStore::new(Arc::clone(&db)),
            remote,
            RetryScheduler::new(config.retry_policy()),
        )
        .with_config(config.executor_config())
        .with_feed(Arc::clone(&feed));
        let coordinator = SyncCoordinator::new(Arc::new(executor), Arc::clone(&db));
        Ok(Engine { db, coordinator, feed })
    }
}

/// Takes the state directory's exclusive lock. Held until the file is dropped.
pub fn acquire_lock(state_dir: &Path) -> Result<fs::File> {
    use fs2::FileExt;

    fs::create_dir_all(state_dir)?;
    let lock_path = state_dir.join(LOCK_NAME);
    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&lock_path)?;
    file.try_lock_exclusive()
        .map_err(|_| Error::AlreadyRunning(lock_path.display().to_string()))?;
    Ok(file)
}

/// True if another process holds the state directory's lock.
pub fn daemon_running(state_dir: &Path) -> bool {
    matches!(acquire_lock(state_dir), Err(Error::AlreadyRunning(_)))
}

/// Runs `future` to completion on a fresh runtime.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Runtime::new()?;
    Ok(runtime.block_on(future))
}

/// Runs the sync loop until Ctrl-C.
pub fn run_daemon(config: &Config) -> Result<()> {
    let state_dir = config.state_dir();
    let lock_file = acquire_lock(&state_dir)?;

    let pid_path = state_dir.join(PID_NAME);
    fs::write(&pid_path, format!("{}", std::process::id()))?;

    info!("stintd starting, state_dir={}", state_dir.display());
    let result = block_on(serve(config)).and_then(|r| r);
    if let Err(e) = &result {
        tracing::error!("stintd stopped with error: {}", e);
    }

    let _ = fs::remove_file(&pid_path);
    drop(lock_file);
    info!("stintd stopped");
    result
}

async fn serve(config: &Config) -> Result<()> {
    let engine = Engine::open(config)?;
    let coordinator = engine.coordinator.clone();

    engine.feed.subscribe(None, |event| {
        debug!("{:?} {}:{}", event.kind, event.entity_type, event.local_id);
    });
    coordinator.add_observer(|report: &CycleReport| {
        info!(
            "cycle finished: pushed={} pulled={} conflicts={} failed={} deferred={}",
            report.pushed, report.pulled, report.conflicts_resolved, report.failed, report.deferred
        );
        for error in &report.errors {
            warn!("{}", error);
        }
    });

    let debouncer = {
        let coordinator = coordinator.clone();
        EditDebouncer::spawn(config.edit_quiet(), move || {
            coordinator.trigger_cycle(TriggerReason::LocalEdit);
        })
    };

    coordinator.trigger_cycle(TriggerReason::Foreground);

    let mut periodic = tokio::time::interval(config.interval());
    periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately; the start-up cycle covers it
    periodic.tick().await;

    let mut poll = tokio::time::interval(EDIT_POLL_INTERVAL);
    let mut seen_version = lock(&engine.db).data_version()?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                info!("interrupted, shutting down");
                break;
            }
            _ = periodic.tick() => {
                coordinator.trigger_cycle(TriggerReason::Periodic);
            }
            _ = poll.tick() => {
                let current = lock(&engine.db).data_version();
                match current {
                    Ok(version) if version != seen_version => {
                        seen_version = version;
                        debouncer.notify();
                    }
                    Ok(_) => {}
                    Err(e) => warn!("failed to poll for local edits: {}", e),
                }
            }
        }
    }

    drop(debouncer);
    coordinator.cancel();
    coordinator.wait_idle().await;
    Ok(())
}
