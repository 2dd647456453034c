// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Sync coordinator: runs at most one cycle at a time.
//!
//! ```text
//!            trigger_cycle
//!   Idle ─────────────────► Running ──► Completed / CompletedWithErrors ──► Idle
//!                             │  ▲
//!               trigger while │  │ rerun flag set
//!               running       ▼  │
//!                           (coalesced)
//! ```
//!
//! A single-permit semaphore guards the cycle. Triggers that arrive while a
//! cycle is running set a rerun flag instead of queueing, so any burst of
//! triggers costs at most one extra cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use stint_core::{EntityType, SyncRecord};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::executor::CycleRunner;
use crate::report::CycleReport;
use crate::store::{lock, SharedDb};
use crate::trigger::TriggerReason;

/// Aggregate state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Running,
    /// The last cycle finished without errors.
    Completed,
    /// The last cycle finished with failed records or pass errors.
    CompletedWithErrors,
}

/// What a call to [`SyncCoordinator::trigger_cycle`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new cycle was started.
    Started,
    /// A cycle was already running; another will follow it.
    Coalesced,
}

/// Receives the report of every finished cycle.
pub trait CycleObserver: Send + Sync {
    fn on_cycle_complete(&self, report: &CycleReport);
}

impl<F> CycleObserver for F
where
    F: Fn(&CycleReport) + Send + Sync,
{
    fn on_cycle_complete(&self, report: &CycleReport) {
        self(report)
    }
}

struct Inner {
    runner: Arc<dyn CycleRunner>,
    permit: Arc<Semaphore>,
    rerun: AtomicBool,
    phase: watch::Sender<CyclePhase>,
    observers: Mutex<Vec<Arc<dyn CycleObserver>>>,
    cancel: Mutex<CancellationToken>,
    db: SharedDb,
    last_report: Mutex<Option<CycleReport>>,
}

impl Inner {
    /// Enter Running with a fresh cancellation token.
    fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = token.clone();
        self.phase.send_replace(CyclePhase::Running);
        token
    }

    async fn execute(&self, cancel: CancellationToken) -> CycleReport {
        let report = self.runner.run_cycle(&cancel).await;

        let phase = if report.has_errors() {
            CyclePhase::CompletedWithErrors
        } else {
            CyclePhase::Completed
        };
        self.phase.send_replace(phase);

        let observers = self.observers.lock().unwrap_or_else(|e| e.into_inner()).clone();
        for observer in observers {
            observer.on_cycle_complete(&report);
        }
        *self.last_report.lock().unwrap_or_else(|e| e.into_inner()) = Some(report.clone());
        report
    }
}

/// Holds the cycle permit and passes it to [`finish`] when dropped, so the
/// phase leaves Running even if the cycle's future is dropped mid-way.
struct CycleGuard {
    inner: Arc<Inner>,
    permit: Option<OwnedSemaphorePermit>,
}

impl CycleGuard {
    fn new(inner: Arc<Inner>, permit: OwnedSemaphorePermit) -> Self {
        CycleGuard { inner, permit: Some(permit) }
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            finish(Arc::clone(&self.inner), permit);
        }
    }
}

/// Runs a cycle on a background task, then hands the permit on.
fn spawn_cycle(inner: Arc<Inner>, permit: OwnedSemaphorePermit) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!("no async runtime, cycle left for the next trigger");
        inner.phase.send_replace(CyclePhase::Idle);
        drop(permit);
        return;
    };
    let cancel = inner.begin();
    runtime.spawn(async move {
        let guard = CycleGuard::new(inner, permit);
        guard.inner.execute(cancel).await;
    });
}

/// Release the cycle permit, or reuse it for a coalesced trigger.
fn finish(inner: Arc<Inner>, permit: OwnedSemaphorePermit) {
    if inner.rerun.swap(false, Ordering::SeqCst) {
        debug!("running coalesced trigger");
        spawn_cycle(inner, permit);
        return;
    }
    inner.phase.send_replace(CyclePhase::Idle);
    drop(permit);

    // a trigger may have been coalesced after the swap above
    if inner.rerun.swap(false, Ordering::SeqCst) {
        match Arc::clone(&inner.permit).try_acquire_owned() {
            Ok(permit) => spawn_cycle(inner, permit),
            // whoever holds it now will see the flag
            Err(_) => inner.rerun.store(true, Ordering::SeqCst),
        }
    }
}

/// Drives sync cycles. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    /// `db` is the ledger the runner syncs, used for manual retries.
    pub fn new<R: CycleRunner>(runner: Arc<R>, db: SharedDb) -> Self {
        let (phase, _) = watch::channel(CyclePhase::Idle);
        SyncCoordinator {
            inner: Arc::new(Inner {
                runner,
                permit: Arc::new(Semaphore::new(1)),
                rerun: AtomicBool::new(false),
                phase,
                observers: Mutex::new(Vec::new()),
                cancel: Mutex::new(CancellationToken::new()),
                db,
                last_report: Mutex::new(None),
            }),
        }
    }

    /// Start a cycle on a background task, or coalesce into the running one.
    ///
    /// Outside a tokio runtime nothing runs and the coordinator stays Idle.
    pub fn trigger_cycle(&self, reason: TriggerReason) -> TriggerOutcome {
        match Arc::clone(&self.inner.permit).try_acquire_owned() {
            Ok(permit) => {
                info!(%reason, "sync triggered");
                spawn_cycle(Arc::clone(&self.inner), permit);
                TriggerOutcome::Started
            }
            Err(_) => {
                self.inner.rerun.store(true, Ordering::SeqCst);
                debug!(%reason, "sync already running, coalesced");
                TriggerOutcome::Coalesced
            }
        }
    }

    /// Run a cycle on the caller's task and return its report.
    ///
    /// Fails with [`SyncError::CycleInProgress`] if a cycle is running; the
    /// request is then coalesced into it like a trigger.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let permit = match Arc::clone(&self.inner.permit).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.inner.rerun.store(true, Ordering::SeqCst);
                return Err(SyncError::CycleInProgress);
            }
        };
        info!(reason = %TriggerReason::Manual, "sync started");
        let cancel = self.inner.begin();
        let guard = CycleGuard::new(Arc::clone(&self.inner), permit);
        let report = self.inner.execute(cancel).await;
        drop(guard);
        Ok(report)
    }

    /// Cancel the running cycle between records and drop any pending rerun.
    pub fn cancel(&self) {
        self.inner.rerun.store(false, Ordering::SeqCst);
        self.inner.cancel.lock().unwrap_or_else(|e| e.into_inner()).cancel();
    }

    /// Manually retry a Failed record: reset its retry budget and trigger a cycle.
    pub fn retry(&self, entity_type: EntityType, local_id: &str) -> Result<(SyncRecord, TriggerOutcome)> {
        let record = lock(&self.inner.db).reset_retry(entity_type, local_id)?;
        info!(record = %record.key(), "manual retry");
        Ok((record, self.trigger_cycle(TriggerReason::Manual)))
    }

    pub fn phase(&self) -> CyclePhase {
        *self.inner.phase.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.inner.permit.available_permits() == 0
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<CyclePhase> {
        self.inner.phase.subscribe()
    }

    /// Wait until no cycle is running or pending.
    pub async fn wait_idle(&self) {
        let mut phase = self.subscribe_phase();
        loop {
            if *phase.borrow_and_update() == CyclePhase::Idle {
                return;
            }
            if phase.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn add_observer<O: CycleObserver + 'static>(&self, observer: O) {
        self.inner
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(observer));
    }

    /// Report of the most recent finished cycle.
    pub fn last_report(&self) -> Option<CycleReport> {
        self.inner.last_report.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
