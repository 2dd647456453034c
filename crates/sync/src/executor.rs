// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Sync executor: runs one pass per entity type.
//!
//! A pass pulls remote changes newer than the ledger's watermark, then
//! walks every record that was touched by the pull or is not Clean,
//! resolves it against the last synced pair and carries out the result.
//!
//! ```text
//!   pull ──► ledger (note versions) ──► resolve ──► apply ──► commit
//!                                          │                    │
//!                                   RetryScheduler        ChangeFeed
//! ```
//!
//! Failures stay with their record: the ledger marks it Failed with a
//! backoff and the pass moves on. Cancellation is honoured between records,
//! never inside one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stint_core::{
    resolve, Action, CleanOutcome, ClockSource, Database, Effect, EntityRef, EntitySnapshot,
    EntityType, JitterSource, RandomJitter, RetryScheduler, SyncRecord, SyncState, SystemClock,
    Version,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{LocalError, RemoteError, SyncError};
use crate::feed::{ChangeEvent, ChangeFeed, ChangeKind};
use crate::report::{CycleReport, PassReport};
use crate::store::{lock, BoxFuture, LocalStore, RemoteResult, RemoteStore, SharedDb};

/// Tunables for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on any single remote call.
    pub request_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig { request_timeout: Duration::from_secs(30) }
    }
}

/// Something that can run a whole sync cycle. The coordinator drives one.
pub trait CycleRunner: Send + Sync + 'static {
    fn run_cycle<'a>(&'a self, cancel: &'a CancellationToken) -> BoxFuture<'a, CycleReport>;
}

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Unchanged,
    Pushed,
    Pulled,
    Deferred,
    Failed,
    /// A concurrent local edit got there first; picked up next cycle.
    Raced,
}

pub struct SyncExecutor<L, R, C = SystemClock, J = RandomJitter>
where
    L: LocalStore,
    R: RemoteStore,
    C: ClockSource,
    J: JitterSource,
{
    db: SharedDb,
    local: L,
    remote: R,
    scheduler: RetryScheduler<J>,
    clock: C,
    feed: Arc<ChangeFeed>,
    config: ExecutorConfig,
}

impl<L, R> SyncExecutor<L, R, SystemClock, RandomJitter>
where
    L: LocalStore,
    R: RemoteStore,
{
    pub fn new(db: SharedDb, local: L, remote: R, scheduler: RetryScheduler) -> Self {
        Self::with_clock(db, local, remote, scheduler, SystemClock)
    }
}

impl<L, R, C, J> SyncExecutor<L, R, C, J>
where
    L: LocalStore,
    R: RemoteStore,
    C: ClockSource,
    J: JitterSource,
{
    pub fn with_clock(
        db: SharedDb,
        local: L,
        remote: R,
        scheduler: RetryScheduler<J>,
        clock: C,
    ) -> Self {
        SyncExecutor {
            db,
            local,
            remote,
            scheduler,
            clock,
            feed: Arc::new(ChangeFeed::new()),
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_feed(mut self, feed: Arc<ChangeFeed>) -> Self {
        self.feed = feed;
        self
    }

    pub fn feed(&self) -> &Arc<ChangeFeed> {
        &self.feed
    }

    pub fn scheduler(&self) -> &RetryScheduler<J> {
        &self.scheduler
    }

    fn with_db<T>(
        &self,
        f: impl FnOnce(&mut Database) -> stint_core::Result<T>,
    ) -> stint_core::Result<T> {
        let mut db = lock(&self.db);
        f(&mut db)
    }

    /// Wraps a remote call in the request timeout.
    async fn call<T>(&self, request: BoxFuture<'_, RemoteResult<T>>) -> RemoteResult<T> {
        match tokio::time::timeout(self.config.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        }
    }

    fn publish(&self, record: &SyncRecord, kind: ChangeKind) {
        self.feed.publish(&ChangeEvent::new(record.entity_type, record.local_id.clone(), kind));
    }

    /// Run one pass per entity type, in dependency order.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::new(Utc::now());
        for &entity_type in EntityType::sync_order() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let pass = self.run_pass(entity_type, cancel).await;
            report.add_pass(pass);
        }
        if cancel.is_cancelled() {
            report.cancelled = true;
        }
        report.finished_at = Utc::now();
        info!(
            pushed = report.pushed,
            pulled = report.pulled,
            conflicts = report.conflicts_resolved,
            failed = report.failed,
            deferred = report.deferred,
            cancelled = report.cancelled,
            "sync cycle finished"
        );
        report
    }

    /// Sync one entity type.
    pub async fn run_pass(&self, entity_type: EntityType, cancel: &CancellationToken) -> PassReport {
        let mut report = PassReport::new(entity_type);

        let pulled = match self.pull(entity_type).await {
            Ok(pulled) => pulled,
            Err(e) => {
                warn!(%entity_type, error = %e, "pull failed, skipping pass");
                report.errors.push(format!("pull {entity_type}: {e}"));
                return report;
            }
        };

        let records = match self.with_db(|db| db.records(entity_type)) {
            Ok(records) => records,
            Err(e) => {
                report.errors.push(format!("read ledger {entity_type}: {e}"));
                return report;
            }
        };

        let now_ms = self.clock.now_ms();
        for record in records {
            let touched = pulled.contains_key(&record.key());
            if !touched && record.state == SyncState::Clean {
                continue;
            }
            if !self.scheduler.is_eligible(&record, now_ms) {
                report.skipped += 1;
                continue;
            }
            if cancel.is_cancelled() {
                debug!(%entity_type, "pass cancelled");
                break;
            }

            let key = record.key();
            match self.sync_record(record, pulled.get(&key)).await {
                Ok((outcome, conflict)) => {
                    match outcome {
                        Outcome::Pushed => report.pushed += 1,
                        Outcome::Pulled => report.pulled += 1,
                        Outcome::Deferred => report.deferred += 1,
                        Outcome::Failed => report.failed += 1,
                        Outcome::Raced => report.skipped += 1,
                        Outcome::Unchanged => {}
                    }
                    if conflict && matches!(outcome, Outcome::Pushed | Outcome::Pulled) {
                        report.conflicts_resolved += 1;
                    }
                }
                Err(e) => {
                    warn!(record = %key, error = %e, "ledger error");
                    report.errors.push(format!("{key}: {e}"));
                }
            }
        }

        report
    }

    /// Fetch remote changes and note them in the ledger. Returns the pulled
    /// snapshots keyed by the local record key.
    async fn pull(
        &self,
        entity_type: EntityType,
    ) -> Result<HashMap<String, EntitySnapshot>, SyncError> {
        let watermark = self.with_db(|db| db.watermark(entity_type))?;
        let changes =
            self.call(self.remote.fetch_modified_since(entity_type, watermark)).await?;

        let newest = changes.iter().map(|s| s.version).max();
        let mut pulled = HashMap::new();
        for snapshot in changes {
            let noted = self.with_db(|db| note_pulled(db, &snapshot))?;
            if let Some(record) = noted {
                pulled.insert(record.key(), snapshot);
            }
        }
        if let Some(newest) = newest {
            self.with_db(|db| db.advance_watermark(entity_type, newest))?;
            debug!(%entity_type, count = pulled.len(), watermark = %newest, "pulled remote changes");
        }
        Ok(pulled)
    }

    /// Bring one record to convergence. Returns the outcome and whether it
    /// was a conflict.
    async fn sync_record(
        &self,
        record: SyncRecord,
        pulled: Option<&EntitySnapshot>,
    ) -> Result<(Outcome, bool), SyncError> {
        let (local, stored) = match self.local_view(&record) {
            Ok(view) => view,
            Err(LocalError::Corrupt(msg)) => {
                warn!(record = %record.key(), error = %msg, "local data corrupted");
                let max = self.scheduler.policy().max_attempts;
                let message = format!("corrupted local data: {msg}");
                let result = self.with_db(|db| db.mark_unrecoverable(&record, &message, max));
                return self.settle(result, Outcome::Failed);
            }
            Err(e) => return Ok((self.fail(&record, &e.to_string())?, false)),
        };

        let remote = match self.remote_view(&record, local.as_ref(), pulled).await {
            Ok(remote) => remote,
            Err(e) => return Ok((self.fail(&record, &e.to_string())?, false)),
        };

        let action = resolve(local.as_ref(), remote.as_ref(), &record.last_synced);
        debug!(record = %record.key(), ?action, "resolved");

        let record = match action {
            Action::Conflict(conflict) => {
                info!(
                    record = %record.key(),
                    local = %conflict.local_version,
                    remote = %conflict.remote_version,
                    winner = %conflict.winner,
                    "conflict"
                );
                match self.with_db(|db| db.mark_conflict(&record, &conflict)) {
                    Ok(record) => record,
                    Err(e) if e.is_stale() => return Ok((Outcome::Raced, false)),
                    Err(e) => return Err(e.into()),
                }
            }
            _ => record,
        };

        let outcome = match (action, action.effect()) {
            (Action::Noop, _) => self.commit_noop(&record, remote.as_ref())?,
            (Action::PurgeTombstone, _) => {
                self.purge(&record, ChangeKind::Purged, Outcome::Unchanged)?
            }
            (_, Some(Effect::ApplyRemote)) => {
                self.apply_remote(&record, remote.as_ref(), stored)?
            }
            (_, Some(Effect::DeleteLocal)) => self.delete_local(&record, stored)?,
            (_, Some(Effect::PushLocal)) => self.push_local(&record, local.as_ref()).await?,
            (_, Some(Effect::DeleteRemote)) => self.delete_remote(&record).await?,
            (_, None) => Outcome::Unchanged,
        };
        Ok((outcome, action.is_conflict()))
    }

    /// Maps a ledger write to an outcome, treating a stale write as a race.
    fn settle<T>(
        &self,
        result: stint_core::Result<T>,
        outcome: Outcome,
    ) -> Result<(Outcome, bool), SyncError> {
        match result {
            Ok(_) => Ok((outcome, false)),
            Err(e) if e.is_stale() => Ok((Outcome::Raced, false)),
            Err(e) => Err(e.into()),
        }
    }

    /// The local side as the resolver sees it, and the version of the stored
    /// row that local writes for this record are conditional on. The
    /// ledger's version is authoritative; a tombstone record is a deleted
    /// snapshot.
    fn local_view(
        &self,
        record: &SyncRecord,
    ) -> Result<(Option<EntitySnapshot>, Option<Version>), LocalError> {
        if record.tombstone {
            let tombstone = EntitySnapshot::tombstone(
                record.entity_type,
                record.local_id.clone(),
                record.local_version,
            );
            return Ok((Some(tombstone), None));
        }
        let stored = self.local.read(record.entity_type, &record.local_id)?;
        let stored_version = stored.as_ref().map(|s| s.version);
        let view = stored.map(|snapshot| EntitySnapshot { version: record.local_version, ..snapshot });
        Ok((view, stored_version))
    }

    /// The remote side as the resolver sees it. Re-reads the entity when the
    /// remote moved on or the local row needs restoring; otherwise the last
    /// known version stands in.
    async fn remote_view(
        &self,
        record: &SyncRecord,
        local: Option<&EntitySnapshot>,
        pulled: Option<&EntitySnapshot>,
    ) -> RemoteResult<Option<EntitySnapshot>> {
        if let Some(snapshot) = pulled {
            return Ok(Some(snapshot.clone()));
        }
        let Some(remote_id) = &record.remote_id else {
            return Ok(None);
        };
        match record.remote_version {
            Some(version) if !record.remote_changed() && local.is_some() => {
                let stub = EntitySnapshot::new(
                    record.entity_type,
                    remote_id.clone(),
                    version,
                    serde_json::Value::Null,
                );
                Ok(Some(stub))
            }
            _ => self.call(self.remote.fetch(record.entity_type, remote_id)).await,
        }
    }

    /// Record a failed attempt with the scheduler's backoff.
    fn fail(&self, record: &SyncRecord, error: &str) -> Result<Outcome, SyncError> {
        let now_ms = self.clock.now_ms();
        let attempted = SyncRecord { retry_count: record.retry_count + 1, ..record.clone() };
        let next = self
            .scheduler
            .should_retry(&attempted)
            .then(|| self.scheduler.next_eligible_time(record, now_ms));
        if next.is_none() {
            warn!(record = %record.key(), error, "giving up after {} attempts", attempted.retry_count);
        } else {
            warn!(record = %record.key(), error, attempt = attempted.retry_count, "sync failed");
        }
        match self.with_db(|db| db.mark_failed(record, error, next)) {
            Ok(_) => Ok(Outcome::Failed),
            Err(e) if e.is_stale() => Ok(Outcome::Raced),
            Err(e) => Err(e.into()),
        }
    }

    fn fail_remote(&self, record: &SyncRecord, err: &RemoteError) -> Result<Outcome, SyncError> {
        self.fail(record, &err.to_string())
    }

    /// Both sides already agree; settle the record.
    fn commit_noop(
        &self,
        record: &SyncRecord,
        remote: Option<&EntitySnapshot>,
    ) -> Result<Outcome, SyncError> {
        if record.state == SyncState::Clean {
            return Ok(Outcome::Unchanged);
        }
        let Some(remote) = remote else {
            return Ok(Outcome::Unchanged);
        };
        let result =
            self.with_db(|db| db.mark_clean(record, record.local_version, remote.version, None));
        Ok(self.settle(result, Outcome::Unchanged)?.0)
    }

    fn apply_remote(
        &self,
        record: &SyncRecord,
        remote: Option<&EntitySnapshot>,
        stored: Option<Version>,
    ) -> Result<Outcome, SyncError> {
        let Some(remote) = remote.and_then(EntitySnapshot::live) else {
            return self.fail(record, "remote state missing for apply");
        };

        let refs = match self.with_db(|db| refs_to_local(db, &remote.refs)) {
            Ok(Some(refs)) => refs,
            Ok(None) => {
                debug!(record = %record.key(), "deferred: references not pulled yet");
                return Ok(Outcome::Deferred);
            }
            Err(e) => return Err(e.into()),
        };

        // never overwrite an edit made since the record was read
        let current = self.with_db(|db| db.record(record.entity_type, &record.local_id))?;
        if current.map(|c| c.revision) != Some(record.revision) {
            return Ok(Outcome::Raced);
        }

        let local_version = record.local_version.max(remote.version);
        let snapshot = EntitySnapshot {
            entity_type: record.entity_type,
            id: record.local_id.clone(),
            version: local_version,
            deleted: false,
            fields: remote.fields.clone(),
            refs,
        };
        match self.local.write(&snapshot, stored) {
            Ok(true) => {}
            Ok(false) => {
                debug!(record = %record.key(), "edited during apply, will resolve again");
                return Ok(Outcome::Raced);
            }
            Err(e) => return self.fail(record, &e.to_string()),
        }

        match self.with_db(|db| db.mark_clean(record, local_version, remote.version, None)) {
            Ok(_) => {
                self.publish(record, ChangeKind::Updated);
                Ok(Outcome::Pulled)
            }
            Err(e) if e.is_stale() => Ok(Outcome::Raced),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_local(
        &self,
        record: &SyncRecord,
        stored: Option<Version>,
    ) -> Result<Outcome, SyncError> {
        let current = self.with_db(|db| db.record(record.entity_type, &record.local_id))?;
        if current.map(|c| c.revision) != Some(record.revision) {
            return Ok(Outcome::Raced);
        }
        match self.local.delete(record.entity_type, &record.local_id, stored) {
            Ok(true) => {}
            Ok(false) => {
                debug!(record = %record.key(), "edited during delete, will resolve again");
                return Ok(Outcome::Raced);
            }
            Err(e) => return self.fail(record, &e.to_string()),
        }
        self.publish(record, ChangeKind::Deleted);
        self.purge(record, ChangeKind::Purged, Outcome::Pulled)
    }

    async fn push_local(
        &self,
        record: &SyncRecord,
        local: Option<&EntitySnapshot>,
    ) -> Result<Outcome, SyncError> {
        let Some(local) = local.and_then(EntitySnapshot::live) else {
            return self.fail(record, "local state missing for push");
        };

        let refs = match self.with_db(|db| refs_to_remote(db, &local.refs))? {
            RefTranslation::Ready(refs) => refs,
            RefTranslation::Pending(reference) => {
                debug!(record = %record.key(), %reference, "deferred: reference not synced yet");
                return Ok(Outcome::Deferred);
            }
            RefTranslation::Missing(reference) => {
                return self.fail(record, &format!("reference {reference} is not tracked"));
            }
        };

        let outgoing = EntitySnapshot { refs, ..local.clone() };
        let result = match &record.remote_id {
            None => self.call(self.remote.create(outgoing)).await,
            Some(remote_id) => {
                self.call(self.remote.update(EntitySnapshot { id: remote_id.clone(), ..outgoing }))
                    .await
            }
        };
        let stored = match result {
            Ok(stored) => stored,
            Err(e) => return self.fail_remote(record, &e),
        };

        let outcome = self.with_db(|db| {
            db.mark_clean(record, record.local_version, stored.version, Some(&stored.id))
        });
        match outcome {
            Ok(CleanOutcome::Committed(_)) => {}
            Ok(CleanOutcome::Superseded(_)) => {
                debug!(record = %record.key(), "edited during push, will push again");
            }
            Err(e) if e.is_stale() => return Ok(Outcome::Raced),
            Err(e) => return Err(e.into()),
        }
        self.publish(record, ChangeKind::Pushed);
        Ok(Outcome::Pushed)
    }

    async fn delete_remote(&self, record: &SyncRecord) -> Result<Outcome, SyncError> {
        let Some(remote_id) = &record.remote_id else {
            return self.purge(record, ChangeKind::Purged, Outcome::Unchanged);
        };
        let tombstone =
            EntitySnapshot::tombstone(record.entity_type, remote_id.clone(), record.local_version);
        match self.call(self.remote.delete(tombstone)).await {
            Ok(_) | Err(RemoteError::NotFound(_)) => {}
            Err(e) => return self.fail_remote(record, &e),
        }
        self.publish(record, ChangeKind::Pushed);
        self.purge(record, ChangeKind::Purged, Outcome::Pushed)
    }

    fn purge(
        &self,
        record: &SyncRecord,
        kind: ChangeKind,
        outcome: Outcome,
    ) -> Result<Outcome, SyncError> {
        match self.with_db(|db| db.purge(record)) {
            Ok(()) => {
                self.publish(record, kind);
                Ok(outcome)
            }
            Err(e) if e.is_stale() => Ok(Outcome::Raced),
            Err(e) => Err(e.into()),
        }
    }
}

impl<L, R, C, J> CycleRunner for SyncExecutor<L, R, C, J>
where
    L: LocalStore + 'static,
    R: RemoteStore + 'static,
    C: ClockSource + 'static,
    J: JitterSource + 'static,
{
    fn run_cycle<'a>(&'a self, cancel: &'a CancellationToken) -> BoxFuture<'a, CycleReport> {
        Box::pin(SyncExecutor::run_cycle(self, cancel))
    }
}

/// Ledger side of one pulled snapshot. Returns the record it belongs to, or
/// `None` for tombstones of entities this device never had.
fn note_pulled(db: &mut Database, snapshot: &EntitySnapshot) -> stint_core::Result<Option<SyncRecord>> {
    let entity_type = snapshot.entity_type;
    // one retry covers a local edit landing between read and write
    for _ in 0..2 {
        let result = match db.find_by_remote_id(entity_type, &snapshot.id)? {
            Some(record) if record.remote_version == Some(snapshot.version) => Ok(record),
            Some(record) => db.note_remote_change(&record, snapshot.version),
            None if snapshot.deleted => return Ok(None),
            None => {
                let local_id = db.local_id_for_remote(entity_type, &snapshot.id)?;
                db.insert_pulled(entity_type, &local_id, &snapshot.id, snapshot.version)
            }
        };
        match result {
            Ok(record) => return Ok(Some(record)),
            Err(e) if e.is_stale() => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(db.find_by_remote_id(entity_type, &snapshot.id)?)
}

/// Local form of remote refs. `None` when a referenced entity has not been
/// applied locally yet.
fn refs_to_local(db: &Database, refs: &[EntityRef]) -> stint_core::Result<Option<Vec<EntityRef>>> {
    let mut local = Vec::with_capacity(refs.len());
    for reference in refs {
        match db.find_by_remote_id(reference.entity_type, &reference.id)? {
            Some(record) if record.local_version != Version::min() => {
                local.push(EntityRef::new(reference.entity_type, record.local_id));
            }
            _ => return Ok(None),
        }
    }
    Ok(Some(local))
}

enum RefTranslation {
    Ready(Vec<EntityRef>),
    /// The referenced entity exists but is not on the remote in its current form.
    Pending(EntityRef),
    /// Nothing tracks the referenced entity.
    Missing(EntityRef),
}

/// Remote form of local refs. Every referenced record must be Clean with a
/// remote id.
fn refs_to_remote(db: &Database, refs: &[EntityRef]) -> stint_core::Result<RefTranslation> {
    let mut remote = Vec::with_capacity(refs.len());
    for reference in refs {
        match db.record(reference.entity_type, &reference.id)? {
            None => return Ok(RefTranslation::Missing(reference.clone())),
            Some(SyncRecord { remote_id: Some(remote_id), state: SyncState::Clean, .. }) => {
                remote.push(EntityRef::new(reference.entity_type, remote_id));
            }
            Some(_) => return Ok(RefTranslation::Pending(reference.clone())),
        }
    }
    Ok(RefTranslation::Ready(remote))
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
