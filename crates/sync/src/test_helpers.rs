// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for sync tests.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use stint_core::{
    Database, EntityRef, EntitySnapshot, EntityType, ManualClock, NoJitter, RetryPolicy,
    RetryScheduler, SyncRecord, Version,
};
use tokio_util::sync::CancellationToken;

use crate::error::{LocalError, RemoteError};
use crate::executor::{ExecutorConfig, SyncExecutor};
use crate::remote::SharedRemote;
use crate::report::CycleReport;
use crate::store::{
    lock, shared, BoxFuture, LocalStore, RemoteResult, RemoteStore, SharedDb, SqliteLocalStore,
};

/// Wall clock the harness starts at.
pub const START_MS: u64 = 1_000_000;

/// Longer than any backoff the test policy produces.
pub const PAST_BACKOFF_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    FetchSince,
    Fetch,
    Create,
    Update,
    Delete,
}

/// Remote store wrapper that counts calls and injects failures and latency.
///
/// The data lives in an in-memory [`SharedRemote`] so behaviour matches the
/// real thing.
pub struct MockRemote {
    inner: SharedRemote,
    failures: Mutex<HashMap<Op, VecDeque<RemoteError>>>,
    calls: Mutex<HashMap<Op, usize>>,
    delay: Mutex<Option<Duration>>,
}

impl MockRemote {
    pub fn new() -> Self {
        MockRemote {
            inner: SharedRemote::open_in_memory().unwrap(),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
        }
    }

    /// Fail the next `times` calls of `op` with `err`.
    pub fn fail(&self, op: Op, err: RemoteError, times: usize) {
        let mut failures = self.failures.lock().unwrap();
        let queue = failures.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(err.clone());
        }
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn calls(&self, op: Op) -> usize {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    /// Every call sleeps this long before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Direct access to the stored data, bypassing counters and failures.
    pub fn inner(&self) -> &SharedRemote {
        &self.inner
    }

    fn begin(&self, op: Op) -> (Option<Duration>, Option<RemoteError>) {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;
        let failure = self.failures.lock().unwrap().get_mut(&op).and_then(VecDeque::pop_front);
        (*self.delay.lock().unwrap(), failure)
    }

    fn respond<'a, T: Send + 'a>(
        &'a self,
        op: Op,
        request: BoxFuture<'a, RemoteResult<T>>,
    ) -> BoxFuture<'a, RemoteResult<T>> {
        let (delay, failure) = self.begin(op);
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match failure {
                Some(err) => Err(err),
                None => request.await,
            }
        })
    }
}

impl RemoteStore for MockRemote {
    fn fetch_modified_since(
        &self,
        entity_type: EntityType,
        since: Option<Version>,
    ) -> BoxFuture<'_, RemoteResult<Vec<EntitySnapshot>>> {
        self.respond(Op::FetchSince, self.inner.fetch_modified_since(entity_type, since))
    }

    fn fetch(
        &self,
        entity_type: EntityType,
        remote_id: &str,
    ) -> BoxFuture<'_, RemoteResult<Option<EntitySnapshot>>> {
        self.respond(Op::Fetch, self.inner.fetch(entity_type, remote_id))
    }

    fn create(&self, snapshot: EntitySnapshot) -> BoxFuture<'_, RemoteResult<EntitySnapshot>> {
        self.respond(Op::Create, self.inner.create(snapshot))
    }

    fn update(&self, snapshot: EntitySnapshot) -> BoxFuture<'_, RemoteResult<EntitySnapshot>> {
        self.respond(Op::Update, self.inner.update(snapshot))
    }

    fn delete(&self, snapshot: EntitySnapshot) -> BoxFuture<'_, RemoteResult<EntitySnapshot>> {
        self.respond(Op::Delete, self.inner.delete(snapshot))
    }
}

/// Local store that can slip a user edit in right before the executor's
/// next write or delete, as if the user saved while a cycle was running.
pub struct InterleavedLocal {
    inner: SqliteLocalStore,
    db: SharedDb,
    edit: Mutex<Option<EntitySnapshot>>,
}

impl InterleavedLocal {
    pub fn new(db: SharedDb) -> Self {
        InterleavedLocal { inner: SqliteLocalStore::new(Arc::clone(&db)), db, edit: Mutex::new(None) }
    }

    /// Save `snapshot` through the ledger just before the next write or delete.
    pub fn edit_before_next_write(&self, snapshot: EntitySnapshot) {
        *self.edit.lock().unwrap() = Some(snapshot);
    }

    fn interleave(&self) {
        if let Some(edit) = self.edit.lock().unwrap().take() {
            lock(&self.db).save_entity(&edit).unwrap();
        }
    }
}

impl LocalStore for InterleavedLocal {
    fn read(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<Option<EntitySnapshot>, LocalError> {
        self.inner.read(entity_type, id)
    }

    fn write(
        &self,
        snapshot: &EntitySnapshot,
        expected: Option<Version>,
    ) -> Result<bool, LocalError> {
        self.interleave();
        self.inner.write(snapshot, expected)
    }

    fn delete(
        &self,
        entity_type: EntityType,
        id: &str,
        expected: Option<Version>,
    ) -> Result<bool, LocalError> {
        self.interleave();
        self.inner.delete(entity_type, id, expected)
    }

    fn list_modified_since(
        &self,
        entity_type: EntityType,
        since: Option<Version>,
    ) -> Result<Vec<EntitySnapshot>, LocalError> {
        self.inner.list_modified_since(entity_type, since)
    }
}

pub type TestExecutor =
    SyncExecutor<Arc<InterleavedLocal>, Arc<MockRemote>, Arc<ManualClock>, NoJitter>;

/// Version on node 1 at the given wall time.
pub fn v(wall_ms: u64) -> Version {
    Version::new(wall_ms, 0, 1)
}

/// Version written by another device.
pub fn other(wall_ms: u64) -> Version {
    Version::new(wall_ms, 0, 2)
}

pub fn test_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(15 * 60),
        jitter: 0.2,
    }
}

/// One device: a local database, a manual clock and an executor syncing
/// against a (possibly shared) mock remote.
pub struct Harness {
    pub db: SharedDb,
    pub local: Arc<InterleavedLocal>,
    pub remote: Arc<MockRemote>,
    pub clock: Arc<ManualClock>,
    pub executor: TestExecutor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_remote(Arc::new(MockRemote::new()))
    }

    pub fn with_remote(remote: Arc<MockRemote>) -> Self {
        Self::build(remote, ExecutorConfig::default())
    }

    pub fn build(remote: Arc<MockRemote>, config: ExecutorConfig) -> Self {
        let db = shared(Database::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(START_MS));
        let local = Arc::new(InterleavedLocal::new(Arc::clone(&db)));
        let executor = SyncExecutor::with_clock(
            Arc::clone(&db),
            Arc::clone(&local),
            Arc::clone(&remote),
            RetryScheduler::with_jitter(test_policy(), NoJitter),
            Arc::clone(&clock),
        )
        .with_config(config);
        Harness { db, local, remote, clock, executor }
    }

    pub async fn cycle(&self) -> CycleReport {
        self.executor.run_cycle(&CancellationToken::new()).await
    }

    /// Runs a cycle after moving the clock past any backoff.
    pub async fn cycle_later(&self) -> CycleReport {
        self.clock.advance(PAST_BACKOFF_MS);
        self.cycle().await
    }

    pub fn save(&self, entity_type: EntityType, id: &str, version: Version, fields: Value) -> SyncRecord {
        self.save_with_refs(entity_type, id, version, fields, Vec::new())
    }

    pub fn save_with_refs(
        &self,
        entity_type: EntityType,
        id: &str,
        version: Version,
        fields: Value,
        refs: Vec<EntityRef>,
    ) -> SyncRecord {
        let snapshot = EntitySnapshot::new(entity_type, id, version, fields).with_refs(refs);
        lock(&self.db).save_entity(&snapshot).unwrap()
    }

    pub fn delete(&self, entity_type: EntityType, id: &str, version: Version) -> Option<SyncRecord> {
        lock(&self.db).delete_entity(entity_type, id, version).unwrap()
    }

    pub fn entity(&self, entity_type: EntityType, id: &str) -> Option<EntitySnapshot> {
        lock(&self.db).get_entity(entity_type, id).unwrap()
    }

    pub fn record(&self, entity_type: EntityType, id: &str) -> Option<SyncRecord> {
        lock(&self.db).record(entity_type, id).unwrap()
    }

    pub fn record_for_remote(&self, entity_type: EntityType, remote_id: &str) -> Option<SyncRecord> {
        lock(&self.db).find_by_remote_id(entity_type, remote_id).unwrap()
    }

    pub fn remote_id(&self, entity_type: EntityType, id: &str) -> String {
        self.record(entity_type, id).unwrap().remote_id.unwrap()
    }

    /// What the remote currently holds for a local entity.
    pub async fn remote_copy(&self, entity_type: EntityType, id: &str) -> Option<EntitySnapshot> {
        let remote_id = self.remote_id(entity_type, id);
        self.remote.inner().fetch(entity_type, &remote_id).await.unwrap()
    }

    /// A write made by another device directly on the remote.
    pub async fn remote_update(
        &self,
        entity_type: EntityType,
        remote_id: &str,
        version: Version,
        fields: Value,
    ) -> EntitySnapshot {
        let snapshot = EntitySnapshot::new(entity_type, remote_id, version, fields);
        self.remote.inner().update(snapshot).await.unwrap()
    }
}
