// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Store abstractions the executor syncs between.
//!
//! The local store is synchronous (an embedded database). The remote store
//! is async and may fail with any [`RemoteError`]; tests substitute a mock.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use stint_core::{Database, EntitySnapshot, EntityType, Version};

use crate::error::{LocalError, RemoteError};

/// Boxed future returned by [`RemoteStore`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type for remote operations.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Database handle shared by the executor, the local store and local edits.
///
/// Only locked inside synchronous sections, never across an `.await`.
pub type SharedDb = Arc<Mutex<Database>>;

/// Wrap a database for sharing.
pub fn shared(db: Database) -> SharedDb {
    Arc::new(Mutex::new(db))
}

/// Lock a shared database, recovering from poisoning.
pub fn lock(db: &SharedDb) -> MutexGuard<'_, Database> {
    db.lock().unwrap_or_else(|e| e.into_inner())
}

/// The device's own copy of the data.
///
/// Snapshots use local ids, both for the entity and its refs.
pub trait LocalStore: Send + Sync {
    fn read(&self, entity_type: EntityType, id: &str)
        -> Result<Option<EntitySnapshot>, LocalError>;

    /// Write `snapshot` unless the stored row moved on from `expected`
    /// (`None`: no row). Returns false, writing nothing, when a local edit
    /// got there first.
    fn write(&self, snapshot: &EntitySnapshot, expected: Option<Version>)
        -> Result<bool, LocalError>;

    /// Delete the row unless it moved on from `expected`. Returns false,
    /// deleting nothing, when a local edit got there first.
    fn delete(
        &self,
        entity_type: EntityType,
        id: &str,
        expected: Option<Version>,
    ) -> Result<bool, LocalError>;

    fn list_modified_since(
        &self,
        entity_type: EntityType,
        since: Option<Version>,
    ) -> Result<Vec<EntitySnapshot>, LocalError>;
}

/// The authoritative shared copy.
///
/// Snapshots use remote ids, both for the entity and its refs. Deleted
/// entities are reported as tombstone snapshots.
pub trait RemoteStore: Send + Sync {
    /// Everything of one type changed after `since` (everything when `None`),
    /// tombstones included.
    fn fetch_modified_since(
        &self,
        entity_type: EntityType,
        since: Option<Version>,
    ) -> BoxFuture<'_, RemoteResult<Vec<EntitySnapshot>>>;

    /// Current state of one entity, or `None` if the remote never had it.
    fn fetch(
        &self,
        entity_type: EntityType,
        remote_id: &str,
    ) -> BoxFuture<'_, RemoteResult<Option<EntitySnapshot>>>;

    /// Create an entity. The remote assigns the id, returned in the snapshot.
    fn create(&self, snapshot: EntitySnapshot) -> BoxFuture<'_, RemoteResult<EntitySnapshot>>;

    /// Overwrite an entity. `snapshot.id` is the remote id.
    fn update(&self, snapshot: EntitySnapshot) -> BoxFuture<'_, RemoteResult<EntitySnapshot>>;

    /// Delete an entity. `snapshot` is a tombstone carrying the remote id and
    /// the version of the deletion.
    fn delete(&self, snapshot: EntitySnapshot) -> BoxFuture<'_, RemoteResult<EntitySnapshot>>;
}

impl<T: LocalStore + ?Sized> LocalStore for Arc<T> {
    fn read(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<Option<EntitySnapshot>, LocalError> {
        (**self).read(entity_type, id)
    }

    fn write(
        &self,
        snapshot: &EntitySnapshot,
        expected: Option<Version>,
    ) -> Result<bool, LocalError> {
        (**self).write(snapshot, expected)
    }

    fn delete(
        &self,
        entity_type: EntityType,
        id: &str,
        expected: Option<Version>,
    ) -> Result<bool, LocalError> {
        (**self).delete(entity_type, id, expected)
    }

    fn list_modified_since(
        &self,
        entity_type: EntityType,
        since: Option<Version>,
    ) -> Result<Vec<EntitySnapshot>, LocalError> {
        (**self).list_modified_since(entity_type, since)
    }
}

impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    fn fetch_modified_since(
        &self,
        entity_type: EntityType,
        since: Option<Version>,
    ) -> BoxFuture<'_, RemoteResult<Vec<EntitySnapshot>>> {
        (**self).fetch_modified_since(entity_type, since)
    }

    fn fetch(
        &self,
        entity_type: EntityType,
        remote_id: &str,
    ) -> BoxFuture<'_, RemoteResult<Option<EntitySnapshot>>> {
        (**self).fetch(entity_type, remote_id)
    }

    fn create(&self, snapshot: EntitySnapshot) -> BoxFuture<'_, RemoteResult<EntitySnapshot>> {
        (**self).create(snapshot)
    }

    fn update(&self, snapshot: EntitySnapshot) -> BoxFuture<'_, RemoteResult<EntitySnapshot>> {
        (**self).update(snapshot)
    }

    fn delete(&self, snapshot: EntitySnapshot) -> BoxFuture<'_, RemoteResult<EntitySnapshot>> {
        (**self).delete(snapshot)
    }
}

/// Local store backed by the `entities` table of the shared database.
#[derive(Clone)]
pub struct SqliteLocalStore {
    db: SharedDb,
}

impl SqliteLocalStore {
    pub fn new(db: SharedDb) -> Self {
        SqliteLocalStore { db }
    }
}

impl LocalStore for SqliteLocalStore {
    fn read(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<Option<EntitySnapshot>, LocalError> {
        Ok(lock(&self.db).get_entity(entity_type, id)?)
    }

    fn write(
        &self,
        snapshot: &EntitySnapshot,
        expected: Option<Version>,
    ) -> Result<bool, LocalError> {
        Ok(lock(&self.db).put_entity_if(snapshot, expected)?)
    }

    fn delete(
        &self,
        entity_type: EntityType,
        id: &str,
        expected: Option<Version>,
    ) -> Result<bool, LocalError> {
        Ok(lock(&self.db).remove_entity_if(entity_type, id, expected)?)
    }

    fn list_modified_since(
        &self,
        entity_type: EntityType,
        since: Option<Version>,
    ) -> Result<Vec<EntitySnapshot>, LocalError> {
        Ok(lock(&self.db).entities_modified_since(entity_type, since)?)
    }
}
