// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! A remote store kept in a SQLite file on shared storage.
//!
//! Several devices can point at the same file (a network mount or a synced
//! folder). The remote assigns ids, stores the versions clients send, keeps
//! tombstones for deleted entities, and refuses writes older than what it
//! already holds.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use stint_core::{EntityRef, EntitySnapshot, EntityType, Version};
use tracing::debug;

use crate::error::RemoteError;
use crate::store::{BoxFuture, RemoteResult, RemoteStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS remote_entities (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    remote_id TEXT NOT NULL UNIQUE,
    entity_type TEXT NOT NULL,
    wall_ms INTEGER NOT NULL,
    counter INTEGER NOT NULL,
    node_id INTEGER NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    fields TEXT NOT NULL,
    refs TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_remote_version
    ON remote_entities(entity_type, wall_ms, counter, node_id);
"#;

pub struct SharedRemote {
    conn: Arc<Mutex<Connection>>,
}

fn unavailable(err: rusqlite::Error) -> RemoteError {
    RemoteError::Network(err.to_string())
}

fn to_sql(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// (remote_id, wall_ms, counter, node_id, deleted, fields, refs)
type StoredRow = (String, i64, i64, i64, bool, String, String);

fn snapshot_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?))
}

fn build_snapshot(entity_type: EntityType, row: StoredRow) -> RemoteResult<EntitySnapshot> {
    let (remote_id, wall_ms, counter, node_id, deleted, fields, refs) = row;
    let corrupt =
        |what: &str| RemoteError::Validation(format!("stored {what} for {remote_id} is unreadable"));
    let version = Version::new(
        u64::try_from(wall_ms).map_err(|_| corrupt("version"))?,
        u32::try_from(counter).map_err(|_| corrupt("version"))?,
        u32::try_from(node_id).map_err(|_| corrupt("version"))?,
    );
    if deleted {
        return Ok(EntitySnapshot::tombstone(entity_type, remote_id, version));
    }
    let fields = serde_json::from_str(&fields).map_err(|_| corrupt("fields"))?;
    let refs: Vec<EntityRef> = serde_json::from_str(&refs).map_err(|_| corrupt("refs"))?;
    Ok(EntitySnapshot::new(entity_type, remote_id, version, fields).with_refs(refs))
}

const SELECT: &str =
    "SELECT remote_id, wall_ms, counter, node_id, deleted, fields, refs FROM remote_entities";

impl SharedRemote {
    pub fn open(path: &Path) -> RemoteResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RemoteError::Network(format!("{}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path).map_err(unavailable)?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;").map_err(unavailable)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> RemoteResult<Self> {
        Self::init(Connection::open_in_memory().map_err(unavailable)?)
    }

    fn init(conn: Connection) -> RemoteResult<Self> {
        conn.execute_batch(SCHEMA).map_err(unavailable)?;
        Ok(SharedRemote { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Runs `f` on the blocking pool, so a caller's request timeout still
    /// fires while another device holds the file lock.
    async fn with_conn<T, F>(&self, f: F) -> RemoteResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> RemoteResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut conn)
        })
        .await
        .map_err(|e| RemoteError::Network(format!("remote task failed: {e}")))?
    }

    fn lookup(
        conn: &Connection,
        entity_type: EntityType,
        remote_id: &str,
    ) -> RemoteResult<Option<EntitySnapshot>> {
        conn.query_row(
            &format!("{SELECT} WHERE entity_type = ?1 AND remote_id = ?2"),
            params![entity_type.as_str(), remote_id],
            snapshot_from_row,
        )
        .optional()
        .map_err(unavailable)?
        .map(|row| build_snapshot(entity_type, row))
        .transpose()
    }

    /// Every ref must name a live entity held by this remote.
    fn check_refs(conn: &Connection, snapshot: &EntitySnapshot) -> RemoteResult<()> {
        if !snapshot.fields.is_object() {
            return Err(RemoteError::Validation(format!(
                "{} fields must be a JSON object",
                snapshot.entity_type
            )));
        }
        for reference in &snapshot.refs {
            match Self::lookup(conn, reference.entity_type, &reference.id)? {
                Some(target) if !target.deleted => {}
                _ => {
                    return Err(RemoteError::Validation(format!(
                        "{} references missing {reference}",
                        snapshot.entity_type
                    )))
                }
            }
        }
        Ok(())
    }

    fn store(conn: &Connection, snapshot: &EntitySnapshot) -> RemoteResult<()> {
        let fields = if snapshot.deleted { "{}".to_string() } else { snapshot.fields.to_string() };
        let refs = serde_json::to_string(&snapshot.refs)
            .map_err(|e| RemoteError::Validation(e.to_string()))?;
        conn.execute(
            "UPDATE remote_entities SET wall_ms = ?3, counter = ?4, node_id = ?5, deleted = ?6,
                 fields = ?7, refs = ?8
             WHERE entity_type = ?1 AND remote_id = ?2",
            params![
                snapshot.entity_type.as_str(),
                snapshot.id,
                to_sql(snapshot.version.wall_ms),
                snapshot.version.counter,
                snapshot.version.node_id,
                snapshot.deleted,
                fields,
                refs,
            ],
        )
        .map_err(unavailable)?;
        Ok(())
    }

    /// Current stored state for a write, refusing anything older.
    fn existing_for_write(
        conn: &Connection,
        snapshot: &EntitySnapshot,
    ) -> RemoteResult<EntitySnapshot> {
        let existing = Self::lookup(conn, snapshot.entity_type, &snapshot.id)?.ok_or_else(|| {
            RemoteError::NotFound(format!("{} {}", snapshot.entity_type, snapshot.id))
        })?;
        if snapshot.version < existing.version {
            return Err(RemoteError::Rejected(format!(
                "{} {} holds newer version {} than {}",
                snapshot.entity_type, snapshot.id, existing.version, snapshot.version
            )));
        }
        Ok(existing)
    }
}

impl RemoteStore for SharedRemote {
    fn fetch_modified_since(
        &self,
        entity_type: EntityType,
        since: Option<Version>,
    ) -> BoxFuture<'_, RemoteResult<Vec<EntitySnapshot>>> {
        Box::pin(async move {
            self.with_conn(move |conn| {
                let since = since.unwrap_or_else(Version::min);
                let mut stmt = conn
                    .prepare(&format!(
                        "{SELECT} WHERE entity_type = ?1 AND (wall_ms, counter, node_id) > (?2, ?3, ?4)
                         ORDER BY wall_ms, counter, node_id"
                    ))
                    .map_err(unavailable)?;
                let rows = stmt
                    .query_map(
                        params![entity_type.as_str(), to_sql(since.wall_ms), since.counter, since.node_id],
                        snapshot_from_row,
                    )
                    .map_err(unavailable)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(unavailable)?;
                rows.into_iter().map(|row| build_snapshot(entity_type, row)).collect()
            })
            .await
        })
    }

    fn fetch(
        &self,
        entity_type: EntityType,
        remote_id: &str,
    ) -> BoxFuture<'_, RemoteResult<Option<EntitySnapshot>>> {
        let remote_id = remote_id.to_string();
        Box::pin(async move {
            self.with_conn(move |conn| Self::lookup(conn, entity_type, &remote_id)).await
        })
    }

    fn create(&self, snapshot: EntitySnapshot) -> BoxFuture<'_, RemoteResult<EntitySnapshot>> {
        Box::pin(async move {
            self.with_conn(move |conn| {
                let tx = conn.transaction().map_err(unavailable)?;
                Self::check_refs(&tx, &snapshot)?;
                let refs = serde_json::to_string(&snapshot.refs)
                    .map_err(|e| RemoteError::Validation(e.to_string()))?;
                // placeholder id until the sequence number is known
                tx.execute(
                    "INSERT INTO remote_entities
                         (remote_id, entity_type, wall_ms, counter, node_id, fields, refs)
                     VALUES (hex(randomblob(16)), ?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        snapshot.entity_type.as_str(),
                        to_sql(snapshot.version.wall_ms),
                        snapshot.version.counter,
                        snapshot.version.node_id,
                        snapshot.fields.to_string(),
                        refs,
                    ],
                )
                .map_err(unavailable)?;
                let seq = tx.last_insert_rowid();
                let remote_id = format!("r{seq}");
                tx.execute(
                    "UPDATE remote_entities SET remote_id = ?1 WHERE seq = ?2",
                    params![remote_id, seq],
                )
                .map_err(unavailable)?;
                tx.commit().map_err(unavailable)?;
                debug!(entity_type = %snapshot.entity_type, remote_id = %remote_id, "remote create");
                Ok(EntitySnapshot { id: remote_id, ..snapshot })
            })
            .await
        })
    }

    fn update(&self, snapshot: EntitySnapshot) -> BoxFuture<'_, RemoteResult<EntitySnapshot>> {
        Box::pin(async move {
            self.with_conn(move |conn| {
                let tx = conn.transaction().map_err(unavailable)?;
                Self::existing_for_write(&tx, &snapshot)?;
                Self::check_refs(&tx, &snapshot)?;
                let stored = EntitySnapshot { deleted: false, ..snapshot };
                Self::store(&tx, &stored)?;
                tx.commit().map_err(unavailable)?;
                Ok(stored)
            })
            .await
        })
    }

    fn delete(&self, snapshot: EntitySnapshot) -> BoxFuture<'_, RemoteResult<EntitySnapshot>> {
        Box::pin(async move {
            self.with_conn(move |conn| {
                let tx = conn.transaction().map_err(unavailable)?;
                let existing = Self::existing_for_write(&tx, &snapshot)?;
                if existing.deleted {
                    return Ok(existing);
                }
                let tombstone =
                    EntitySnapshot::tombstone(snapshot.entity_type, snapshot.id, snapshot.version);
                Self::store(&tx, &tombstone)?;
                tx.commit().map_err(unavailable)?;
                Ok(tombstone)
            })
            .await
        })
    }
}

#[cfg(test)]
#[path = "remote_tests.rs"]
mod tests;
