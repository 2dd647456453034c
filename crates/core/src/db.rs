// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed local store.
//!
//! One database file holds both the local entities and the change ledger
//! (see [`crate::ledger`]), so a local edit and its ledger update commit in
//! the same transaction.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;

use crate::entity::{EntityRef, EntitySnapshot, EntityType};
use crate::error::{Error, Result};
use crate::ledger;
use crate::record::SyncRecord;
use crate::version::Version;

/// SQL schema for the local store and change ledger.
pub const SCHEMA: &str = r#"
-- Local copies of tracker entities; fields and refs are JSON
CREATE TABLE IF NOT EXISTS entities (
    entity_type TEXT NOT NULL,
    id TEXT NOT NULL,
    version TEXT NOT NULL,
    fields TEXT NOT NULL,
    refs TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL,
    PRIMARY KEY (entity_type, id)
);

-- Change ledger: one row per entity under sync control
CREATE TABLE IF NOT EXISTS sync_records (
    entity_type TEXT NOT NULL,
    local_id TEXT NOT NULL,
    remote_id TEXT,
    local_version TEXT NOT NULL,
    remote_version TEXT,
    synced_local TEXT,
    synced_remote TEXT,
    state TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    next_attempt_at INTEGER,
    tombstone INTEGER NOT NULL DEFAULT 0,
    revision INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (entity_type, local_id)
);

-- Highest remote version pulled per entity type
CREATE TABLE IF NOT EXISTS pull_watermarks (
    entity_type TEXT PRIMARY KEY,
    version TEXT NOT NULL
);

-- Conflict audit trail
CREATE TABLE IF NOT EXISTS conflicts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    local_id TEXT NOT NULL,
    local_version TEXT NOT NULL,
    remote_version TEXT NOT NULL,
    winner TEXT NOT NULL,
    detected_at TEXT NOT NULL
);

-- Indexes
CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_remote_id
    ON sync_records(entity_type, remote_id) WHERE remote_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_sync_state ON sync_records(state);
CREATE INDEX IF NOT EXISTS idx_conflicts_record ON conflicts(entity_type, local_id);
"#;

/// Parse a string value from the database, returning a rusqlite error on parse failure.
pub(crate) fn parse_db<T: std::str::FromStr>(
    value: &str,
    column: &str,
) -> std::result::Result<T, rusqlite::Error> {
    value.parse().map_err(|_| corrupted(format!("invalid value '{value}' in column '{column}'")))
}

/// Parse an optional version from the database.
pub(crate) fn parse_version_opt(
    value: Option<String>,
    column: &str,
) -> std::result::Result<Option<Version>, rusqlite::Error> {
    value.map(|s| parse_db(&s, column)).transpose()
}

pub(crate) fn corrupted(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(Error::CorruptedData(message)),
    )
}

/// Unwraps row conversion failures back into [`Error::CorruptedData`].
pub(crate) fn map_corruption(err: rusqlite::Error) -> Error {
    match err {
        rusqlite::Error::FromSqlConversionFailure(_, _, inner) => match inner.downcast::<Error>() {
            Ok(err) => *err,
            Err(other) => Error::CorruptedData(other.to_string()),
        },
        other => Error::Database(other),
    }
}

/// Run schema creation on a database connection.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// SQLite database connection with local store and ledger operations.
pub struct Database {
    /// The underlying SQLite connection.
    pub conn: Connection,
}

impl Database {
    /// Open a database connection at the given path, creating and migrating if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // WAL lets the app keep editing while the daemon syncs
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        let db = Database { conn };
        run_migrations(&db.conn)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        run_migrations(&db.conn)?;
        Ok(db)
    }

    /// Changes whenever another connection commits to the database file.
    pub fn data_version(&self) -> Result<i64> {
        Ok(self.conn.query_row("PRAGMA data_version", [], |row| row.get(0))?)
    }

    /// Get an entity by type and local id.
    pub fn get_entity(&self, entity_type: EntityType, id: &str) -> Result<Option<EntitySnapshot>> {
        self.conn
            .query_row(
                "SELECT entity_type, id, version, fields, refs FROM entities
                 WHERE entity_type = ?1 AND id = ?2",
                params![entity_type.as_str(), id],
                entity_from_row,
            )
            .optional()
            .map_err(map_corruption)
    }

    /// Check if an entity exists.
    pub fn entity_exists(&self, entity_type: EntityType, id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE entity_type = ?1 AND id = ?2",
            params![entity_type.as_str(), id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Write an entity without touching the ledger.
    ///
    /// Used when applying remote state; local edits go through
    /// [`Database::save_entity`].
    pub fn put_entity(&self, snapshot: &EntitySnapshot) -> Result<()> {
        put_entity(&self.conn, snapshot)
    }

    /// Remove an entity without touching the ledger. Returns whether a row existed.
    pub fn remove_entity(&self, entity_type: EntityType, id: &str) -> Result<bool> {
        let affected = self.conn.execute(
            "DELETE FROM entities WHERE entity_type = ?1 AND id = ?2",
            params![entity_type.as_str(), id],
        )?;
        Ok(affected > 0)
    }

    /// Write an entity only if its stored version is still `expected`
    /// (`None`: no row). Returns false, writing nothing, when a local edit
    /// got there first.
    pub fn put_entity_if(
        &mut self,
        snapshot: &EntitySnapshot,
        expected: Option<Version>,
    ) -> Result<bool> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if stored_version(&tx, snapshot.entity_type, &snapshot.id)? != expected {
            return Ok(false);
        }
        put_entity(&tx, snapshot)?;
        tx.commit()?;
        Ok(true)
    }

    /// Remove an entity only if its stored version is still `expected`.
    /// Returns false, removing nothing, when a local edit got there first.
    pub fn remove_entity_if(
        &mut self,
        entity_type: EntityType,
        id: &str,
        expected: Option<Version>,
    ) -> Result<bool> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if stored_version(&tx, entity_type, id)? != expected {
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM entities WHERE entity_type = ?1 AND id = ?2",
            params![entity_type.as_str(), id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Entities of a type whose version is after `since` (all of them when `None`).
    pub fn entities_modified_since(
        &self,
        entity_type: EntityType,
        since: Option<Version>,
    ) -> Result<Vec<EntitySnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_type, id, version, fields, refs FROM entities
             WHERE entity_type = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![entity_type.as_str()], entity_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(map_corruption)?;
        Ok(rows
            .into_iter()
            .filter(|s| since.map_or(true, |since| s.version > since))
            .collect())
    }

    /// Record a local edit: write the entity and mark it for push in one transaction.
    pub fn save_entity(&mut self, snapshot: &EntitySnapshot) -> Result<SyncRecord> {
        if snapshot.deleted {
            return Err(Error::InvalidInput(
                "use delete_entity to delete an entity".to_string(),
            ));
        }
        let tx = self.conn.transaction()?;
        put_entity(&tx, snapshot)?;
        let record =
            ledger::record_local_edit(&tx, snapshot.entity_type, &snapshot.id, snapshot.version)?;
        tx.commit()?;
        Ok(record)
    }

    /// Record a local deletion: drop the entity and leave a tombstone in the
    /// ledger until the remote confirms. Returns `None` if the entity was
    /// never tracked.
    pub fn delete_entity(
        &mut self,
        entity_type: EntityType,
        id: &str,
        version: Version,
    ) -> Result<Option<SyncRecord>> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM entities WHERE entity_type = ?1 AND id = ?2",
            params![entity_type.as_str(), id],
        )?;
        let record = ledger::record_local_delete(&tx, entity_type, id, version)?;
        tx.commit()?;
        Ok(record)
    }

    /// Begin a transaction for multi-step ledger work.
    pub(crate) fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }
}

fn put_entity(conn: &Connection, snapshot: &EntitySnapshot) -> Result<()> {
    conn.execute(
        "INSERT INTO entities (entity_type, id, version, fields, refs, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(entity_type, id) DO UPDATE SET
             version = excluded.version,
             fields = excluded.fields,
             refs = excluded.refs,
             updated_at = excluded.updated_at",
        params![
            snapshot.entity_type.as_str(),
            snapshot.id,
            snapshot.version.to_string(),
            serde_json::to_string(&snapshot.fields)?,
            serde_json::to_string(&snapshot.refs)?,
            now_rfc3339(),
        ],
    )?;
    Ok(())
}

fn stored_version(conn: &Connection, entity_type: EntityType, id: &str) -> Result<Option<Version>> {
    conn.query_row(
        "SELECT version FROM entities WHERE entity_type = ?1 AND id = ?2",
        params![entity_type.as_str(), id],
        |row| parse_version_opt(row.get(0)?, "version"),
    )
    .optional()
    .map(Option::flatten)
    .map_err(map_corruption)
}

fn entity_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<EntitySnapshot, rusqlite::Error> {
    let type_str: String = row.get(0)?;
    let id: String = row.get(1)?;
    let version_str: String = row.get(2)?;
    let fields_str: String = row.get(3)?;
    let refs_str: String = row.get(4)?;

    let fields: serde_json::Value = serde_json::from_str(&fields_str)
        .map_err(|e| corrupted(format!("invalid fields for {type_str} {id}: {e}")))?;
    let refs: Vec<EntityRef> = serde_json::from_str(&refs_str)
        .map_err(|e| corrupted(format!("invalid refs for {type_str} {id}: {e}")))?;

    Ok(EntitySnapshot {
        entity_type: parse_db(&type_str, "entity_type")?,
        version: parse_db(&version_str, "version")?,
        id,
        deleted: false,
        fields,
        refs,
    })
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
