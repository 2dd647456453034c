// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The change ledger: persisted [`SyncRecord`]s.
//!
//! Every write is conditional on the record's `revision`. A caller passes
//! back the record it read; if the row changed in between (usually a local
//! edit racing the executor) the write fails with [`Error::StaleRecord`]
//! instead of clobbering the newer state.

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{map_corruption, now_rfc3339, parse_db, parse_version_opt, Database};
use crate::entity::EntityType;
use crate::error::{Error, Result};
use crate::id::unique_local_id_for;
use crate::record::{SyncRecord, SyncState};
use crate::resolver::{Conflict, Side};
use crate::version::{Version, VersionPair};

const RECORD_COLUMNS: &str = "entity_type, local_id, remote_id, local_version, remote_version,
     synced_local, synced_remote, state, retry_count, last_error, next_attempt_at,
     tombstone, revision";

/// Result of [`Database::mark_clean`].
#[derive(Debug, Clone, PartialEq)]
pub enum CleanOutcome {
    /// The record converged and is now Clean.
    Committed(SyncRecord),
    /// A local edit landed while the record was syncing. The remote half of
    /// the sync was kept and the record is still pending push.
    Superseded(SyncRecord),
}

impl CleanOutcome {
    pub fn record(&self) -> &SyncRecord {
        match self {
            CleanOutcome::Committed(record) | CleanOutcome::Superseded(record) => record,
        }
    }

    pub fn into_record(self) -> SyncRecord {
        match self {
            CleanOutcome::Committed(record) | CleanOutcome::Superseded(record) => record,
        }
    }
}

/// A row of the conflict audit log.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictEntry {
    pub entity_type: EntityType,
    pub local_id: String,
    pub local_version: Version,
    pub remote_version: Version,
    pub winner: Side,
    pub detected_at: String,
}

fn record_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<SyncRecord, rusqlite::Error> {
    let type_str: String = row.get(0)?;
    let local_version: String = row.get(3)?;
    let state: String = row.get(7)?;
    let next_attempt_at: Option<i64> = row.get(10)?;
    let retry_count: i64 = row.get(8)?;
    let revision: i64 = row.get(12)?;

    Ok(SyncRecord {
        entity_type: parse_db(&type_str, "entity_type")?,
        local_id: row.get(1)?,
        remote_id: row.get(2)?,
        local_version: parse_db(&local_version, "local_version")?,
        remote_version: parse_version_opt(row.get(4)?, "remote_version")?,
        last_synced: VersionPair::new(
            parse_version_opt(row.get(5)?, "synced_local")?,
            parse_version_opt(row.get(6)?, "synced_remote")?,
        ),
        state: parse_db(&state, "state")?,
        retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
        last_error: row.get(9)?,
        next_attempt_at: next_attempt_at.map(|at| u64::try_from(at).unwrap_or(0)),
        tombstone: row.get(11)?,
        revision: u64::try_from(revision).unwrap_or(0),
    })
}

fn version_text(version: Option<Version>) -> Option<String> {
    version.map(|v| v.to_string())
}

fn millis_to_sql(ms: Option<u64>) -> Option<i64> {
    ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX))
}

fn stale(record: &SyncRecord) -> Error {
    Error::StaleRecord {
        entity_type: record.entity_type.to_string(),
        local_id: record.local_id.clone(),
        expected: record.revision,
    }
}

fn not_found(entity_type: EntityType, local_id: &str) -> Error {
    Error::RecordNotFound {
        entity_type: entity_type.to_string(),
        local_id: local_id.to_string(),
    }
}

pub(crate) fn read_record(
    conn: &Connection,
    entity_type: EntityType,
    local_id: &str,
) -> Result<Option<SyncRecord>> {
    conn.query_row(
        &format!(
            "SELECT {RECORD_COLUMNS} FROM sync_records WHERE entity_type = ?1 AND local_id = ?2"
        ),
        params![entity_type.as_str(), local_id],
        record_from_row,
    )
    .optional()
    .map_err(map_corruption)
}

fn read_by_remote_id(
    conn: &Connection,
    entity_type: EntityType,
    remote_id: &str,
) -> Result<Option<SyncRecord>> {
    conn.query_row(
        &format!(
            "SELECT {RECORD_COLUMNS} FROM sync_records WHERE entity_type = ?1 AND remote_id = ?2"
        ),
        params![entity_type.as_str(), remote_id],
        record_from_row,
    )
    .optional()
    .map_err(map_corruption)
}

fn query_records(conn: &Connection, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<SyncRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let records = stmt
        .query_map(args, record_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(map_corruption)?;
    Ok(records)
}

/// Rejects a write that would rebind or steal a remote id.
fn check_remote_id(
    conn: &Connection,
    current: Option<&SyncRecord>,
    record: &SyncRecord,
) -> Result<()> {
    if let (Some(existing), Some(attempted)) =
        (current.and_then(|c| c.remote_id.as_ref()), record.remote_id.as_ref())
    {
        if existing != attempted {
            return Err(Error::RemoteIdReassigned {
                entity_type: record.entity_type.to_string(),
                local_id: record.local_id.clone(),
                existing: existing.clone(),
                attempted: attempted.clone(),
            });
        }
    }
    if let Some(remote_id) = &record.remote_id {
        if let Some(owner) = read_by_remote_id(conn, record.entity_type, remote_id)? {
            if owner.local_id != record.local_id {
                return Err(Error::InvalidInput(format!(
                    "remote id '{remote_id}' is already tracked by {}",
                    owner.key()
                )));
            }
        }
    }
    Ok(())
}

fn read_watermark(conn: &Connection, entity_type: EntityType) -> Result<Option<Version>> {
    conn.query_row(
        "SELECT version FROM pull_watermarks WHERE entity_type = ?1",
        params![entity_type.as_str()],
        |row| parse_version_opt(row.get(0)?, "version"),
    )
    .optional()
    .map(Option::flatten)
    .map_err(map_corruption)
}

/// Inserts (revision 0) or conditionally updates a record. Returns the
/// record as stored, with its new revision.
pub(crate) fn write_record(conn: &Connection, record: &SyncRecord) -> Result<SyncRecord> {
    let current = read_record(conn, record.entity_type, &record.local_id)?;

    match (&current, record.revision) {
        (None, 0) => {}
        (None, _) => return Err(not_found(record.entity_type, &record.local_id)),
        (Some(_), 0) => return Err(stale(record)),
        (Some(cur), rev) if cur.revision != rev => return Err(stale(record)),
        (Some(_), _) => {}
    }
    check_remote_id(conn, current.as_ref(), record)?;

    // an assigned remote id survives writes that do not carry it
    let remote_id = current
        .as_ref()
        .and_then(|c| c.remote_id.clone())
        .or_else(|| record.remote_id.clone());
    let stored = SyncRecord { remote_id, revision: record.revision + 1, ..record.clone() };

    let local_version = stored.local_version.to_string();
    let remote_version = version_text(stored.remote_version);
    let synced_local = version_text(stored.last_synced.local);
    let synced_remote = version_text(stored.last_synced.remote);
    let next_attempt_at = millis_to_sql(stored.next_attempt_at);
    let new_revision = i64::try_from(stored.revision).unwrap_or(i64::MAX);
    let old_revision = i64::try_from(record.revision).unwrap_or(i64::MAX);
    let updated_at = now_rfc3339();
    let values: [&dyn rusqlite::ToSql; 15] = [
        &stored.entity_type.as_str(),
        &stored.local_id,
        &stored.remote_id,
        &local_version,
        &remote_version,
        &synced_local,
        &synced_remote,
        &stored.state.as_str(),
        &stored.retry_count,
        &stored.last_error,
        &next_attempt_at,
        &stored.tombstone,
        &new_revision,
        &updated_at,
        &old_revision,
    ];

    if current.is_none() {
        conn.execute(
            "INSERT INTO sync_records (entity_type, local_id, remote_id, local_version,
                 remote_version, synced_local, synced_remote, state, retry_count, last_error,
                 next_attempt_at, tombstone, revision, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            &values[..14],
        )?;
    } else {
        let affected = conn.execute(
            "UPDATE sync_records SET remote_id = ?3, local_version = ?4, remote_version = ?5,
                 synced_local = ?6, synced_remote = ?7, state = ?8, retry_count = ?9,
                 last_error = ?10, next_attempt_at = ?11, tombstone = ?12, revision = ?13,
                 updated_at = ?14
             WHERE entity_type = ?1 AND local_id = ?2 AND revision = ?15",
            &values[..],
        )?;
        if affected == 0 {
            return Err(stale(record));
        }
    }

    Ok(stored)
}

/// Ledger side of a local edit: create the record or mark it for push.
///
/// A Failed record stays Failed so the edit does not bypass the backoff; the
/// newer version is pushed on the next attempt.
pub(crate) fn record_local_edit(
    conn: &Connection,
    entity_type: EntityType,
    local_id: &str,
    version: Version,
) -> Result<SyncRecord> {
    let Some(current) = read_record(conn, entity_type, local_id)? else {
        return write_record(conn, &SyncRecord::local(entity_type, local_id, version));
    };

    if version <= current.local_version {
        return Err(Error::InvalidInput(format!(
            "edit version {version} is not after {} for {}",
            current.local_version,
            current.key()
        )));
    }

    let state =
        if current.state == SyncState::Failed { SyncState::Failed } else { SyncState::PendingPush };
    write_record(
        conn,
        &SyncRecord { local_version: version, tombstone: false, state, ..current },
    )
}

/// Ledger side of a local deletion. Untracked entities need no tombstone.
pub(crate) fn record_local_delete(
    conn: &Connection,
    entity_type: EntityType,
    local_id: &str,
    version: Version,
) -> Result<Option<SyncRecord>> {
    let Some(current) = read_record(conn, entity_type, local_id)? else {
        return Ok(None);
    };

    if version <= current.local_version {
        return Err(Error::InvalidInput(format!(
            "delete version {version} is not after {} for {}",
            current.local_version,
            current.key()
        )));
    }

    let state =
        if current.state == SyncState::Failed { SyncState::Failed } else { SyncState::PendingPush };
    write_record(
        conn,
        &SyncRecord { local_version: version, tombstone: true, state, ..current },
    )
    .map(Some)
}

impl Database {
    /// All records of one entity type, ordered by local id.
    pub fn records(&self, entity_type: EntityType) -> Result<Vec<SyncRecord>> {
        query_records(
            &self.conn,
            &format!(
                "SELECT {RECORD_COLUMNS} FROM sync_records WHERE entity_type = ?1 ORDER BY local_id"
            ),
            &[&entity_type.as_str()],
        )
    }

    pub fn record(&self, entity_type: EntityType, local_id: &str) -> Result<Option<SyncRecord>> {
        read_record(&self.conn, entity_type, local_id)
    }

    pub fn find_by_remote_id(
        &self,
        entity_type: EntityType,
        remote_id: &str,
    ) -> Result<Option<SyncRecord>> {
        read_by_remote_id(&self.conn, entity_type, remote_id)
    }

    /// Highest remote version pulled for a type. Pulls resume after it.
    pub fn watermark(&self, entity_type: EntityType) -> Result<Option<Version>> {
        read_watermark(&self.conn, entity_type)
    }

    /// Move the pull watermark forward. Never moves it back.
    pub fn advance_watermark(&mut self, entity_type: EntityType, version: Version) -> Result<()> {
        let tx = self.transaction()?;
        let current = read_watermark(&tx, entity_type)?;
        if current.map_or(true, |current| version > current) {
            tx.execute(
                "INSERT INTO pull_watermarks (entity_type, version) VALUES (?1, ?2)
                 ON CONFLICT(entity_type) DO UPDATE SET version = excluded.version",
                params![entity_type.as_str(), version.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Every record that is not Clean, across all types.
    pub fn attention_records(&self) -> Result<Vec<SyncRecord>> {
        query_records(
            &self.conn,
            &format!(
                "SELECT {RECORD_COLUMNS} FROM sync_records WHERE state != 'clean'
                 ORDER BY entity_type, local_id"
            ),
            &[],
        )
    }

    /// Insert a new record (revision 0) or update one conditionally on its revision.
    pub fn upsert(&mut self, record: &SyncRecord) -> Result<SyncRecord> {
        let tx = self.transaction()?;
        let stored = write_record(&tx, record)?;
        tx.commit()?;
        Ok(stored)
    }

    /// A free local id for an entity first seen on the remote.
    pub fn local_id_for_remote(&self, entity_type: EntityType, remote_id: &str) -> Result<String> {
        let mut taken = Vec::new();
        let mut stmt = self.conn.prepare(
            "SELECT local_id FROM sync_records WHERE entity_type = ?1
             UNION SELECT id FROM entities WHERE entity_type = ?1",
        )?;
        for id in stmt.query_map(params![entity_type.as_str()], |row| row.get::<_, String>(0))? {
            taken.push(id?);
        }
        Ok(unique_local_id_for(entity_type, remote_id, |candidate| {
            taken.iter().any(|t| t == candidate)
        }))
    }

    /// Track a previously unseen remote entity as PendingPull.
    pub fn insert_pulled(
        &mut self,
        entity_type: EntityType,
        local_id: &str,
        remote_id: &str,
        remote_version: Version,
    ) -> Result<SyncRecord> {
        self.upsert(&SyncRecord::pulled(entity_type, local_id, remote_id, remote_version))
    }

    /// Remember a newer remote version seen during pull.
    pub fn note_remote_change(
        &mut self,
        record: &SyncRecord,
        remote_version: Version,
    ) -> Result<SyncRecord> {
        let state =
            if record.state == SyncState::Clean { SyncState::PendingPull } else { record.state };
        self.upsert(&SyncRecord { remote_version: Some(remote_version), state, ..record.clone() })
    }

    /// Record a successful convergence at `(local_version, remote_version)`.
    ///
    /// If the row moved on because of a local edit made during the sync,
    /// the remote half is still recorded and the record stays PendingPush
    /// ([`CleanOutcome::Superseded`]). Any other concurrent change is an
    /// [`Error::StaleRecord`].
    pub fn mark_clean(
        &mut self,
        record: &SyncRecord,
        local_version: Version,
        remote_version: Version,
        remote_id: Option<&str>,
    ) -> Result<CleanOutcome> {
        let tx = self.transaction()?;
        let current = read_record(&tx, record.entity_type, &record.local_id)?
            .ok_or_else(|| not_found(record.entity_type, &record.local_id))?;
        let remote_id = remote_id.map(str::to_string).or_else(|| record.remote_id.clone());

        let outcome = if current.revision == record.revision {
            let clean = SyncRecord {
                remote_id,
                local_version,
                remote_version: Some(remote_version),
                last_synced: VersionPair::synced(local_version, remote_version),
                state: SyncState::Clean,
                retry_count: 0,
                last_error: None,
                next_attempt_at: None,
                tombstone: false,
                ..current
            };
            CleanOutcome::Committed(write_record(&tx, &clean)?)
        } else if current.local_version != record.local_version
            && current.remote_version == record.remote_version
        {
            let pending = SyncRecord {
                remote_id,
                remote_version: Some(remote_version),
                last_synced: VersionPair::synced(local_version, remote_version),
                state: SyncState::PendingPush,
                retry_count: 0,
                last_error: None,
                next_attempt_at: None,
                ..current
            };
            CleanOutcome::Superseded(write_record(&tx, &pending)?)
        } else {
            return Err(stale(record));
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Mark a record as in conflict and append to the audit log.
    ///
    /// A conflict between the same two versions is logged once, however many
    /// cycles it takes to resolve.
    pub fn mark_conflict(&mut self, record: &SyncRecord, conflict: &Conflict) -> Result<SyncRecord> {
        let tx = self.transaction()?;
        let stored =
            write_record(&tx, &SyncRecord { state: SyncState::Conflict, ..record.clone() })?;
        let local_version = conflict.local_version.to_string();
        let remote_version = conflict.remote_version.to_string();
        let last_logged: Option<(String, String)> = tx
            .query_row(
                "SELECT local_version, remote_version FROM conflicts
                 WHERE entity_type = ?1 AND local_id = ?2 ORDER BY id DESC LIMIT 1",
                params![record.entity_type.as_str(), record.local_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if last_logged != Some((local_version.clone(), remote_version.clone())) {
            tx.execute(
                "INSERT INTO conflicts (entity_type, local_id, local_version, remote_version, winner, detected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.entity_type.as_str(),
                    record.local_id,
                    local_version,
                    remote_version,
                    conflict.winner.as_str(),
                    now_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(stored)
    }

    /// Record a failed attempt. `next_attempt_at` is `None` once retries are spent.
    pub fn mark_failed(
        &mut self,
        record: &SyncRecord,
        error: &str,
        next_attempt_at: Option<u64>,
    ) -> Result<SyncRecord> {
        self.upsert(&SyncRecord {
            state: SyncState::Failed,
            retry_count: record.retry_count.saturating_add(1),
            last_error: Some(error.to_string()),
            next_attempt_at,
            ..record.clone()
        })
    }

    /// Fail a record terminally. Used for local data that cannot be read.
    pub fn mark_unrecoverable(
        &mut self,
        record: &SyncRecord,
        error: &str,
        max_attempts: u32,
    ) -> Result<SyncRecord> {
        self.upsert(&SyncRecord {
            state: SyncState::Failed,
            retry_count: record.retry_count.max(max_attempts),
            last_error: Some(error.to_string()),
            next_attempt_at: None,
            ..record.clone()
        })
    }

    /// Drop a record whose deletion both sides have confirmed.
    pub fn purge(&mut self, record: &SyncRecord) -> Result<()> {
        let affected = self.conn.execute(
            "DELETE FROM sync_records WHERE entity_type = ?1 AND local_id = ?2 AND revision = ?3",
            params![
                record.entity_type.as_str(),
                record.local_id,
                i64::try_from(record.revision).unwrap_or(i64::MAX),
            ],
        )?;
        if affected == 0 {
            return Err(stale(record));
        }
        Ok(())
    }

    /// Manual retry: clear the failure so the next cycle attempts the record.
    pub fn reset_retry(&mut self, entity_type: EntityType, local_id: &str) -> Result<SyncRecord> {
        let tx = self.transaction()?;
        let current =
            read_record(&tx, entity_type, local_id)?.ok_or_else(|| not_found(entity_type, local_id))?;
        if current.state != SyncState::Failed {
            return Err(Error::InvalidInput(format!(
                "{} is {}, only failed records can be retried",
                current.key(),
                current.state
            )));
        }
        let state = if current.has_local_edit() {
            SyncState::PendingPush
        } else {
            SyncState::PendingPull
        };
        let stored = write_record(
            &tx,
            &SyncRecord {
                state,
                retry_count: 0,
                last_error: None,
                next_attempt_at: None,
                ..current
            },
        )?;
        tx.commit()?;
        Ok(stored)
    }

    /// Audit log entries for one record, oldest first.
    pub fn conflicts(&self, entity_type: EntityType, local_id: &str) -> Result<Vec<ConflictEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_type, local_id, local_version, remote_version, winner, detected_at
             FROM conflicts WHERE entity_type = ?1 AND local_id = ?2 ORDER BY id",
        )?;
        let entries = stmt
            .query_map(params![entity_type.as_str(), local_id], |row| {
                let type_str: String = row.get(0)?;
                let local_version: String = row.get(2)?;
                let remote_version: String = row.get(3)?;
                let winner: String = row.get(4)?;
                Ok(ConflictEntry {
                    entity_type: parse_db(&type_str, "entity_type")?,
                    local_id: row.get(1)?,
                    local_version: parse_db(&local_version, "local_version")?,
                    remote_version: parse_db(&remote_version, "remote_version")?,
                    winner: match winner.as_str() {
                        "local" => Side::Local,
                        "remote" => Side::Remote,
                        other => {
                            return Err(crate::db::corrupted(format!(
                                "invalid value '{other}' in column 'winner'"
                            )))
                        }
                    },
                    detected_at: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(map_corruption)?;
        Ok(entries)
    }
}

#[cfg(test)]
#[path = "ledger_tests.rs"]
mod tests;
