// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Per-record sync metadata kept by the change ledger.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::entity::EntityType;
use crate::error::{Error, Result};
use crate::version::{Version, VersionPair};

/// Where a record stands relative to the remote copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Both sides match the last synced pair.
    Clean,
    /// A local edit has not reached the remote yet.
    PendingPush,
    /// A remote change has been seen but not applied locally.
    PendingPull,
    /// Both sides changed since the last sync. Transient: kept for audit
    /// until the resolution is applied.
    Conflict,
    /// The last attempt failed. Retried with backoff until the attempt
    /// budget is spent.
    Failed,
}

impl SyncState {
    /// Returns the string representation used in storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Clean => "clean",
            SyncState::PendingPush => "pending_push",
            SyncState::PendingPull => "pending_pull",
            SyncState::Conflict => "conflict",
            SyncState::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "clean" => Ok(SyncState::Clean),
            "pending_push" => Ok(SyncState::PendingPush),
            "pending_pull" => Ok(SyncState::PendingPull),
            "conflict" => Ok(SyncState::Conflict),
            "failed" => Ok(SyncState::Failed),
            _ => Err(Error::InvalidSyncState(s.to_string())),
        }
    }
}

/// Sync bookkeeping for one local entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub entity_type: EntityType,
    pub local_id: String,
    /// Assigned by the remote on first push; never changes afterwards.
    pub remote_id: Option<String>,
    /// Version of the latest local edit. [`Version::min`] for records that
    /// were pulled and not yet applied locally.
    pub local_version: Version,
    /// Latest remote version seen.
    pub remote_version: Option<Version>,
    pub last_synced: VersionPair,
    pub state: SyncState,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Earliest wall clock time (ms) a failed record may be retried.
    pub next_attempt_at: Option<u64>,
    /// Deleted locally; kept until the remote confirms the deletion.
    pub tombstone: bool,
    /// Bumped on every ledger write; writes are conditional on it.
    pub revision: u64,
}

impl SyncRecord {
    /// A record for an entity first created by a local edit.
    pub fn local(entity_type: EntityType, local_id: impl Into<String>, version: Version) -> Self {
        SyncRecord {
            entity_type,
            local_id: local_id.into(),
            remote_id: None,
            local_version: version,
            remote_version: None,
            last_synced: VersionPair::default(),
            state: SyncState::PendingPush,
            retry_count: 0,
            last_error: None,
            next_attempt_at: None,
            tombstone: false,
            revision: 0,
        }
    }

    /// A record for a previously unseen remote entity.
    pub fn pulled(
        entity_type: EntityType,
        local_id: impl Into<String>,
        remote_id: impl Into<String>,
        remote_version: Version,
    ) -> Self {
        SyncRecord {
            entity_type,
            local_id: local_id.into(),
            remote_id: Some(remote_id.into()),
            local_version: Version::min(),
            remote_version: Some(remote_version),
            last_synced: VersionPair::default(),
            state: SyncState::PendingPull,
            retry_count: 0,
            last_error: None,
            next_attempt_at: None,
            tombstone: false,
            revision: 0,
        }
    }

    /// True when the local side moved past the last synced version.
    pub fn local_changed(&self) -> bool {
        self.last_synced.local != Some(self.local_version)
    }

    /// True when a local edit is waiting to be pushed. A pulled record that
    /// was never applied locally has no edit.
    pub fn has_local_edit(&self) -> bool {
        self.tombstone || (self.local_version != Version::min() && self.local_changed())
    }

    /// True when a newer remote version has been seen than the last synced one.
    pub fn remote_changed(&self) -> bool {
        self.remote_version.is_some() && self.remote_version != self.last_synced.remote
    }

    /// Checks the Clean invariant: a clean record matches its synced pair.
    pub fn is_consistent(&self) -> bool {
        self.state != SyncState::Clean
            || (!self.local_changed() && self.remote_version == self.last_synced.remote)
    }

    /// Human-readable identity for logs and reports.
    pub fn key(&self) -> String {
        format!("{}:{}", self.entity_type, self.local_id)
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
