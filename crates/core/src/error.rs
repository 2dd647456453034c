// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for stint-core operations.

use thiserror::Error;

/// All possible errors that can occur in stint-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("entity not found: {entity_type} {id}")]
    EntityNotFound { entity_type: String, id: String },

    #[error("sync record not found: {entity_type} {local_id}")]
    RecordNotFound {
        entity_type: String,
        local_id: String,
    },

    #[error("stale sync record: {entity_type} {local_id} changed since it was read (revision {expected})")]
    StaleRecord {
        entity_type: String,
        local_id: String,
        expected: u64,
    },

    #[error("remote id already assigned: {entity_type} {local_id} is bound to '{existing}', refusing '{attempted}'")]
    RemoteIdReassigned {
        entity_type: String,
        local_id: String,
        existing: String,
        attempted: String,
    },

    #[error("invalid entity type: '{0}'\n  hint: valid types are: goal, sprint, task, checkup, tag, task_tag")]
    InvalidEntityType(String),

    #[error("invalid sync state: '{0}'\n  hint: valid states are: clean, pending_push, pending_pull, conflict, failed")]
    InvalidSyncState(String),

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupted data: {0}")]
    CorruptedData(String),
}

impl Error {
    /// Returns true when the error means a concurrent writer got there first.
    pub fn is_stale(&self) -> bool {
        matches!(self, Error::StaleRecord { .. })
    }
}

/// A specialized Result type for stint-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
