// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for sync operations.

use thiserror::Error;

/// Failure reported by a remote store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The remote could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not finish in time.
    #[error("request timed out")]
    Timeout,

    #[error("not authorized: {0}")]
    Auth(String),

    /// The remote refused the payload.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The remote refused the write, e.g. because it holds a newer version.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Transient failures are expected to go away on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Network(_) | RemoteError::Timeout)
    }
}

/// Failure reported by the local store.
#[derive(Debug, Error)]
pub enum LocalError {
    /// Local data cannot be read back. Retrying will not help.
    #[error("corrupted local data: {0}")]
    Corrupt(String),

    #[error("local store error: {0}")]
    Store(String),
}

impl From<stint_core::Error> for LocalError {
    fn from(err: stint_core::Error) -> Self {
        match err {
            stint_core::Error::CorruptedData(msg) => LocalError::Corrupt(msg),
            stint_core::Error::Json(e) => LocalError::Corrupt(e.to_string()),
            other => LocalError::Store(other.to_string()),
        }
    }
}

/// All errors surfaced by the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Ledger(#[from] stint_core::Error),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Local(#[from] LocalError),

    #[error("a sync cycle is already running")]
    CycleInProgress,
}

/// A specialized Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
