// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Errors surfaced by `stintd` commands.
#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("another stintd instance holds {0}\n  hint: stop the running daemon or wait for it to finish")]
    AlreadyRunning(String),

    #[error("invalid fields: {0}\n  hint: --fields takes a JSON object, e.g. '{{\"title\": \"Run\"}}'")]
    InvalidFields(String),

    #[error(transparent)]
    Core(#[from] stint_core::Error),

    #[error(transparent)]
    Sync(#[from] stint_sync::SyncError),

    #[error("remote unavailable: {0}")]
    Remote(#[from] stint_sync::RemoteError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
