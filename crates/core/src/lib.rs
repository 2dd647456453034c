// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! stint-core: Shared library for the stint sync engine
//!
//! This crate provides the data model, the SQLite-backed local store and
//! change ledger, and the pure decision logic (conflict resolution and retry
//! backoff) used by the sync executor and the stintd daemon.

pub mod backoff;
pub mod db;
pub mod entity;
pub mod error;
pub mod id;
pub mod ledger;
pub mod record;
pub mod resolver;
pub mod version;

pub use backoff::{JitterSource, NoJitter, RandomJitter, RetryPolicy, RetryScheduler};
pub use db::Database;
pub use entity::{EntityRef, EntitySnapshot, EntityType};
pub use error::{Error, Result};
pub use ledger::{CleanOutcome, ConflictEntry};
pub use record::{SyncRecord, SyncState};
pub use resolver::{resolve, Action, Conflict, Effect, Side};
pub use version::{ClockSource, ManualClock, SystemClock, Version, VersionClock, VersionPair};
