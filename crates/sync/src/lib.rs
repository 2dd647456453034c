// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Offline-first sync engine.
//!
//! Keeps a device's local store and a shared remote store converged, one
//! entity type at a time, with last-writer-wins conflict resolution.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ trigger ┌──────────────┐  pull/push  ┌──────────────┐
//! │ Coordinator  │────────►│   Executor   │◄───────────►│ RemoteStore  │
//! │ (one cycle)  │◄────────│ (per type)   │             │   (trait)    │
//! └──────────────┘ report  └──────────────┘             └──────────────┘
//!                             │        │
//!                             ▼        ▼
//!                     ┌────────────┐ ┌────────────┐
//!                     │ LocalStore │ │   Ledger   │  (stint-core)
//!                     └────────────┘ └────────────┘
//! ```
//!
//! # Features
//!
//! - Ordered passes so referenced entities sync before their dependents
//! - Optimistic ledger writes: a local edit racing a sync is never lost
//! - Exponential backoff with jitter; terminal failures wait for a manual retry
//! - Change feed for observers of applied changes
//! - A SQLite remote on shared storage for multi-device use without a server

mod coordinator;
mod error;
mod executor;
mod feed;
mod remote;
mod report;
mod store;
mod trigger;

pub use coordinator::{CycleObserver, CyclePhase, SyncCoordinator, TriggerOutcome};
pub use error::{LocalError, RemoteError, Result, SyncError};
pub use executor::{CycleRunner, ExecutorConfig, SyncExecutor};
pub use feed::{ChangeEvent, ChangeFeed, ChangeKind, SubscriptionId};
pub use remote::SharedRemote;
pub use report::{CycleReport, PassReport};
pub use store::{
    lock, shared, BoxFuture, LocalStore, RemoteResult, RemoteStore, SharedDb, SqliteLocalStore,
};
pub use trigger::{EditDebouncer, TriggerReason};

#[cfg(test)]
mod test_helpers;
