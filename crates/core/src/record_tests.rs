// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use yare::parameterized;

#[parameterized(
    clean = { "clean", SyncState::Clean },
    pending_push = { "pending_push", SyncState::PendingPush },
    pending_pull = { "pending_pull", SyncState::PendingPull },
    conflict = { "conflict", SyncState::Conflict },
    failed = { "FAILED", SyncState::Failed },
)]
fn sync_state_from_str(input: &str, expected: SyncState) {
    assert_eq!(input.parse::<SyncState>().unwrap(), expected);
    assert_eq!(expected.as_str().parse::<SyncState>().unwrap(), expected);
}

#[test]
fn sync_state_rejects_unknown() {
    assert!("dirty".parse::<SyncState>().is_err());
}

#[test]
fn local_record_starts_pending_push() {
    let v = Version::new(100, 0, 1);
    let record = SyncRecord::local(EntityType::Task, "task-1", v);

    assert_eq!(record.state, SyncState::PendingPush);
    assert_eq!(record.remote_id, None);
    assert!(record.local_changed());
    assert!(!record.remote_changed());
    assert_eq!(record.retry_count, 0);
    assert_eq!(record.key(), "task:task-1");
}

#[test]
fn pulled_record_starts_pending_pull() {
    let v = Version::new(100, 0, 9);
    let record = SyncRecord::pulled(EntityType::Sprint, "sprint-1", "r-7", v);

    assert_eq!(record.state, SyncState::PendingPull);
    assert_eq!(record.remote_id.as_deref(), Some("r-7"));
    assert_eq!(record.local_version, Version::min());
    assert!(record.remote_changed());
    assert!(!record.has_local_edit());
}

#[test]
fn clean_invariant() {
    let v = Version::new(100, 0, 1);
    let mut record = SyncRecord::local(EntityType::Task, "task-1", v);
    record.remote_version = Some(v);
    record.last_synced = VersionPair::synced(v, v);
    record.state = SyncState::Clean;
    assert!(record.is_consistent());

    record.local_version = Version::new(200, 0, 1);
    assert!(!record.is_consistent());

    // only Clean records are held to the invariant
    record.state = SyncState::PendingPush;
    assert!(record.is_consistent());
}
