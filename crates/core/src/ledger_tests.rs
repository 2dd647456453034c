// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::entity::EntitySnapshot;
use crate::resolver::Effect;
use serde_json::json;
use yare::parameterized;

fn v(wall_ms: u64) -> Version {
    Version::new(wall_ms, 0, 1)
}

fn rv(wall_ms: u64) -> Version {
    Version::new(wall_ms, 0, 9)
}

fn save(db: &mut Database, id: &str, version: Version) -> SyncRecord {
    db.save_entity(&EntitySnapshot::new(EntityType::Task, id, version, json!({ "title": id })))
        .unwrap()
}

#[test]
fn upsert_inserts_then_updates_by_revision() {
    let mut db = Database::open_in_memory().unwrap();
    let inserted = db.upsert(&SyncRecord::local(EntityType::Goal, "goal-1", v(1))).unwrap();
    assert_eq!(inserted.revision, 1);

    let updated = db
        .upsert(&SyncRecord { last_error: Some("note".into()), ..inserted.clone() })
        .unwrap();
    assert_eq!(updated.revision, 2);
    assert_eq!(db.record(EntityType::Goal, "goal-1").unwrap().unwrap(), updated);
}

#[test]
fn upsert_with_stale_revision_fails() {
    let mut db = Database::open_in_memory().unwrap();
    let first = db.upsert(&SyncRecord::local(EntityType::Goal, "goal-1", v(1))).unwrap();
    db.upsert(&first).unwrap();

    let err = db.upsert(&first).unwrap_err();
    assert!(err.is_stale(), "got {err:?}");

    // inserting over an existing row is stale too
    let err = db.upsert(&SyncRecord::local(EntityType::Goal, "goal-1", v(2))).unwrap_err();
    assert!(err.is_stale());
}

#[test]
fn upsert_missing_record_with_revision_is_not_found() {
    let mut db = Database::open_in_memory().unwrap();
    let mut record = SyncRecord::local(EntityType::Goal, "goal-1", v(1));
    record.revision = 3;
    assert!(matches!(db.upsert(&record), Err(Error::RecordNotFound { .. })));
}

#[test]
fn remote_id_is_assigned_once() {
    let mut db = Database::open_in_memory().unwrap();
    let record = save(&mut db, "task-1", v(1));
    let clean = db.mark_clean(&record, v(1), v(1), Some("r-1")).unwrap().into_record();
    assert_eq!(clean.remote_id.as_deref(), Some("r-1"));

    let err = db
        .upsert(&SyncRecord { remote_id: Some("r-2".into()), ..clean.clone() })
        .unwrap_err();
    assert!(matches!(err, Error::RemoteIdReassigned { .. }), "got {err:?}");

    // writes that do not carry the id keep it
    let kept = db.upsert(&SyncRecord { remote_id: None, ..clean }).unwrap();
    assert_eq!(kept.remote_id.as_deref(), Some("r-1"));
}

#[test]
fn remote_id_cannot_be_shared() {
    let mut db = Database::open_in_memory().unwrap();
    let first = save(&mut db, "task-1", v(1));
    db.mark_clean(&first, v(1), v(1), Some("r-1")).unwrap();

    let second = save(&mut db, "task-2", v(2));
    let err = db.mark_clean(&second, v(2), v(2), Some("r-1")).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "got {err:?}");
}

#[test]
fn find_by_remote_id() {
    let mut db = Database::open_in_memory().unwrap();
    db.insert_pulled(EntityType::Tag, "tag-1", "r-7", rv(5)).unwrap();

    let found = db.find_by_remote_id(EntityType::Tag, "r-7").unwrap().unwrap();
    assert_eq!(found.local_id, "tag-1");
    assert_eq!(found.state, SyncState::PendingPull);
    assert!(db.find_by_remote_id(EntityType::Goal, "r-7").unwrap().is_none());
}

#[test]
fn watermark_only_moves_forward() {
    let mut db = Database::open_in_memory().unwrap();
    assert_eq!(db.watermark(EntityType::Tag).unwrap(), None);

    db.advance_watermark(EntityType::Tag, rv(30)).unwrap();
    db.advance_watermark(EntityType::Tag, rv(100)).unwrap();
    db.advance_watermark(EntityType::Tag, rv(9)).unwrap();
    db.advance_watermark(EntityType::Goal, rv(500)).unwrap();

    assert_eq!(db.watermark(EntityType::Tag).unwrap(), Some(rv(100)));
    assert_eq!(db.watermark(EntityType::Goal).unwrap(), Some(rv(500)));
}

#[test]
fn local_id_for_remote_avoids_taken_ids() {
    let mut db = Database::open_in_memory().unwrap();
    let first = db.local_id_for_remote(EntityType::Tag, "r-1").unwrap();
    db.insert_pulled(EntityType::Tag, &first, "r-1", rv(1)).unwrap();

    // a local entity squatting on the derived id forces a suffix
    let derived = crate::id::local_id_for(EntityType::Tag, "r-2");
    db.put_entity(&EntitySnapshot::new(EntityType::Tag, &derived, v(1), json!({}))).unwrap();
    let second = db.local_id_for_remote(EntityType::Tag, "r-2").unwrap();
    assert_eq!(second, format!("{derived}-2"));
}

#[test]
fn attention_records_lists_non_clean() {
    let mut db = Database::open_in_memory().unwrap();
    let a = save(&mut db, "task-a", v(1));
    save(&mut db, "task-b", v(2));
    db.mark_clean(&a, v(1), v(1), Some("r-a")).unwrap();

    let attention = db.attention_records().unwrap();
    assert_eq!(attention.len(), 1);
    assert_eq!(attention[0].local_id, "task-b");
}

#[test]
fn mark_clean_satisfies_clean_invariant() {
    let mut db = Database::open_in_memory().unwrap();
    let record = save(&mut db, "task-1", v(1));
    let failed = db.mark_failed(&record, "timeout", Some(10)).unwrap();

    let outcome = db.mark_clean(&failed, v(1), v(1), Some("r-1")).unwrap();
    assert!(matches!(outcome, CleanOutcome::Committed(_)), "got {outcome:?}");
    let clean = outcome.into_record();
    assert_eq!(clean.state, SyncState::Clean);
    assert_eq!(clean.retry_count, 0);
    assert_eq!(clean.last_error, None);
    assert_eq!(clean.next_attempt_at, None);
    assert!(clean.is_consistent());
}

#[test]
fn mark_clean_after_concurrent_edit_is_superseded() {
    let mut db = Database::open_in_memory().unwrap();
    let read = save(&mut db, "task-1", v(1));

    // the user edits while the push is in flight
    save(&mut db, "task-1", v(2));

    let outcome = db.mark_clean(&read, v(1), v(1), Some("r-1")).unwrap();
    assert!(matches!(outcome, CleanOutcome::Superseded(_)), "got {outcome:?}");
    let record = outcome.into_record();
    assert_eq!(record.state, SyncState::PendingPush);
    assert_eq!(record.local_version, v(2));
    assert_eq!(record.remote_id.as_deref(), Some("r-1"));
    assert_eq!(record.last_synced, VersionPair::synced(v(1), v(1)));
    assert!(record.local_changed());
    assert!(!record.remote_changed());
}

#[test]
fn mark_clean_after_other_change_is_stale() {
    let mut db = Database::open_in_memory().unwrap();
    let read = save(&mut db, "task-1", v(1));
    let clean = db.mark_clean(&read, v(1), v(1), Some("r-1")).unwrap().into_record();

    let err = db.mark_clean(&read, v(1), v(1), None).unwrap_err();
    assert!(err.is_stale(), "got {err:?}");
    assert_eq!(db.record(EntityType::Task, "task-1").unwrap().unwrap(), clean);
}

#[test]
fn note_remote_change_moves_clean_to_pending_pull() {
    let mut db = Database::open_in_memory().unwrap();
    let record = save(&mut db, "task-1", v(1));
    let clean = db.mark_clean(&record, v(1), v(1), Some("r-1")).unwrap().into_record();

    let noted = db.note_remote_change(&clean, rv(5)).unwrap();
    assert_eq!(noted.state, SyncState::PendingPull);
    assert_eq!(noted.remote_version, Some(rv(5)));
    assert!(noted.remote_changed());

    // a pending push stays pending push
    let edited = save(&mut db, "task-1", v(6));
    let noted = db.note_remote_change(&edited, rv(7)).unwrap();
    assert_eq!(noted.state, SyncState::PendingPush);
}

#[test]
fn mark_failed_increments_retry_count() {
    let mut db = Database::open_in_memory().unwrap();
    let mut record = save(&mut db, "task-1", v(1));
    for attempt in 1..=3 {
        record = db.mark_failed(&record, "network down", Some(attempt * 1000)).unwrap();
        assert_eq!(record.retry_count, attempt as u32);
    }
    assert_eq!(record.state, SyncState::Failed);
    assert_eq!(record.last_error.as_deref(), Some("network down"));
    assert_eq!(record.next_attempt_at, Some(3000));
}

#[test]
fn mark_unrecoverable_exhausts_attempts() {
    let mut db = Database::open_in_memory().unwrap();
    let record = save(&mut db, "task-1", v(1));
    let failed = db.mark_unrecoverable(&record, "corrupted data", 5).unwrap();
    assert_eq!(failed.state, SyncState::Failed);
    assert_eq!(failed.retry_count, 5);
    assert_eq!(failed.next_attempt_at, None);
}

#[test]
fn edits_keep_failed_records_failed() {
    let mut db = Database::open_in_memory().unwrap();
    let record = save(&mut db, "task-1", v(1));
    db.mark_failed(&record, "timeout", Some(10)).unwrap();

    let edited = save(&mut db, "task-1", v(2));
    assert_eq!(edited.state, SyncState::Failed);
    assert_eq!(edited.retry_count, 1);
    assert_eq!(edited.local_version, v(2));
}

#[parameterized(
    local_edit = { true, SyncState::PendingPush },
    remote_only = { false, SyncState::PendingPull },
)]
fn reset_retry_restores_pending_state(local_edit: bool, expected: SyncState) {
    let mut db = Database::open_in_memory().unwrap();
    let record = if local_edit {
        save(&mut db, "task-1", v(1))
    } else {
        db.insert_pulled(EntityType::Task, "task-1", "r-1", rv(1)).unwrap()
    };
    let failed = db.mark_unrecoverable(&record, "boom", 5).unwrap();

    let reset = db.reset_retry(EntityType::Task, "task-1").unwrap();
    assert_eq!(reset.state, expected);
    assert_eq!(reset.retry_count, 0);
    assert_eq!(reset.last_error, None);
    assert!(reset.revision > failed.revision);
}

#[test]
fn reset_retry_rejects_non_failed() {
    let mut db = Database::open_in_memory().unwrap();
    save(&mut db, "task-1", v(1));
    assert!(matches!(db.reset_retry(EntityType::Task, "task-1"), Err(Error::InvalidInput(_))));
    assert!(matches!(
        db.reset_retry(EntityType::Task, "task-404"),
        Err(Error::RecordNotFound { .. })
    ));
}

#[test]
fn mark_conflict_writes_audit_row() {
    let mut db = Database::open_in_memory().unwrap();
    let record = save(&mut db, "task-1", v(3));
    let conflict = Conflict {
        local_version: v(3),
        remote_version: rv(4),
        winner: Side::Remote,
        effect: Effect::ApplyRemote,
    };

    let marked = db.mark_conflict(&record, &conflict).unwrap();
    assert_eq!(marked.state, SyncState::Conflict);

    let entries = db.conflicts(EntityType::Task, "task-1").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].local_version, v(3));
    assert_eq!(entries[0].remote_version, rv(4));
    assert_eq!(entries[0].winner, Side::Remote);
}

#[test]
fn unresolved_conflict_is_logged_once() {
    let mut db = Database::open_in_memory().unwrap();
    let record = save(&mut db, "task-1", v(3));
    let conflict = Conflict {
        local_version: v(3),
        remote_version: rv(4),
        winner: Side::Remote,
        effect: Effect::ApplyRemote,
    };

    // deferred effects leave the record in conflict for the next cycle
    let marked = db.mark_conflict(&record, &conflict).unwrap();
    let marked = db.mark_conflict(&marked, &conflict).unwrap();
    assert_eq!(db.conflicts(EntityType::Task, "task-1").unwrap().len(), 1);

    let newer = Conflict { remote_version: rv(6), ..conflict };
    db.mark_conflict(&marked, &newer).unwrap();
    let entries = db.conflicts(EntityType::Task, "task-1").unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].remote_version, rv(6));
}

#[test]
fn purge_is_conditional() {
    let mut db = Database::open_in_memory().unwrap();
    let record = save(&mut db, "task-1", v(1));
    let tombstone = db.delete_entity(EntityType::Task, "task-1", v(2)).unwrap().unwrap();

    assert!(db.purge(&record).unwrap_err().is_stale());
    db.purge(&tombstone).unwrap();
    assert!(db.record(EntityType::Task, "task-1").unwrap().is_none());
}

#[test]
fn corrupted_record_row_is_reported() {
    let db = Database::open_in_memory().unwrap();
    db.conn
        .execute(
            "INSERT INTO sync_records (entity_type, local_id, local_version, state, updated_at)
             VALUES ('task', 'task-1', '1-0-1', 'sideways', 'now')",
            [],
        )
        .unwrap();

    let err = db.record(EntityType::Task, "task-1").unwrap_err();
    assert!(matches!(err, Error::CorruptedData(_)), "got {err:?}");
}
