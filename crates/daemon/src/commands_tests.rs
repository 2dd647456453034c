// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use chrono::{TimeZone, Utc};
use serde_json::json;
use stint_core::{SyncState, Version};
use tempfile::TempDir;
use yare::parameterized;

fn temp_config() -> (TempDir, Config) {
    let temp = TempDir::new().unwrap();
    let config = Config {
        database: Some(temp.path().join("local.db")),
        state_dir: Some(temp.path().join("state")),
        remote: crate::config::RemoteConfig { path: Some(temp.path().join("remote.db")) },
        ..Config::default()
    };
    (temp, config)
}

fn open(config: &Config) -> Database {
    Database::open(&config.database_path()).unwrap()
}

#[parameterized(
    object = { r#"{"title": "Run"}"# },
    empty_object = { "{}" },
    nested = { r#"{"meta": {"done": false}, "tags": [1, 2]}"# },
)]
fn fields_accept_objects(raw: &str) {
    assert!(parse_fields(raw).unwrap().is_object());
}

#[parameterized(
    array = { "[1, 2]" },
    string = { r#""title""# },
    number = { "3" },
    not_json = { "{title: Run}" },
)]
fn fields_reject_everything_else(raw: &str) {
    assert!(matches!(parse_fields(raw), Err(Error::InvalidFields(_))));
}

#[test]
fn put_records_a_pending_push() {
    let (_temp, config) = temp_config();
    put(&config, "goal", "g1", r#"{"title": "Fit"}"#, &[]).unwrap();
    put(&config, "task", "t1", r#"{"title": "Run"}"#, &["goal:g1".to_string()]).unwrap();

    let db = open(&config);
    let task = db.get_entity(EntityType::Task, "t1").unwrap().unwrap();
    assert_eq!(task.fields, json!({ "title": "Run" }));
    assert_eq!(task.refs, vec![EntityRef::new(EntityType::Goal, "g1")]);
    assert_eq!(task.version.node_id, config.sync.node_id);

    let record = db.record(EntityType::Task, "t1").unwrap().unwrap();
    assert_eq!(record.state, SyncState::PendingPush);
    assert_eq!(record.local_version, task.version);
}

#[test]
fn repeated_put_orders_after_previous_version() {
    let (_temp, config) = temp_config();
    {
        // a version far in the future, as if from a device with a fast clock
        let mut db = open(&config);
        let future = Version::new(u64::MAX / 2, 7, 9);
        db.save_entity(&EntitySnapshot::new(EntityType::Tag, "x", future, json!({}))).unwrap();
    }

    put(&config, "tag", "x", r#"{"name": "gym"}"#, &[]).unwrap();

    let entity = open(&config).get_entity(EntityType::Tag, "x").unwrap().unwrap();
    assert!(entity.version > Version::new(u64::MAX / 2, 7, 9));
    assert_eq!(entity.fields, json!({ "name": "gym" }));
}

#[test]
fn put_rejects_bad_input() {
    let (_temp, config) = temp_config();
    let err = put(&config, "project", "p1", "{}", &[]).unwrap_err();
    assert!(err.to_string().contains("invalid entity type"));

    let err = put(&config, "task", "t1", "[]", &[]).unwrap_err();
    assert!(matches!(err, Error::InvalidFields(_)));

    let err = put(&config, "task", "t1", "{}", &["goal".to_string()]).unwrap_err();
    assert!(err.to_string().contains("expected TYPE:ID"));
}

#[test]
fn delete_removes_entity_and_leaves_tombstone() {
    let (_temp, config) = temp_config();
    put(&config, "checkup", "c1", r#"{"mood": 3}"#, &[]).unwrap();
    delete(&config, "checkup", "c1").unwrap();

    let db = open(&config);
    assert!(db.get_entity(EntityType::Checkup, "c1").unwrap().is_none());
}

#[test]
fn once_pushes_local_edits() {
    let (_temp, config) = temp_config();
    put(&config, "goal", "g1", r#"{"title": "Fit"}"#, &[]).unwrap();

    once(&config, true).unwrap();

    let record = open(&config).record(EntityType::Goal, "g1").unwrap().unwrap();
    assert_eq!(record.state, SyncState::Clean);
    assert!(record.remote_id.is_some());
}

#[test]
fn once_is_refused_while_lock_is_held() {
    let (_temp, config) = temp_config();
    let _held = acquire_lock(&config.state_dir()).unwrap();
    assert!(matches!(once(&config, false), Err(Error::AlreadyRunning(_))));
    assert!(daemon_running(&config.state_dir()));
}

#[test]
fn retry_requires_a_failed_record() {
    let (_temp, config) = temp_config();
    put(&config, "goal", "g1", "{}", &[]).unwrap();
    let err = retry(&config, "goal", "g1").unwrap_err();
    assert!(err.to_string().contains("g1"), "{err}");

    let err = retry(&config, "goal", "missing").unwrap_err();
    assert!(err.to_string().contains("not found"), "{err}");
}

#[test]
fn retry_with_daemon_running_only_resets() {
    let (_temp, config) = temp_config();
    {
        let mut db = open(&config);
        let record = db
            .save_entity(&EntitySnapshot::new(EntityType::Goal, "g1", Version::new(5, 0, 1), json!({})))
            .unwrap();
        db.mark_failed(&record, "offline", None).unwrap();
    }
    let _held = acquire_lock(&config.state_dir()).unwrap();

    retry(&config, "goal", "g1").unwrap();

    let record = open(&config).record(EntityType::Goal, "g1").unwrap().unwrap();
    assert_eq!(record.state, SyncState::PendingPush);
    assert_eq!(record.retry_count, 0);
}

#[test]
fn format_report_lists_counts_and_errors() {
    let started = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
    let mut report = CycleReport::new(started);
    report.finished_at = started + chrono::Duration::milliseconds(250);
    report.pushed = 2;
    report.pulled = 1;
    report.failed = 1;
    report.errors.push("task:t1: request timed out".to_string());

    let text = format_report(&report);
    assert!(text.starts_with("Cycle finished at 2026-03-01 09:30:00 (250 ms)\n"), "{text}");
    assert!(text.contains("pushed: 2, pulled: 1, conflicts resolved: 0"));
    assert!(text.contains("failed: 1, deferred: 0, skipped: 0"));
    assert!(text.contains("error: task:t1: request timed out"));
    assert!(!text.contains("cancelled"));
}

#[test]
fn format_status_when_everything_is_clean() {
    assert_eq!(format_status(false, &[]), "Daemon: stopped\nAll records in sync\n");
}

#[test]
fn format_status_describes_each_record() {
    let mut failed = SyncRecord::local(EntityType::Task, "t1", Version::new(1, 0, 1));
    failed.state = SyncState::Failed;
    failed.retry_count = 5;
    failed.last_error = Some("request timed out".to_string());
    let mut deleted = SyncRecord::local(EntityType::Tag, "x", Version::new(2, 0, 1));
    deleted.tombstone = true;

    let text = format_status(true, &[failed, deleted]);
    assert_eq!(
        text,
        "Daemon: running\n2 record(s) not in sync:\n  \
         task:t1 failed (attempt 5): request timed out\n  \
         tag:x pending_push [deleted]\n"
    );
}
