// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use yare::parameterized;

#[parameterized(
    entity_not_found = { Error::EntityNotFound { entity_type: "task".into(), id: "task-1".into() }, "task-1" },
    invalid_type = { Error::InvalidEntityType("epic".into()), "epic" },
    invalid_state = { Error::InvalidSyncState("dirty".into()), "dirty" },
    corrupted = { Error::CorruptedData("bad row".into()), "bad row" },
)]
fn error_display_contains(err: Error, expected: &str) {
    assert!(err.to_string().contains(expected));
}

#[test]
fn stale_record_is_stale() {
    let err = Error::StaleRecord {
        entity_type: "task".into(),
        local_id: "task-1".into(),
        expected: 3,
    };
    assert!(err.is_stale());
    assert!(err.to_string().contains("revision 3"));
    assert!(!Error::InvalidInput("x".into()).is_stale());
}

#[test]
fn error_from_io() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let err: Error = io_err.into();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn error_from_json() {
    let json_err = serde_json::from_str::<()>("invalid").unwrap_err();
    let err: Error = json_err.into();
    assert!(matches!(err, Error::Json(_)));
}
