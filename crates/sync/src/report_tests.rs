// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn add_pass_accumulates() {
    let mut report = CycleReport::new(Utc::now());

    let mut goals = PassReport::new(EntityType::Goal);
    goals.pushed = 2;
    goals.conflicts_resolved = 1;
    let mut tasks = PassReport::new(EntityType::Task);
    tasks.pulled = 3;
    tasks.deferred = 1;
    tasks.errors.push("pull task: request timed out".into());

    report.add_pass(goals);
    report.add_pass(tasks);

    assert_eq!(report.pushed, 2);
    assert_eq!(report.pulled, 3);
    assert_eq!(report.conflicts_resolved, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(report.passes.len(), 2);
    assert_eq!(report.errors, vec!["pull task: request timed out".to_string()]);
    assert!(report.has_errors());
    assert!(!report.is_quiet());
}

#[test]
fn empty_report_is_quiet() {
    let report = CycleReport::new(Utc::now());
    assert!(report.is_quiet());
    assert!(!report.has_errors());
}

#[test]
fn failed_records_count_as_errors() {
    let mut pass = PassReport::new(EntityType::Tag);
    assert!(!pass.has_errors());
    pass.failed = 1;
    assert!(pass.has_errors());
}
