// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Per-pass and per-cycle sync summaries.

use chrono::{DateTime, Utc};
use serde::Serialize;

use stint_core::EntityType;

/// Outcome counts for one entity type in one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub entity_type: EntityType,
    /// Local changes written to the remote (creates, updates, deletes).
    pub pushed: usize,
    /// Remote changes written locally (applies and deletes).
    pub pulled: usize,
    pub conflicts_resolved: usize,
    pub failed: usize,
    /// Records waiting on a reference that is not synced yet.
    pub deferred: usize,
    /// Records left alone: backing off, terminal, or raced by a local edit.
    pub skipped: usize,
    /// Failures that are not tied to one record, such as a failed pull.
    pub errors: Vec<String>,
}

impl PassReport {
    pub fn new(entity_type: EntityType) -> Self {
        PassReport {
            entity_type,
            pushed: 0,
            pulled: 0,
            conflicts_resolved: 0,
            failed: 0,
            deferred: 0,
            skipped: 0,
            errors: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.failed > 0 || !self.errors.is_empty()
    }
}

/// Aggregate of one sync cycle, delivered to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pushed: usize,
    pub pulled: usize,
    pub conflicts_resolved: usize,
    pub failed: usize,
    pub deferred: usize,
    pub skipped: usize,
    /// The cycle stopped early because it was cancelled.
    pub cancelled: bool,
    pub errors: Vec<String>,
    pub passes: Vec<PassReport>,
}

impl CycleReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        CycleReport {
            started_at,
            finished_at: started_at,
            pushed: 0,
            pulled: 0,
            conflicts_resolved: 0,
            failed: 0,
            deferred: 0,
            skipped: 0,
            cancelled: false,
            errors: Vec::new(),
            passes: Vec::new(),
        }
    }

    /// Fold a finished pass into the totals.
    pub fn add_pass(&mut self, pass: PassReport) {
        self.pushed += pass.pushed;
        self.pulled += pass.pulled;
        self.conflicts_resolved += pass.conflicts_resolved;
        self.failed += pass.failed;
        self.deferred += pass.deferred;
        self.skipped += pass.skipped;
        self.errors.extend(pass.errors.iter().cloned());
        self.passes.push(pass);
    }

    pub fn has_errors(&self) -> bool {
        self.failed > 0 || !self.errors.is_empty()
    }

    /// Nothing was pushed, pulled or resolved.
    pub fn is_quiet(&self) -> bool {
        self.pushed == 0 && self.pulled == 0 && self.conflicts_resolved == 0
    }
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
