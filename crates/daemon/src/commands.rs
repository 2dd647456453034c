// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot operator commands.

use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;
use stint_core::{Database, EntityRef, EntitySnapshot, EntityType, SyncRecord, VersionClock};
use stint_sync::{lock, CycleReport};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::runner::{acquire_lock, block_on, daemon_running, Engine};

/// Runs one cycle now and prints its report.
pub fn once(config: &Config, json: bool) -> Result<()> {
    let _lock = acquire_lock(&config.state_dir())?;
    let engine = Engine::open(config)?;
    let report = block_on(engine.coordinator.run_cycle())??;
    print_report(&report, json)
}

/// Lists the records that need attention.
pub fn status(config: &Config, json: bool) -> Result<()> {
    let running = daemon_running(&config.state_dir());
    let db = Database::open(&config.database_path())?;
    let records = db.attention_records()?;
    if json {
        let status = Status { daemon: daemon_label(running), records };
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", format_status(running, &records));
    }
    Ok(())
}

/// Resets a failed record. Runs a cycle right away unless the daemon is
/// running, in which case it notices the reset as a local edit.
pub fn retry(config: &Config, entity_type: &str, id: &str) -> Result<()> {
    let entity_type = EntityType::from_str(entity_type)?;
    let state_dir = config.state_dir();

    let lock_file = match acquire_lock(&state_dir) {
        Ok(file) => file,
        Err(Error::AlreadyRunning(_)) => {
            let mut db = Database::open(&config.database_path())?;
            let record = db.reset_retry(entity_type, id)?;
            println!("Reset {} ({}), the running daemon will retry it", record.key(), record.state);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let engine = Engine::open(config)?;
    let coordinator = engine.coordinator.clone();
    // the triggered cycle is spawned, so the reset happens inside the runtime
    let record = block_on(async move {
        let (record, _) = coordinator.retry(entity_type, id)?;
        coordinator.wait_idle().await;
        Ok::<_, Error>(record)
    })??;
    println!("Reset {}", record.key());

    if let Some(report) = engine.coordinator.last_report() {
        print!("{}", format_report(&report));
    }
    let record = lock(&engine.db).record(entity_type, id)?;
    if let Some(record) = record {
        println!("{} is now {}", record.key(), record.state);
    }
    drop(lock_file);
    Ok(())
}

/// Creates or replaces an entity as a local edit.
pub fn put(
    config: &Config,
    entity_type: &str,
    id: &str,
    fields: &str,
    refs: &[String],
) -> Result<()> {
    let entity_type = EntityType::from_str(entity_type)?;
    let fields = parse_fields(fields)?;
    let refs = refs.iter().map(|r| EntityRef::from_str(r)).collect::<stint_core::Result<Vec<_>>>()?;

    let mut db = Database::open(&config.database_path())?;
    let version = next_version(config, &db, entity_type, id)?;
    let snapshot = EntitySnapshot::new(entity_type, id, version, fields).with_refs(refs);
    let record = db.save_entity(&snapshot)?;
    println!("Saved {} ({})", record.key(), record.state);
    Ok(())
}

/// Deletes an entity as a local edit.
pub fn delete(config: &Config, entity_type: &str, id: &str) -> Result<()> {
    let entity_type = EntityType::from_str(entity_type)?;
    let mut db = Database::open(&config.database_path())?;
    let version = next_version(config, &db, entity_type, id)?;
    match db.delete_entity(entity_type, id, version)? {
        Some(record) => println!("Deleted {} ({})", record.key(), record.state),
        None => println!("Deleted {}:{}", entity_type, id),
    }
    Ok(())
}

/// Checks that `--fields` is a JSON object.
pub fn parse_fields(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).map_err(|e| Error::InvalidFields(e.to_string()))?;
    if !value.is_object() {
        return Err(Error::InvalidFields(format!("expected a JSON object, got {raw}")));
    }
    Ok(value)
}

/// A version for a new edit that orders after everything already seen for
/// the record, even if this device's clock is behind.
fn next_version(
    config: &Config,
    db: &Database,
    entity_type: EntityType,
    id: &str,
) -> Result<stint_core::Version> {
    let clock = VersionClock::new(config.sync.node_id);
    let seen = db
        .record(entity_type, id)?
        .map(|r| r.remote_version.map_or(r.local_version, |remote| remote.max(r.local_version)));
    Ok(match seen {
        Some(seen) => clock.receive(&seen),
        None => clock.now(),
    })
}

#[derive(Serialize)]
struct Status {
    daemon: &'static str,
    records: Vec<SyncRecord>,
}

fn daemon_label(running: bool) -> &'static str {
    if running {
        "running"
    } else {
        "stopped"
    }
}

fn print_report(report: &CycleReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", format_report(report));
    }
    Ok(())
}

/// Human-readable cycle summary, one fact per line.
pub fn format_report(report: &CycleReport) -> String {
    let elapsed = report.finished_at - report.started_at;
    let mut out = format!(
        "Cycle finished at {} ({} ms){}\n",
        report.finished_at.format("%Y-%m-%d %H:%M:%S"),
        elapsed.num_milliseconds(),
        if report.cancelled { ", cancelled" } else { "" }
    );
    out.push_str(&format!(
        "  pushed: {}, pulled: {}, conflicts resolved: {}\n",
        report.pushed, report.pulled, report.conflicts_resolved
    ));
    out.push_str(&format!(
        "  failed: {}, deferred: {}, skipped: {}\n",
        report.failed, report.deferred, report.skipped
    ));
    for error in &report.errors {
        out.push_str(&format!("  error: {}\n", error));
    }
    out
}

pub fn format_status(running: bool, records: &[SyncRecord]) -> String {
    let mut out = format!("Daemon: {}\n", daemon_label(running));
    if records.is_empty() {
        out.push_str("All records in sync\n");
        return out;
    }
    out.push_str(&format!("{} record(s) not in sync:\n", records.len()));
    for record in records {
        out.push_str(&format!("  {} {}", record.key(), record.state));
        if record.retry_count > 0 {
            out.push_str(&format!(" (attempt {})", record.retry_count));
        }
        if record.tombstone {
            out.push_str(" [deleted]");
        }
        if let Some(error) = &record.last_error {
            out.push_str(&format!(": {}", error));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
