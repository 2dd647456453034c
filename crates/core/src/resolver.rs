// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Three-way conflict resolution for a single record.
//!
//! [`resolve`] compares each side against the last synced pair (the common
//! ancestor) and decides what to do:
//!
//! | local     | remote    | local changed | remote changed | action          |
//! |-----------|-----------|---------------|----------------|-----------------|
//! | present   | absent    | no            | -              | delete local    |
//! | absent    | present   | -             | -              | apply remote    |
//! | present   | present   | no            | yes            | apply remote    |
//! | present   | present   | yes           | no             | push local      |
//! | present   | present   | yes           | yes            | conflict        |
//! | absent    | absent    | -             | -              | purge tombstone |
//!
//! Further rules:
//! - A local entity the remote has never seen is pushed.
//! - A local tombstone is pushed as a remote delete unless the remote changed,
//!   which is a conflict (delete vs edit).
//! - A local edit against a remote deletion is a conflict (edit vs delete).
//! - A local row that is missing without a tombstone is restored from remote.
//!
//! Conflicts are settled last-writer-wins on the raw versions. The strictly
//! greater version wins; on an exact tie the remote wins.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entity::EntitySnapshot;
use crate::version::{Version, VersionPair};

/// One side of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Local,
    Remote,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Local => "local",
            Side::Remote => "remote",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A write the executor carries out to converge one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Write the remote snapshot into the local store.
    ApplyRemote,
    /// Send the local snapshot to the remote (create or update).
    PushLocal,
    /// Remove the entity from the local store.
    DeleteLocal,
    /// Remove the entity from the remote.
    DeleteRemote,
}

/// A concurrent edit on both sides and how last-writer-wins settled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict {
    pub local_version: Version,
    pub remote_version: Version,
    pub winner: Side,
    /// What applying the winner means for this record.
    pub effect: Effect,
}

/// Outcome of resolving one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Both sides already match the last synced pair.
    Noop,
    ApplyRemote,
    PushLocal,
    DeleteLocal,
    DeleteRemote,
    /// Both sides are gone; the ledger row can be dropped.
    PurgeTombstone,
    Conflict(Conflict),
}

impl Action {
    /// The write this action requires, if any.
    pub fn effect(&self) -> Option<Effect> {
        match self {
            Action::Noop | Action::PurgeTombstone => None,
            Action::ApplyRemote => Some(Effect::ApplyRemote),
            Action::PushLocal => Some(Effect::PushLocal),
            Action::DeleteLocal => Some(Effect::DeleteLocal),
            Action::DeleteRemote => Some(Effect::DeleteRemote),
            Action::Conflict(conflict) => Some(conflict.effect),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Action::Conflict(_))
    }
}

/// How one side looks relative to the ancestor.
#[derive(Debug, Clone, Copy)]
enum Presence {
    /// The entity exists at this version.
    Live(Version),
    /// The entity was deleted; the version is the deletion (or the last
    /// version known before it vanished).
    Gone(Version),
    /// This side never had the entity.
    Never,
}

fn local_presence(local: Option<&EntitySnapshot>) -> Presence {
    match local {
        Some(s) if s.deleted => Presence::Gone(s.version),
        Some(s) => Presence::Live(s.version),
        // a missing row without a tombstone is restored, not deleted
        None => Presence::Never,
    }
}

fn remote_presence(remote: Option<&EntitySnapshot>, ancestor: Option<Version>) -> Presence {
    match (remote, ancestor) {
        (Some(s), _) if s.deleted => Presence::Gone(s.version),
        (Some(s), _) => Presence::Live(s.version),
        (None, Some(known)) => Presence::Gone(known),
        (None, None) => Presence::Never,
    }
}

fn changed(current: Version, ancestor: Option<Version>) -> bool {
    ancestor != Some(current)
}

/// Picks the winner of a concurrent edit. Ties go to the remote.
pub fn last_writer(local: Version, remote: Version) -> Side {
    if local > remote {
        Side::Local
    } else {
        Side::Remote
    }
}

fn conflict(local: Version, remote: Version, if_local: Effect, if_remote: Effect) -> Action {
    let winner = last_writer(local, remote);
    let effect = match winner {
        Side::Local => if_local,
        Side::Remote => if_remote,
    };
    Action::Conflict(Conflict {
        local_version: local,
        remote_version: remote,
        winner,
        effect,
    })
}

/// Decides how to converge one record.
///
/// `local` is the local snapshot (a tombstone snapshot for a locally deleted
/// entity), `remote` the remote snapshot as currently known, and
/// `last_synced` the pair recorded at the last successful sync.
pub fn resolve(
    local: Option<&EntitySnapshot>,
    remote: Option<&EntitySnapshot>,
    last_synced: &VersionPair,
) -> Action {
    let local = local_presence(local);
    let remote = remote_presence(remote, last_synced.remote);

    match (local, remote) {
        (Presence::Live(l), Presence::Live(r)) => {
            match (changed(l, last_synced.local), changed(r, last_synced.remote)) {
                (false, false) => Action::Noop,
                (false, true) => Action::ApplyRemote,
                (true, false) => Action::PushLocal,
                (true, true) => conflict(l, r, Effect::PushLocal, Effect::ApplyRemote),
            }
        }
        (Presence::Live(l), Presence::Gone(r)) => {
            if changed(l, last_synced.local) {
                conflict(l, r, Effect::PushLocal, Effect::DeleteLocal)
            } else {
                Action::DeleteLocal
            }
        }
        (Presence::Live(_), Presence::Never) => Action::PushLocal,
        (Presence::Gone(l), Presence::Live(r)) => {
            if changed(r, last_synced.remote) {
                conflict(l, r, Effect::DeleteRemote, Effect::ApplyRemote)
            } else {
                Action::DeleteRemote
            }
        }
        (Presence::Never, Presence::Live(_)) => Action::ApplyRemote,
        (Presence::Gone(_) | Presence::Never, Presence::Gone(_) | Presence::Never) => {
            Action::PurgeTombstone
        }
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
