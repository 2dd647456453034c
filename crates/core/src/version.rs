// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Edit versions for sync ordering.
//!
//! A [`Version`] is a hybrid logical clock timestamp: wall clock time plus a
//! logical counter, with the node id as a final tiebreaker. Versions stay
//! ordered across devices even when their clocks disagree.
//!
//! Format: `{wall_ms}-{counter}-{node_id}`
//!
//! Ordering rules:
//! 1. Higher wall_ms wins
//! 2. If wall_ms equal, higher counter wins
//! 3. If both equal, higher node_id wins

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// A version stamp for one edit of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Wall clock time in milliseconds since Unix epoch.
    pub wall_ms: u64,
    /// Logical counter for edits within the same millisecond.
    pub counter: u32,
    /// Node that produced the version.
    pub node_id: u32,
}

impl Version {
    pub fn new(wall_ms: u64, counter: u32, node_id: u32) -> Self {
        Version { wall_ms, counter, node_id }
    }

    /// The earliest possible version. Placeholder for records that have no
    /// local copy yet.
    pub fn min() -> Self {
        Version { wall_ms: 0, counter: 0, node_id: 0 }
    }

    /// Parses a version from its string representation.
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    /// Returns true if this version is strictly greater than the other.
    pub fn is_after(&self, other: &Version) -> bool {
        self > other
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wall_ms
            .cmp(&other.wall_ms)
            .then_with(|| self.counter.cmp(&other.counter))
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.wall_ms, self.counter, self.node_id)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('-');
        let (Some(wall), Some(counter), Some(node), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidVersion(format!(
                "expected format 'wall_ms-counter-node_id', got '{s}'"
            )));
        };

        let wall_ms = wall
            .parse::<u64>()
            .map_err(|_| Error::InvalidVersion(format!("invalid wall_ms '{wall}' in '{s}'")))?;
        let counter = counter
            .parse::<u32>()
            .map_err(|_| Error::InvalidVersion(format!("invalid counter '{counter}' in '{s}'")))?;
        let node_id = node
            .parse::<u32>()
            .map_err(|_| Error::InvalidVersion(format!("invalid node_id '{node}' in '{s}'")))?;

        Ok(Version::new(wall_ms, counter, node_id))
    }
}

/// The (local, remote) version pair observed at the last successful
/// convergence. This is the common ancestor for three-way comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPair {
    pub local: Option<Version>,
    pub remote: Option<Version>,
}

impl VersionPair {
    pub fn new(local: Option<Version>, remote: Option<Version>) -> Self {
        VersionPair { local, remote }
    }

    /// A pair where both sides converged on the given versions.
    pub fn synced(local: Version, remote: Version) -> Self {
        VersionPair { local: Some(local), remote: Some(remote) }
    }

    /// True before the first successful sync.
    pub fn is_empty(&self) -> bool {
        self.local.is_none() && self.remote.is_none()
    }
}

/// Source of wall clock time in milliseconds.
///
/// Injected so tests can drive time by hand.
pub trait ClockSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
    }
}

impl<C: ClockSource + ?Sized> ClockSource for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

impl<C: ClockSource + ?Sized> ClockSource for std::sync::Arc<C> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// A clock that only moves when told to. Used by tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    time_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(initial_ms: u64) -> Self {
        ManualClock { time_ms: AtomicU64::new(initial_ms) }
    }

    pub fn set(&self, ms: u64) {
        self.time_ms.store(ms, AtomicOrdering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.time_ms.fetch_add(ms, AtomicOrdering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn now_ms(&self) -> u64 {
        self.time_ms.load(AtomicOrdering::SeqCst)
    }
}

/// Issues monotonically increasing versions for local edits.
///
/// Thread-safe. Never goes backwards, even when the wall clock does, and
/// always moves past any version passed to [`VersionClock::receive`].
pub struct VersionClock<C: ClockSource = SystemClock> {
    clock: C,
    node_id: u32,
    /// Last issued (wall_ms, counter).
    last: Mutex<(u64, u32)>,
}

impl VersionClock<SystemClock> {
    pub fn new(node_id: u32) -> Self {
        Self::with_clock(SystemClock, node_id)
    }
}

impl<C: ClockSource> VersionClock<C> {
    pub fn with_clock(clock: C, node_id: u32) -> Self {
        VersionClock { clock, node_id, last: Mutex::new((0, 0)) }
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Issues a version for a new local edit.
    pub fn now(&self) -> Version {
        let physical = self.clock.now_ms();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());

        *last = if physical > last.0 { (physical, 0) } else { next_after(last.0, last.1) };

        Version::new(last.0, last.1, self.node_id)
    }

    /// Observes a version produced elsewhere (usually a pulled remote
    /// version). Every version issued afterwards orders after it.
    pub fn receive(&self, received: &Version) -> Version {
        let physical = self.clock.now_ms();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());

        *last = if physical > last.0 && physical > received.wall_ms {
            (physical, 0)
        } else if received.wall_ms > last.0 {
            next_after(received.wall_ms, received.counter)
        } else if received.wall_ms == last.0 {
            next_after(last.0, last.1.max(received.counter))
        } else {
            next_after(last.0, last.1)
        };

        Version::new(last.0, last.1, self.node_id)
    }
}

/// The (wall_ms, counter) pair right after the given one. A full counter
/// carries into the next millisecond.
fn next_after(wall_ms: u64, counter: u32) -> (u64, u32) {
    match counter.checked_add(1) {
        Some(counter) => (wall_ms, counter),
        None => (wall_ms.saturating_add(1), 0),
    }
}

#[cfg(test)]
#[path = "version_tests.rs"]
mod tests;
