// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Retry scheduling for records whose sync failed.
//!
//! A failed record waits `base * 2^retry_count` (capped) before it becomes
//! eligible again. A random fraction of the delay is shaved off so records
//! that failed together do not all retry in the same instant. After
//! `max_attempts` failures the record is terminal and only a manual retry
//! brings it back.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::record::{SyncRecord, SyncState};

/// Limits for retrying failed records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Failures after which a record stops being retried automatically.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Largest fraction of a delay removed as jitter, in `[0, 1)`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15 * 60),
            jitter: 0.2,
        }
    }
}

/// Source of jitter samples in `[0, 1)`.
pub trait JitterSource: Send + Sync {
    fn sample(&self) -> f64;
}

/// Jitter from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// No jitter at all. Makes delays exact, for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn sample(&self) -> f64 {
        0.0
    }
}

/// Decides whether and when failed records are retried.
#[derive(Debug, Clone)]
pub struct RetryScheduler<J: JitterSource = RandomJitter> {
    policy: RetryPolicy,
    jitter: J,
}

impl RetryScheduler<RandomJitter> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_jitter(policy, RandomJitter)
    }
}

impl<J: JitterSource> RetryScheduler<J> {
    pub fn with_jitter(policy: RetryPolicy, jitter: J) -> Self {
        RetryScheduler { policy, jitter }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// False once the record used up its attempts.
    pub fn should_retry(&self, record: &SyncRecord) -> bool {
        record.retry_count < self.policy.max_attempts
    }

    /// A failed record that will not be retried automatically.
    pub fn is_terminal(&self, record: &SyncRecord) -> bool {
        record.state == SyncState::Failed && !self.should_retry(record)
    }

    /// Backoff for a record that has failed `retry_count` times, before jitter.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.policy
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.policy.max_delay)
            .min(self.policy.max_delay)
    }

    /// When the record may next be attempted, given it fails now.
    ///
    /// Uses the retry count before this failure is counted, so the first
    /// failure waits `base_delay`.
    pub fn next_eligible_time(&self, record: &SyncRecord, now_ms: u64) -> u64 {
        let delay = self.delay(record.retry_count);
        let ratio = self.policy.jitter.clamp(0.0, 1.0) * self.jitter.sample().clamp(0.0, 1.0);
        let shaved = delay.mul_f64(1.0 - ratio);
        now_ms.saturating_add(shaved.as_millis() as u64)
    }

    /// Whether an automatic cycle may attempt this record now.
    pub fn is_eligible(&self, record: &SyncRecord, now_ms: u64) -> bool {
        if record.state != SyncState::Failed {
            return true;
        }
        self.should_retry(record) && record.next_attempt_at.map_or(true, |at| now_ms >= at)
    }
}

impl Default for RetryScheduler<RandomJitter> {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
