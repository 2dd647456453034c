// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Why cycles start, and collapsing edit bursts into one trigger.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What asked for a sync cycle. Logged with each trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// The app came to the foreground.
    Foreground,
    ConnectivityRestored,
    /// A burst of local edits went quiet.
    LocalEdit,
    Periodic,
    /// The user asked for it, e.g. a manual retry.
    Manual,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::Foreground => "foreground",
            TriggerReason::ConnectivityRestored => "connectivity_restored",
            TriggerReason::LocalEdit => "local_edit",
            TriggerReason::Periodic => "periodic",
            TriggerReason::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fires a callback once local edits have been quiet for a while.
///
/// Every [`EditDebouncer::notify`] restarts the quiet period. The background
/// task ends when the debouncer is dropped.
pub struct EditDebouncer {
    tx: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

impl EditDebouncer {
    /// Must be called within a tokio runtime.
    pub fn spawn<F>(quiet: Duration, on_quiet: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let task = tokio::spawn(async move {
            // wait for the first edit of a burst
            while rx.recv().await.is_some() {
                loop {
                    tokio::select! {
                        more = rx.recv() => {
                            if more.is_none() {
                                return;
                            }
                        }
                        _ = tokio::time::sleep(quiet) => {
                            on_quiet();
                            break;
                        }
                    }
                }
            }
        });
        EditDebouncer { tx, task }
    }

    /// Report a local edit.
    pub fn notify(&self) {
        let _ = self.tx.send(());
    }
}

impl Drop for EditDebouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
#[path = "trigger_tests.rs"]
mod tests;
