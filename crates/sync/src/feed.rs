// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Change notifications for UI layers.
//!
//! The executor publishes an event after each ledger commit that changed
//! what the user sees or what the remote holds. Listeners run on the
//! executor's task and should return quickly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use stint_core::EntityType;

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Remote state was written to the local store.
    Updated,
    /// The entity was removed from the local store.
    Deleted,
    /// A local change reached the remote.
    Pushed,
    /// A deletion was confirmed on both sides and the record dropped.
    Purged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub entity_type: EntityType,
    pub local_id: String,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(entity_type: EntityType, local_id: impl Into<String>, kind: ChangeKind) -> Self {
        ChangeEvent { entity_type, local_id: local_id.into(), kind }
    }
}

/// Handle returned by [`ChangeFeed::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    /// `None` listens to every type.
    entity_type: Option<EntityType>,
    listener: Listener,
}

#[derive(Default)]
pub struct ChangeFeed {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen to changes of one entity type, or of all types when `None`.
    pub fn subscribe<F>(&self, entity_type: Option<EntityType>, listener: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner()).push(Subscription {
            id,
            entity_type,
            listener: Arc::new(listener),
        });
        id
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn publish(&self, event: &ChangeEvent) {
        // listeners are called without the lock so they may (un)subscribe
        let listeners: Vec<Listener> = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.entity_type.map_or(true, |t| t == event.entity_type))
            .map(|s| Arc::clone(&s.listener))
            .collect();

        for listener in listeners {
            listener(event);
        }
    }
}

#[cfg(test)]
#[path = "feed_tests.rs"]
mod tests;
