// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn counting_debouncer(quiet_ms: u64) -> (EditDebouncer, Arc<AtomicUsize>) {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let debouncer = EditDebouncer::spawn(Duration::from_millis(quiet_ms), move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (debouncer, fired)
}

#[test]
fn reason_display() {
    assert_eq!(TriggerReason::ConnectivityRestored.to_string(), "connectivity_restored");
    assert_eq!(TriggerReason::LocalEdit.to_string(), "local_edit");
}

#[tokio::test(start_paused = true)]
async fn burst_of_edits_fires_once() {
    let (debouncer, fired) = counting_debouncer(500);

    for _ in 0..10 {
        debouncer.notify();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn separate_bursts_fire_separately() {
    let (debouncer, fired) = counting_debouncer(200);

    debouncer.notify();
    tokio::time::sleep(Duration::from_millis(300)).await;
    debouncer.notify();
    debouncer.notify();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn no_edits_never_fire() {
    let (_debouncer, fired) = counting_debouncer(100);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}
