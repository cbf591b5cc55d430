// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the deferred-work queue.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::mpsc;
use std::sync::{OnceLock, Weak};
use std::time::Duration;

use super::*;

#[test]
fn runs_every_item() {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let queue = WorkQueue::new("count", 3, 64, move |n: usize| {
        seen.fetch_add(n, Ordering::SeqCst);
    })
    .unwrap();

    for n in 1..=10 {
        queue.push(n).unwrap();
    }
    queue.flush();
    assert_eq!(count.load(Ordering::SeqCst), 55);
    assert_eq!(queue.pending(), 0);
}

#[test]
fn single_worker_preserves_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();
    let queue = WorkQueue::new("fifo", 1, 128, move |n: u32| seen.lock().push(n)).unwrap();

    for n in 0..100 {
        queue.push(n).unwrap();
    }
    queue.flush();
    assert_eq!(*order.lock(), (0..100).collect::<Vec<_>>());
}

#[test]
fn workers_are_named() {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let queue = WorkQueue::new("kick", 1, 4, move |(): ()| {
        let name = thread::current().name().map(str::to_owned);
        tx.lock().send(name).unwrap();
    })
    .unwrap();
    queue.push(()).unwrap();
    assert_eq!(rx.recv().unwrap().as_deref(), Some("kick/0"));
}

#[test]
fn full_queue_hands_item_back() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);
    let release_rx = Mutex::new(release_rx);
    let queue = WorkQueue::new("full", 1, 1, move |n: u32| {
        started_tx.lock().send(n).unwrap();
        release_rx.lock().recv().unwrap();
    })
    .unwrap();

    queue.push(1).unwrap();
    assert_eq!(started_rx.recv().unwrap(), 1);
    queue.push(2).unwrap();
    assert_eq!(queue.push(3), Err(3));
    assert_eq!(queue.pending(), 2);

    release_tx.send(()).unwrap();
    release_tx.send(()).unwrap();
    queue.flush();
    assert_eq!(queue.pending(), 0);
}

#[test]
fn flush_waits_for_in_flight_item() {
    let (started_tx, started_rx) = mpsc::channel();
    let started_tx = Mutex::new(started_tx);
    let finished = Arc::new(AtomicBool::new(false));
    let done = finished.clone();
    let queue = WorkQueue::new("slow", 1, 4, move |(): ()| {
        started_tx.lock().send(()).unwrap();
        thread::sleep(Duration::from_millis(50));
        done.store(true, Ordering::SeqCst);
    })
    .unwrap();

    queue.push(()).unwrap();
    started_rx.recv().unwrap();
    queue.flush();
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn panicking_item_still_completes() {
    let queue = WorkQueue::new("panic", 1, 4, |fail: bool| {
        assert!(!fail, "item failed");
    })
    .unwrap();
    queue.push(true).unwrap();
    queue.push(false).unwrap();
    queue.flush();
    assert_eq!(queue.pending(), 0);
}

#[test]
fn flush_from_own_worker_returns() {
    let slot: Arc<OnceLock<Weak<WorkQueue<()>>>> = Arc::default();
    let inner = slot.clone();
    let finished = Arc::new(AtomicBool::new(false));
    let done = finished.clone();
    let queue = Arc::new(
        WorkQueue::new("reentrant", 1, 4, move |(): ()| {
            if let Some(queue) = inner.get().and_then(Weak::upgrade) {
                queue.flush();
            }
            done.store(true, Ordering::SeqCst);
        })
        .unwrap(),
    );
    slot.set(Arc::downgrade(&queue)).unwrap();

    queue.push(()).unwrap();
    queue.flush();
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn drop_drains_queue() {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let queue = WorkQueue::new("drain", 1, 16, move |(): ()| {
        thread::sleep(Duration::from_millis(2));
        seen.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    for _ in 0..5 {
        queue.push(()).unwrap();
    }
    drop(queue);
    assert_eq!(count.load(Ordering::SeqCst), 5);
}

#[test]
fn zero_sizes_are_clamped() {
    let queue = WorkQueue::new("tiny", 0, 0, |(): ()| {}).unwrap();
    assert_eq!(queue.capacity(), 1);
    queue.push(()).unwrap();
    queue.flush();
}
