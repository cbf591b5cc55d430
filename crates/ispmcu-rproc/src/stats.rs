// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Counters for conditions that are logged but never propagated.


use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters, updated from any context.
#[derive(Debug, Default)]
pub struct Stats {
    dropped_messages: AtomicU64,
    spurious_interrupts: AtomicU64,
    kicks_handled: AtomicU64,
    messages_handled: AtomicU64,
    max_kick_latency_ns: AtomicU64,
    crashes: AtomicU64,
    boots: AtomicU64,
}

/// Point-in-time copy of [`Stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Mailbox messages dropped (unregistered type, full queue, quiesced).
    pub dropped_messages: u64,
    /// Ring interrupts for a notify id with no virtqueue.
    pub spurious_interrupts: u64,
    /// Ring kicks processed by the kick worker.
    pub kicks_handled: u64,
    /// Typed messages delivered to a handler.
    pub messages_handled: u64,
    /// Longest time a kick waited in the queue.
    pub max_kick_latency: Duration,
    /// Crash reports.
    pub crashes: u64,
    /// Successful boots.
    pub boots: u64,
}

impl Stats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_drop(&self) {
        self.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_spurious(&self) {
        self.spurious_interrupts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_kick(&self, latency: Duration) {
        self.kicks_handled.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.max_kick_latency_ns.fetch_max(nanos, Ordering::Relaxed);
    }

    pub(crate) fn record_message(&self) {
        self.messages_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_crash(&self) {
        self.crashes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_boot(&self) {
        self.boots.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            spurious_interrupts: self.spurious_interrupts.load(Ordering::Relaxed),
            kicks_handled: self.kicks_handled.load(Ordering::Relaxed),
            messages_handled: self.messages_handled.load(Ordering::Relaxed),
            max_kick_latency: Duration::from_nanos(
                self.max_kick_latency_ns.load(Ordering::Relaxed),
            ),
            crashes: self.crashes.load(Ordering::Relaxed),
            boots: self.boots.load(Ordering::Relaxed),
        }
    }
}
