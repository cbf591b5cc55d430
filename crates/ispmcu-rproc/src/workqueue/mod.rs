// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Bounded deferred-work queue.
//!
//! A fixed pool of named worker threads fed by a lock-free bounded queue.
//! [`WorkQueue::push`] never blocks, so it is safe from the interrupt-like
//! mailbox context; a full queue hands the item back instead. Items leave
//! the queue in FIFO order. With a single worker they also run in order.
//!
//! [`WorkQueue::flush`] is the teardown barrier: it returns only once every
//! item pushed before the call has finished running.

#[cfg(test)]
mod workqueue_test;

use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};

type Handler<T> = Box<dyn Fn(T) + Send + Sync>;

struct Shared<T> {
    name: String,
    queue: ArrayQueue<T>,
    /// Items pushed and not yet finished.
    pending: AtomicUsize,
    shutdown: AtomicBool,
    idle: Mutex<()>,
    drained: Condvar,
    handler: Handler<T>,
}

impl<T> Shared<T> {
    fn run(&self) {
        loop {
            while let Some(item) = self.queue.pop() {
                if catch_unwind(AssertUnwindSafe(|| (self.handler)(item))).is_err() {
                    tracing::error!(queue = %self.name, "work item panicked");
                }
                self.complete();
            }
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            thread::park();
        }
    }

    fn complete(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _idle = self.idle.lock();
            self.drained.notify_all();
        }
    }
}

/// Worker pool with a bounded FIFO queue.
pub struct WorkQueue<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    workers: Vec<JoinHandle<()>>,
    worker_ids: Vec<ThreadId>,
    next: AtomicUsize,
}

impl<T: Send + 'static> WorkQueue<T> {
    /// Starts `workers` threads named `<name>/<n>` serving up to `capacity`
    /// queued items with `handler`.
    pub fn new<F>(name: &str, workers: usize, capacity: usize, handler: F) -> io::Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            name: name.to_owned(),
            queue: ArrayQueue::new(capacity.max(1)),
            pending: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            idle: Mutex::new(()),
            drained: Condvar::new(),
            handler: Box::new(handler),
        });

        let mut queue = Self {
            shared,
            workers: Vec::new(),
            worker_ids: Vec::new(),
            next: AtomicUsize::new(0),
        };
        for index in 0..workers.max(1) {
            let shared = queue.shared.clone();
            // On error `queue` is dropped, which stops the workers spawned so far.
            let worker = thread::Builder::new()
                .name(format!("{name}/{index}"))
                .spawn(move || shared.run())?;
            queue.worker_ids.push(worker.thread().id());
            queue.workers.push(worker);
        }
        Ok(queue)
    }

    /// Queues an item without blocking. Returns the item if the queue is
    /// full or shutting down.
    pub fn push(&self, item: T) -> Result<(), T> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(item);
        }
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(item) = self.shared.queue.push(item) {
            self.shared.complete();
            return Err(item);
        }
        let next = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[next].thread().unpark();
        Ok(())
    }

    /// Waits until every pushed item has finished.
    ///
    /// Called from one of this queue's own workers it returns immediately,
    /// since waiting there could never finish.
    pub fn flush(&self) {
        if self.worker_ids.contains(&thread::current().id()) {
            tracing::warn!(queue = %self.shared.name, "flush from own worker skipped");
            return;
        }
        let mut idle = self.shared.idle.lock();
        while self.shared.pending.load(Ordering::Acquire) != 0 {
            self.shared.drained.wait(&mut idle);
        }
    }

    /// Items pushed and not yet finished.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Maximum number of queued items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }
}

impl<T: Send + 'static> Drop for WorkQueue<T> {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        for worker in &self.workers {
            worker.thread().unpark();
        }
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::error!(queue = %self.shared.name, "worker thread panicked");
            }
        }
    }
}
