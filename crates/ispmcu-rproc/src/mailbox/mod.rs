// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Inbound mailbox dispatch.
//!
//! [`MailboxDispatcher::on_receive`] runs in the interrupt-like context of
//! the hardware mailbox. It only triages and enqueues:
//!
//! - A ring kick goes to the kick queue, served by a single worker that
//!   resolves the notify id through the [`VirtqueueManager`].
//! - A message with a registered handler is boxed and queued on the shared
//!   message queue, served by a small worker pool.
//! - Everything else is counted and dropped.
//!
//! Handlers are looked up again when the message runs, under the handler
//! lock, so once [`MailboxDispatcher::unregister`] returns the handler is
//! never invoked again.
//!
//! The accept check and the enqueue happen under one read lock on the
//! gate. [`MailboxDispatcher::quiesce`] takes it for writing, so after it
//! returns nothing new reaches the queues and [`MailboxDispatcher::flush`]
//! covers everything that did.


use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use ispmcu_abi::{MailboxMessage, MessageType};
use parking_lot::RwLock;

use crate::config::RprocConfig;
use crate::stats::Stats;
use crate::virtqueue::VirtqueueManager;
use crate::workqueue::WorkQueue;

/// Callback for one message type. Runs on a mailbox worker thread.
pub type MessageHandler = Arc<dyn Fn(&MailboxMessage) + Send + Sync>;

/// Mailbox errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    /// Types below [`MessageType::FIRST_USER`] belong to the protocol.
    #[error("message type {0} is reserved")]
    ReservedType(MessageType),
    /// Another owner already handles the type.
    #[error("message type {kind} already handled by `{owner}`")]
    AlreadyRegistered {
        /// The contested type.
        kind: MessageType,
        /// The current owner.
        owner: &'static str,
    },
    /// A worker thread could not be started.
    #[error("failed to start mailbox worker")]
    Spawn(#[from] io::Error),
}

/// Why [`MailboxDispatcher::on_receive`] dropped a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// The transfer carried no words.
    Empty,
    /// No handler for the type.
    Unregistered,
    /// The target queue is full.
    QueueFull,
    /// The dispatcher is quiesced.
    Quiesced,
}

/// Outcome of [`MailboxDispatcher::on_receive`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Queued on the kick queue.
    KickQueued,
    /// Queued on the message queue.
    Queued,
    /// Counted and dropped.
    Dropped(DropReason),
}

struct Registration {
    owner: &'static str,
    handler: MessageHandler,
}

type Handlers = RwLock<HashMap<MessageType, Registration>>;

struct KickWork {
    notify_id: u32,
    enqueued_at: Instant,
}

/// Triage and deferred dispatch of mailbox messages.
pub struct MailboxDispatcher {
    handlers: Arc<Handlers>,
    kicks: WorkQueue<KickWork>,
    messages: WorkQueue<Box<MailboxMessage>>,
    /// Held for reading from the accept check until the item is queued.
    accepting: RwLock<bool>,
    stats: Arc<Stats>,
}

impl MailboxDispatcher {
    /// Starts the worker threads. The dispatcher begins quiesced.
    pub fn new(
        config: &RprocConfig,
        virtqueues: Arc<VirtqueueManager>,
        stats: Arc<Stats>,
    ) -> Result<Self, MailboxError> {
        let handlers: Arc<Handlers> = Arc::default();

        let kick_stats = stats.clone();
        let kicks = WorkQueue::new(
            &format!("{}-kick", config.name),
            1,
            config.kick_queue_depth,
            move |work: KickWork| {
                let latency = work.enqueued_at.elapsed();
                virtqueues.vq_interrupt(work.notify_id);
                kick_stats.record_kick(latency);
            },
        )?;

        let table = handlers.clone();
        let message_stats = stats.clone();
        let messages = WorkQueue::new(
            &format!("{}-mbox", config.name),
            config.mailbox_workers,
            config.message_queue_depth,
            move |message: Box<MailboxMessage>| {
                // Held across the call so `unregister` waits for it.
                let handlers = table.read();
                if let Some(registration) = handlers.get(&message.kind) {
                    tracing::trace!(kind = %message.kind, owner = registration.owner, "dispatch");
                    (registration.handler)(&message);
                    message_stats.record_message();
                } else {
                    message_stats.record_drop();
                    tracing::debug!(kind = %message.kind, "handler gone, message dropped");
                }
            },
        )?;

        Ok(Self {
            handlers,
            kicks,
            messages,
            accepting: RwLock::new(false),
            stats,
        })
    }

    /// Triages one inbound transfer. Never blocks on the workers.
    pub fn on_receive(&self, words: &[u32]) -> Dispatch {
        let Some(message) = MailboxMessage::from_words(words) else {
            return self.drop_message(None, DropReason::Empty);
        };
        let accepting = self.accepting.read_recursive();
        if !*accepting {
            return self.drop_message(Some(message.kind), DropReason::Quiesced);
        }

        if message.kind.is_kick() {
            let work = KickWork {
                notify_id: message.payload[0],
                enqueued_at: Instant::now(),
            };
            return match self.kicks.push(work) {
                Ok(()) => Dispatch::KickQueued,
                Err(_) => self.drop_message(Some(message.kind), DropReason::QueueFull),
            };
        }

        // Recursive read: never queue behind a writer waiting for a handler.
        if !self.handlers.read_recursive().contains_key(&message.kind) {
            return self.drop_message(Some(message.kind), DropReason::Unregistered);
        }
        match self.messages.push(Box::new(message)) {
            Ok(()) => Dispatch::Queued,
            Err(_) => self.drop_message(Some(message.kind), DropReason::QueueFull),
        }
    }

    fn drop_message(&self, kind: Option<MessageType>, reason: DropReason) -> Dispatch {
        self.stats.record_drop();
        match reason {
            DropReason::Quiesced => tracing::debug!(?kind, "mailbox quiesced, message dropped"),
            _ => tracing::warn!(?kind, ?reason, "mailbox message dropped"),
        }
        Dispatch::Dropped(reason)
    }

    /// Installs `handler` for a user message type.
    ///
    /// Handlers must not register or unregister from within a call.
    pub fn register<F>(
        &self,
        kind: MessageType,
        owner: &'static str,
        handler: F,
    ) -> Result<(), MailboxError>
    where
        F: Fn(&MailboxMessage) + Send + Sync + 'static,
    {
        if kind.is_reserved() {
            return Err(MailboxError::ReservedType(kind));
        }
        self.insert(kind, owner, Arc::new(handler))
    }

    /// Installs a handler for a protocol type other than the kick.
    pub(crate) fn register_reserved(
        &self,
        kind: MessageType,
        owner: &'static str,
        handler: MessageHandler,
    ) -> Result<(), MailboxError> {
        if kind.is_kick() {
            return Err(MailboxError::ReservedType(kind));
        }
        self.insert(kind, owner, handler)
    }

    fn insert(
        &self,
        kind: MessageType,
        owner: &'static str,
        handler: MessageHandler,
    ) -> Result<(), MailboxError> {
        let mut handlers = self.handlers.write();
        if let Some(existing) = handlers.get(&kind) {
            return Err(MailboxError::AlreadyRegistered {
                kind,
                owner: existing.owner,
            });
        }
        handlers.insert(kind, Registration { owner, handler });
        tracing::debug!(%kind, owner, "registered mailbox handler");
        Ok(())
    }

    /// Removes the handler for `kind`. Waits for a running call to finish.
    ///
    /// Returns false if nothing was registered.
    pub fn unregister(&self, kind: MessageType) -> bool {
        let removed = self.handlers.write().remove(&kind);
        if let Some(registration) = &removed {
            tracing::debug!(%kind, owner = registration.owner, "unregistered mailbox handler");
        }
        removed.is_some()
    }

    /// Returns true if a handler is installed for `kind`.
    #[must_use]
    pub fn is_registered(&self, kind: MessageType) -> bool {
        self.handlers.read_recursive().contains_key(&kind)
    }

    /// Drops every further message until [`Self::resume`].
    ///
    /// Waits for concurrent [`Self::on_receive`] calls to finish queueing.
    pub fn quiesce(&self) {
        *self.accepting.write() = false;
    }

    /// Accepts messages again.
    pub fn resume(&self) {
        *self.accepting.write() = true;
    }

    /// Returns true while messages are accepted.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        *self.accepting.read_recursive()
    }

    /// Waits until every queued kick and message has finished running.
    pub fn flush(&self) {
        self.kicks.flush();
        self.messages.flush();
    }
}
