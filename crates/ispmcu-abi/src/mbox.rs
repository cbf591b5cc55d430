// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Mailbox message format.
//!
//! Every mailbox transfer is a fixed-size block of 32-bit words: one type
//! word followed by [`PAYLOAD_WORDS`] payload words.
//!
//! # Word Layout
//!
//! | Word | Content |
//! |------|---------|
//! | 0 | message type |
//! | 1..=3 | payload |
//!
//! ## Reserved types
//!
//! | Type | Direction | Payload |
//! |------|-----------|---------|
//! | 0 | MCU → host | word 1: notify id of the ring that has new entries |
//! | 1 | MCU → host | word 1: crash cause |
//! | 2 | host → MCU | word 1: 1 = protect, 0 = release |
//!
//! Types from [`MessageType::FIRST_USER`] upwards are free for handlers
//! registered at runtime.


use core::fmt;

/// Number of payload words carried by every message.
pub const PAYLOAD_WORDS: usize = 3;

/// Total message length in words.
pub const MESSAGE_WORDS: usize = PAYLOAD_WORDS + 1;

// =============================================================================
// Message Types
// =============================================================================

/// Mailbox message type tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageType(pub u32);

impl MessageType {
    /// Ring kick: fast path, handled on the dedicated kick queue.
    pub const KICK: Self = Self(0);

    /// The MCU reports a fatal error.
    pub const CRASH: Self = Self(1);

    /// Protection state request sent by the host.
    pub const PROTECTION: Self = Self(2);

    /// First type available for runtime registration.
    pub const FIRST_USER: Self = Self(16);

    /// Returns the raw type word.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns true for the fast-path ring kick.
    #[inline]
    #[must_use]
    pub const fn is_kick(self) -> bool {
        self.0 == Self::KICK.0
    }

    /// Returns true if the type is reserved by the protocol.
    #[inline]
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.0 < Self::FIRST_USER.0
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::KICK => write!(f, "Kick"),
            Self::CRASH => write!(f, "Crash"),
            Self::PROTECTION => write!(f, "Protection"),
            Self(raw) => write!(f, "Type({raw})"),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// Messages
// =============================================================================

/// A single mailbox message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MailboxMessage {
    /// Message type.
    pub kind: MessageType,
    /// Fixed-size payload.
    pub payload: [u32; PAYLOAD_WORDS],
}

impl MailboxMessage {
    /// Creates a message from a type and payload.
    #[must_use]
    pub const fn new(kind: MessageType, payload: [u32; PAYLOAD_WORDS]) -> Self {
        Self { kind, payload }
    }

    /// Creates a ring kick for the given notify id.
    #[must_use]
    pub const fn kick(notify_id: u32) -> Self {
        Self::new(MessageType::KICK, [notify_id, 0, 0])
    }

    /// Creates a protection state request.
    #[must_use]
    pub const fn protection(protect: bool) -> Self {
        Self::new(MessageType::PROTECTION, [protect as u32, 0, 0])
    }

    /// Decodes a message from raw mailbox words.
    ///
    /// The first word is the type. Missing payload words read as zero and
    /// words past the fixed payload are ignored. Returns `None` for an empty
    /// transfer.
    #[must_use]
    pub fn from_words(words: &[u32]) -> Option<Self> {
        let (&kind, rest) = words.split_first()?;
        let mut payload = [0u32; PAYLOAD_WORDS];
        let count = rest.len().min(PAYLOAD_WORDS);
        payload[..count].copy_from_slice(&rest[..count]);
        Some(Self::new(MessageType(kind), payload))
    }

    /// Encodes the message as raw mailbox words.
    #[must_use]
    pub const fn to_words(&self) -> [u32; MESSAGE_WORDS] {
        [
            self.kind.0,
            self.payload[0],
            self.payload[1],
            self.payload[2],
        ]
    }
}
