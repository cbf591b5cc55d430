// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Collaborator traits.

use std::fmt;
use std::sync::Arc;

use ispmcu_abi::MailboxMessage;

/// Errors reported by the platform collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// A named clock could not be switched.
    #[error("clock `{0}` could not be switched")]
    Clock(String),
    /// A named supply rail could not be switched.
    #[error("rail `{0}` could not be switched")]
    Rail(String),
    /// The mailbox transmitter did not accept the message.
    #[error("mailbox transmitter busy")]
    MailboxBusy,
    /// The MCU reset line could not be released.
    #[error("MCU reset control failed")]
    Reset,
}

/// Out-of-bounds access to a shared memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("access of {len} bytes at offset {offset:#x} exceeds region of {size:#x} bytes")]
pub struct MemoryError {
    /// Offset of the access.
    pub offset: usize,
    /// Length of the access.
    pub len: usize,
    /// Size of the region.
    pub size: usize,
}

/// Host-visible memory shared with the MCU.
///
/// Accesses are byte copies; the MCU may observe them at any time.
pub trait SharedMemory: Send + Sync {
    /// Size of the region in bytes.
    fn size(&self) -> usize;

    /// Copies `buf.len()` bytes starting at `offset` into `buf`.
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), MemoryError>;

    /// Copies `data` into the region starting at `offset`.
    fn write(&self, offset: usize, data: &[u8]) -> Result<(), MemoryError>;

    /// Sets `len` bytes starting at `offset` to `value`.
    fn fill(&self, offset: usize, len: usize, value: u8) -> Result<(), MemoryError>;
}

/// A named memory region handed out by the region allocator.
#[derive(Clone)]
pub struct Region {
    /// Address of the region as seen by the MCU.
    pub device_address: u32,
    /// Length in bytes.
    pub len: usize,
    /// Address of the region as seen by the host.
    pub host_base: u64,
    /// Backing memory.
    pub memory: Arc<dyn SharedMemory>,
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("device_address", &format_args!("{:#x}", self.device_address))
            .field("len", &format_args!("{:#x}", self.len))
            .field("host_base", &format_args!("{:#x}", self.host_base))
            .finish_non_exhaustive()
    }
}

/// Locates reserved memory regions by name.
pub trait RegionAllocator: Send + Sync {
    /// Returns the region registered under `name`, if any.
    fn locate(&self, name: &str) -> Option<Region>;
}

/// Hardware controls the supervisor needs from the host platform.
pub trait Platform: Send + Sync {
    /// Enables or disables a named clock.
    fn set_clock(&self, name: &str, enabled: bool) -> Result<(), PlatformError>;

    /// Enables or disables a named supply rail.
    fn set_rail(&self, name: &str, enabled: bool) -> Result<(), PlatformError>;

    /// Returns the rate of a named clock in Hz.
    fn clock_rate(&self, name: &str) -> Option<u32>;

    /// Raises or lowers (unmasks or masks) an interrupt line.
    fn set_irq(&self, line: u32, enabled: bool);

    /// Rings the doorbell of the virtqueue with the given notify id.
    ///
    /// A single register write; callable from any context.
    fn kick(&self, notify_id: u32);

    /// Sends a message to the MCU.
    fn send_message(&self, message: &MailboxMessage) -> Result<(), PlatformError>;

    /// Releases the MCU from reset.
    fn release_reset(&self) -> Result<(), PlatformError>;

    /// Holds the MCU in reset.
    fn assert_reset(&self);

    /// Current host time in nanoseconds.
    fn time_ns(&self) -> u64;
}
