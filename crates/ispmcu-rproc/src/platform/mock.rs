// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Mock collaborators for testing.
//!
//! `MockPlatform` records every hardware interaction as a [`PlatformEvent`],
//! `MockRegions` hands out heap-backed regions by name and `MockConsumer`
//! stands in for the virtio-style consumer framework. Together they let the
//! supervisor run end to end without hardware.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ispmcu_abi::MailboxMessage;
use parking_lot::Mutex;

use super::traits::{MemoryError, Platform, PlatformError, Region, RegionAllocator, SharedMemory};
use crate::vdev::{ConsumerError, TransportConsumer, VdevHandle};

/// Offset added to device addresses to form mock host addresses.
pub const MOCK_HOST_OFFSET: u64 = 0x1_0000_0000;

// =============================================================================
// Memory
// =============================================================================

/// Shared memory backed by a heap buffer.
pub struct MockMemory {
    bytes: Mutex<Vec<u8>>,
}

impl MockMemory {
    /// Creates a zero-filled region of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0; size]),
        }
    }

    /// Returns a copy of the whole region.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    fn check(size: usize, offset: usize, len: usize) -> Result<core::ops::Range<usize>, MemoryError> {
        offset
            .checked_add(len)
            .filter(|&end| end <= size)
            .map(|end| offset..end)
            .ok_or(MemoryError { offset, len, size })
    }
}

impl SharedMemory for MockMemory {
    fn size(&self) -> usize {
        self.bytes.lock().len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), MemoryError> {
        let bytes = self.bytes.lock();
        let range = Self::check(bytes.len(), offset, buf.len())?;
        buf.copy_from_slice(&bytes[range]);
        Ok(())
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
        let mut bytes = self.bytes.lock();
        let range = Self::check(bytes.len(), offset, data.len())?;
        bytes[range].copy_from_slice(data);
        Ok(())
    }

    fn fill(&self, offset: usize, len: usize, value: u8) -> Result<(), MemoryError> {
        let mut bytes = self.bytes.lock();
        let range = Self::check(bytes.len(), offset, len)?;
        bytes[range].fill(value);
        Ok(())
    }
}

// =============================================================================
// Regions
// =============================================================================

/// Region allocator serving a fixed set of named heap regions.
#[derive(Default)]
pub struct MockRegions {
    regions: HashMap<String, (Region, Arc<MockMemory>)>,
    lookups: Mutex<Vec<String>>,
}

impl MockRegions {
    /// Creates an allocator without regions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a region of `len` bytes at device address `device_address`.
    #[must_use]
    pub fn with_region(mut self, name: &str, device_address: u32, len: usize) -> Self {
        let memory = Arc::new(MockMemory::new(len));
        let region = Region {
            device_address,
            len,
            host_base: MOCK_HOST_OFFSET + u64::from(device_address),
            memory: memory.clone(),
        };
        self.regions.insert(name.to_owned(), (region, memory));
        self
    }

    /// Backing memory of a region, for inspection.
    #[must_use]
    pub fn memory(&self, name: &str) -> Option<Arc<MockMemory>> {
        self.regions.get(name).map(|(_, memory)| memory.clone())
    }

    /// Names passed to `locate`, in call order.
    #[must_use]
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().clone()
    }
}

impl RegionAllocator for MockRegions {
    fn locate(&self, name: &str) -> Option<Region> {
        self.lookups.lock().push(name.to_owned());
        self.regions.get(name).map(|(region, _)| region.clone())
    }
}

// =============================================================================
// Platform
// =============================================================================

/// A recorded hardware interaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlatformEvent {
    /// A clock was switched.
    Clock {
        /// Clock name.
        name: String,
        /// New state.
        enabled: bool,
    },
    /// A rail was switched.
    Rail {
        /// Rail name.
        name: String,
        /// New state.
        enabled: bool,
    },
    /// An interrupt line was unmasked or masked.
    Irq {
        /// Line number.
        line: u32,
        /// New state.
        enabled: bool,
    },
    /// A virtqueue doorbell was rung.
    Kick(u32),
    /// A message was sent to the MCU.
    Message(MailboxMessage),
    /// The MCU left reset.
    ReleaseReset,
    /// The MCU was put into reset.
    AssertReset,
}

/// Platform that records events and can inject failures.
#[derive(Default)]
pub struct MockPlatform {
    events: Mutex<Vec<PlatformEvent>>,
    clock_rates: HashMap<String, u32>,
    failing: Mutex<HashSet<String>>,
    fail_reset: AtomicBool,
    fail_messages: AtomicBool,
    now: AtomicU64,
}

impl MockPlatform {
    /// Creates a platform where every operation succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `rate` Hz for the clock `name`.
    #[must_use]
    pub fn with_clock_rate(mut self, name: &str, rate: u32) -> Self {
        self.clock_rates.insert(name.to_owned(), rate);
        self
    }

    /// Makes switching the clock or rail `name` on fail.
    pub fn fail_power(&self, name: &str) {
        self.failing.lock().insert(name.to_owned());
    }

    /// Makes releasing the MCU reset fail.
    pub fn fail_reset(&self, fail: bool) {
        self.fail_reset.store(fail, Ordering::Relaxed);
    }

    /// Makes sending messages fail.
    pub fn fail_messages(&self, fail: bool) {
        self.fail_messages.store(fail, Ordering::Relaxed);
    }

    /// Sets the value returned by `time_ns`.
    pub fn set_time(&self, now: u64) {
        self.now.store(now, Ordering::Relaxed);
    }

    /// All events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<PlatformEvent> {
        self.events.lock().clone()
    }

    /// Notify ids of all doorbells rung so far.
    #[must_use]
    pub fn kicks(&self) -> Vec<u32> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                PlatformEvent::Kick(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// All messages sent to the MCU so far.
    #[must_use]
    pub fn messages(&self) -> Vec<MailboxMessage> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                PlatformEvent::Message(message) => Some(*message),
                _ => None,
            })
            .collect()
    }

    /// Forgets all recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn record(&self, event: PlatformEvent) {
        self.events.lock().push(event);
    }

    fn fails(&self, name: &str, enabled: bool) -> bool {
        enabled && self.failing.lock().contains(name)
    }
}

impl Platform for MockPlatform {
    fn set_clock(&self, name: &str, enabled: bool) -> Result<(), PlatformError> {
        if self.fails(name, enabled) {
            return Err(PlatformError::Clock(name.to_owned()));
        }
        self.record(PlatformEvent::Clock {
            name: name.to_owned(),
            enabled,
        });
        Ok(())
    }

    fn set_rail(&self, name: &str, enabled: bool) -> Result<(), PlatformError> {
        if self.fails(name, enabled) {
            return Err(PlatformError::Rail(name.to_owned()));
        }
        self.record(PlatformEvent::Rail {
            name: name.to_owned(),
            enabled,
        });
        Ok(())
    }

    fn clock_rate(&self, name: &str) -> Option<u32> {
        self.clock_rates.get(name).copied()
    }

    fn set_irq(&self, line: u32, enabled: bool) {
        self.record(PlatformEvent::Irq { line, enabled });
    }

    fn kick(&self, notify_id: u32) {
        self.record(PlatformEvent::Kick(notify_id));
    }

    fn send_message(&self, message: &MailboxMessage) -> Result<(), PlatformError> {
        if self.fail_messages.load(Ordering::Relaxed) {
            return Err(PlatformError::MailboxBusy);
        }
        self.record(PlatformEvent::Message(*message));
        Ok(())
    }

    fn release_reset(&self) -> Result<(), PlatformError> {
        if self.fail_reset.load(Ordering::Relaxed) {
            return Err(PlatformError::Reset);
        }
        self.record(PlatformEvent::ReleaseReset);
        Ok(())
    }

    fn assert_reset(&self) {
        self.record(PlatformEvent::AssertReset);
    }

    fn time_ns(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Transport consumer
// =============================================================================

type ProbeHook = Box<dyn Fn(&VdevHandle) -> Result<(), ConsumerError> + Send + Sync>;

/// Consumer framework that keeps every probed device.
#[derive(Default)]
pub struct MockConsumer {
    devices: Mutex<Vec<VdevHandle>>,
    probed: Mutex<Vec<usize>>,
    removed: Mutex<Vec<usize>>,
    on_probe: Option<ProbeHook>,
}

impl MockConsumer {
    /// Creates a consumer that accepts every device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `hook` for every probed device; an error rejects the device.
    #[must_use]
    pub fn with_probe<F>(mut self, hook: F) -> Self
    where
        F: Fn(&VdevHandle) -> Result<(), ConsumerError> + Send + Sync + 'static,
    {
        self.on_probe = Some(Box::new(hook));
        self
    }

    /// Indices of probed devices, in probe order.
    #[must_use]
    pub fn probed(&self) -> Vec<usize> {
        self.probed.lock().clone()
    }

    /// Indices of removed devices, in removal order.
    #[must_use]
    pub fn removed(&self) -> Vec<usize> {
        self.removed.lock().clone()
    }

    /// Returns another reference to a device the consumer holds.
    #[must_use]
    pub fn device(&self, index: usize) -> Option<VdevHandle> {
        self.devices
            .lock()
            .iter()
            .find(|device| device.index() == index)
            .cloned()
    }
}

impl TransportConsumer for MockConsumer {
    fn probe(&self, device: VdevHandle) -> Result<(), ConsumerError> {
        if let Some(hook) = &self.on_probe {
            hook(&device)?;
        }
        self.probed.lock().push(device.index());
        self.devices.lock().push(device);
        Ok(())
    }

    fn remove(&self, index: usize) {
        self.removed.lock().push(index);
        // Drop the handle outside the lock: the last put frees the rings.
        let dropped = {
            let mut devices = self.devices.lock();
            let (gone, kept): (Vec<VdevHandle>, Vec<VdevHandle>) =
                devices.drain(..).partition(|d| d.index() == index);
            *devices = kept;
            gone
        };
        drop(dropped);
    }
}
