// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Virtqueue manager.
//!
//! Allocates the shared-memory rings of virtual devices, owns the notify id
//! space of one processor instance and routes ring-completion interrupts to
//! the virtqueue that owns the notify id.
//!
//! # Allocation
//!
//! 1. Bind the carveout `vdev<i>vring<r>`
//! 2. Reject zero length or zero alignment
//! 3. Size the ring (`page_align(vring_size(len, align))`) and fit it into
//!    the carveout
//! 4. Take the lowest free notify id and raise the watermark
//! 5. Zero the ring memory
//!
//! The resolved device address and notify id are then written back into the
//! live resource table for the MCU to pick up.
//!
//! Ring memory itself is not locked: the MCU and the consumer only touch it
//! between device start and stop.

#[cfg(test)]
mod virtqueue_test;

mod notify;

pub use notify::NotifyIdTable;

use std::fmt;
use std::sync::{Arc, Weak};

use ispmcu_abi::rsc::Le32;
use ispmcu_abi::{CarveoutName, page_align, vring_size};
use parking_lot::Mutex;

use crate::carveout::{Carveout, CarveoutError, CarveoutRegistry};
use crate::platform::{MemoryError, Platform};
use crate::stats::Stats;
use crate::table::{ResourceTable, SharedTable, VdevLocation};

/// Consumer callback run when the MCU signals a ring.
pub type VqCallback = Arc<dyn Fn(&Virtqueue) + Send + Sync>;

/// Virtqueue allocation errors. All of them are device-scoped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VirtqueueError {
    /// The device entry does not declare this ring.
    #[error("ring {ring} is not declared by the device entry")]
    NoSuchRing {
        /// Ring index.
        ring: usize,
    },
    /// Zero length or zero alignment.
    #[error("invalid ring geometry: {len} descriptors, alignment {align}")]
    InvalidGeometry {
        /// Descriptor count.
        len: u32,
        /// Alignment.
        align: u32,
    },
    /// The ring size overflows.
    #[error("ring of {len} descriptors with alignment {align} is too large")]
    TooLarge {
        /// Descriptor count.
        len: u32,
        /// Alignment.
        align: u32,
    },
    /// Every notify id is in use.
    #[error("notify id space exhausted")]
    IdsExhausted,
    /// Binding or fitting the carveout failed.
    #[error(transparent)]
    Carveout(#[from] CarveoutError),
}

/// Outcome of a ring-completion interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VqInterrupt {
    /// A virtqueue owns the id.
    Delivered,
    /// Stale or spurious notification.
    NotFound,
}

// =============================================================================
// Virtqueue
// =============================================================================

/// One allocated ring.
pub struct Virtqueue {
    notify_id: u32,
    location: VdevLocation,
    ring_index: usize,
    len: u32,
    align: u32,
    size: usize,
    device_address: u32,
    carveout: Carveout,
    offset: usize,
    table: Weak<Mutex<ResourceTable>>,
    platform: Arc<dyn Platform>,
    callback: Mutex<Option<VqCallback>>,
}

impl Virtqueue {
    /// Notify id of the ring.
    #[must_use]
    pub const fn notify_id(&self) -> u32 {
        self.notify_id
    }

    /// Index of the owning virtual device.
    #[must_use]
    pub const fn device_index(&self) -> usize {
        self.location.device_index()
    }

    /// Index of the ring within its device.
    #[must_use]
    pub const fn ring_index(&self) -> usize {
        self.ring_index
    }

    /// Number of descriptors.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.len
    }

    /// Returns true for a ring without descriptors, which allocation rejects.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Ring alignment.
    #[must_use]
    pub const fn align(&self) -> u32 {
        self.align
    }

    /// Page-rounded ring size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Device address of the ring.
    #[must_use]
    pub const fn device_address(&self) -> u32 {
        self.device_address
    }

    /// Backing carveout.
    #[must_use]
    pub const fn carveout(&self) -> &Carveout {
        &self.carveout
    }

    /// Reads ring memory at `offset` from the start of the ring.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.check(offset, buf.len())?;
        self.carveout.memory().read(self.offset + offset, buf)
    }

    /// Writes ring memory at `offset` from the start of the ring.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
        self.check(offset, data.len())?;
        self.carveout.memory().write(self.offset + offset, data)
    }

    /// Installs or clears the consumer callback.
    pub fn set_callback(&self, callback: Option<VqCallback>) {
        *self.callback.lock() = callback;
    }

    /// Rings the MCU doorbell for this ring.
    pub fn kick(&self) {
        tracing::trace!(notify_id = self.notify_id, "kick");
        self.platform.kick(self.notify_id);
    }

    /// Runs the consumer callback, if any.
    fn interrupt(&self) {
        // Clone out of the lock so the callback may replace itself.
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(self);
        }
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), MemoryError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(MemoryError {
                offset,
                len,
                size: self.size,
            }),
        }
    }
}

impl fmt::Debug for Virtqueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Virtqueue")
            .field("notify_id", &self.notify_id)
            .field("device", &self.location.device_index())
            .field("ring", &self.ring_index)
            .field("len", &self.len)
            .field("device_address", &format_args!("{:#x}", self.device_address))
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Ring allocator and notify id owner of one processor instance.
pub struct VirtqueueManager {
    carveouts: Arc<CarveoutRegistry>,
    platform: Arc<dyn Platform>,
    stats: Arc<Stats>,
    ids: Mutex<NotifyIdTable<Arc<Virtqueue>>>,
}

impl VirtqueueManager {
    /// Creates a manager with an empty notify id space.
    #[must_use]
    pub fn new(
        carveouts: Arc<CarveoutRegistry>,
        platform: Arc<dyn Platform>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            carveouts,
            platform,
            stats,
            ids: Mutex::new(NotifyIdTable::new()),
        }
    }

    /// Allocates ring `ring_index` of the device at `location`.
    ///
    /// Length, alignment and requested address come from the table entry.
    pub fn allocate(
        &self,
        table: &SharedTable,
        location: VdevLocation,
        ring_index: usize,
    ) -> Result<Arc<Virtqueue>, VirtqueueError> {
        let ring = table
            .lock()
            .vring(location, ring_index)
            .copied()
            .ok_or(VirtqueueError::NoSuchRing { ring: ring_index })?;
        let (len, align, requested) = (ring.len.get(), ring.align.get(), ring.device_address.get());

        let name = CarveoutName::vdev_vring(location.device_index(), ring_index);
        let carveout = self.carveouts.bind(name)?;

        if len == 0 || align == 0 {
            return Err(VirtqueueError::InvalidGeometry { len, align });
        }

        let size = vring_size(len as usize, align as usize)
            .and_then(page_align)
            .ok_or(VirtqueueError::TooLarge { len, align })?;
        let offset = carveout.window(requested, size)?;
        let device_address = carveout.device_address().wrapping_add(offset as u32);

        let virtqueue = {
            let mut ids = self.ids.lock();
            let notify_id = ids
                .insert_with(|notify_id| {
                    Arc::new(Virtqueue {
                        notify_id,
                        location,
                        ring_index,
                        len,
                        align,
                        size,
                        device_address,
                        carveout: carveout.clone(),
                        offset,
                        table: Arc::downgrade(table),
                        platform: self.platform.clone(),
                        callback: Mutex::new(None),
                    })
                })
                .ok_or(VirtqueueError::IdsExhausted)?;
            ids.get(notify_id).cloned().ok_or(VirtqueueError::IdsExhausted)?
        };
        let notify_id = virtqueue.notify_id;

        if let Err(err) = carveout.zero(offset, size) {
            self.ids.lock().remove(notify_id);
            return Err(err.into());
        }

        if let Some(entry) = table.lock().vring_mut(location, ring_index) {
            entry.device_address = Le32::new(device_address);
            entry.notify_id = Le32::new(notify_id);
        }

        tracing::debug!(
            device = location.device_index(),
            ring = ring_index,
            notify_id,
            device_address,
            size,
            "allocated virtqueue"
        );
        Ok(virtqueue)
    }

    /// Releases a virtqueue's notify id and resets its table fields.
    ///
    /// The table reset is skipped when the table is already gone.
    pub fn free(&self, virtqueue: &Virtqueue) {
        {
            let mut ids = self.ids.lock();
            let owned = ids
                .get(virtqueue.notify_id)
                .is_some_and(|current| core::ptr::eq(Arc::as_ptr(current), virtqueue));
            if owned {
                ids.remove(virtqueue.notify_id);
            }
        }

        if let Some(table) = virtqueue.table.upgrade() {
            table.lock().reset_vring(virtqueue.location, virtqueue.ring_index);
        } else {
            tracing::debug!(
                notify_id = virtqueue.notify_id,
                "resource table gone, ring fields left as is"
            );
        }
        tracing::debug!(notify_id = virtqueue.notify_id, "freed virtqueue");
    }

    /// Delivers a ring-completion interrupt to the owner of `notify_id`.
    pub fn vq_interrupt(&self, notify_id: u32) -> VqInterrupt {
        let virtqueue = self.ids.lock().get(notify_id).cloned();
        match virtqueue {
            Some(virtqueue) => {
                virtqueue.interrupt();
                VqInterrupt::Delivered
            }
            None => {
                self.stats.record_spurious();
                tracing::debug!(notify_id, "interrupt for unknown notify id");
                VqInterrupt::NotFound
            }
        }
    }

    /// Highest notify id ever handed out.
    #[must_use]
    pub fn max_notify_id(&self) -> Option<u32> {
        self.ids.lock().max_id()
    }

    /// Notify ids currently in use, ascending.
    #[must_use]
    pub fn notify_ids(&self) -> Vec<u32> {
        self.ids.lock().ids().collect()
    }
}
