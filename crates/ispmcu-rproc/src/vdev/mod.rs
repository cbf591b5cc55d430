// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Virtual device controller.
//!
//! One [`VirtualDevice`] exists per virtual device entry of the resource
//! table. It owns the device's two virtqueues and exposes the transport
//! contract (features, status, config space, shared region, rings) to the
//! external virtio-style consumer framework.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──register──▶ Registered ──prepare──▶ Active ──stop──▶ Stopped
//!                                                                   │
//!                              last VdevHandle dropped ──▶ Released ◀┘
//! ```
//!
//! Status and config accesses go straight to the live table entry, so the
//! MCU observes every write.


mod handle;

pub use handle::VdevHandle;

use std::fmt;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Weak};

use ispmcu_abi::rsc::Le32;
use ispmcu_abi::{CarveoutName, MAX_VRINGS};
use parking_lot::Mutex;

use crate::carveout::{Carveout, CarveoutError, CarveoutRegistry};
use crate::config::SHARED_REGION_HEADER;
use crate::table::{ResourceTable, SharedTable, VdevLocation};
use crate::virtqueue::{VqCallback, Virtqueue, VirtqueueError, VirtqueueManager};

/// Virtual device errors. All of them are device-scoped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VdevError {
    /// The entry does not declare exactly [`MAX_VRINGS`] rings.
    #[error("device {index} declares {found} rings, {MAX_VRINGS} required")]
    RingCount {
        /// Device index.
        index: usize,
        /// Declared ring count.
        found: usize,
    },
    /// Ring allocation failed.
    #[error("device ring allocation failed")]
    Virtqueue(#[from] VirtqueueError),
    /// The buffer carveout could not be bound.
    #[error("device buffer unavailable")]
    Carveout(#[from] CarveoutError),
    /// The negotiated feature set does not fit the 32-bit table field.
    #[error("negotiated features {0:#x} do not fit 32 bits")]
    FeaturesTooWide(u64),
    /// The operation is not valid in the current state.
    #[error("device {index} is {state:?}, expected {expected:?}")]
    InvalidState {
        /// Device index.
        index: usize,
        /// Current state.
        state: VdevState,
        /// Required state.
        expected: VdevState,
    },
    /// More callbacks than rings.
    #[error("{requested} ring callbacks for {available} rings")]
    TooManyCallbacks {
        /// Callbacks passed.
        requested: usize,
        /// Rings owned.
        available: usize,
    },
}

/// Virtual device lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VdevState {
    /// Entry parsed, rings allocated.
    Created,
    /// Exposed to the transport consumer.
    Registered,
    /// Buffer bound; the consumer may use the rings.
    Active,
    /// Consumer detached; rings idle.
    Stopped,
    /// Reference count reached zero; rings freed.
    Released,
}

/// A consumer framework rejected a device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("consumer rejected device: {0}")]
pub struct ConsumerError(pub String);

/// The generic virtio-style consumer framework.
pub trait TransportConsumer: Send + Sync {
    /// Offers a running device. The consumer keeps the handle while bound.
    fn probe(&self, device: VdevHandle) -> Result<(), ConsumerError>;

    /// Detaches from the device with the given index and drops its handles.
    fn remove(&self, index: usize);
}

/// Usable part of a device's shared buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SharedRegion {
    /// Address as seen by the MCU.
    pub device_address: u32,
    /// Address as seen by the host.
    pub host_address: u64,
    /// Length in bytes; zero if the buffer cannot hold one.
    pub len: usize,
}

/// One virtual device.
pub struct VirtualDevice {
    index: usize,
    id: u32,
    location: VdevLocation,
    table: Weak<Mutex<ResourceTable>>,
    rings: Mutex<Vec<Arc<Virtqueue>>>,
    buffer: Mutex<Option<Carveout>>,
    state: Mutex<VdevState>,
    supported_features: u64,
    refs: AtomicUsize,
    virtqueues: Arc<VirtqueueManager>,
    carveouts: Arc<CarveoutRegistry>,
}

impl VirtualDevice {
    /// Creates the device for a table entry and allocates both rings.
    ///
    /// If a ring fails, the rings allocated so far are freed and the first
    /// error is returned.
    pub fn create(
        table: &SharedTable,
        location: VdevLocation,
        virtqueues: &Arc<VirtqueueManager>,
        carveouts: &Arc<CarveoutRegistry>,
        supported_features: u64,
    ) -> Result<VdevHandle, VdevError> {
        let index = location.device_index();
        if location.ring_count() != MAX_VRINGS {
            return Err(VdevError::RingCount {
                index,
                found: location.ring_count(),
            });
        }
        let id = table.lock().vdev(location).map_or(0, |entry| entry.id.get());

        let mut rings = Vec::with_capacity(MAX_VRINGS);
        for ring in 0..MAX_VRINGS {
            match virtqueues.allocate(table, location, ring) {
                Ok(vq) => rings.push(vq),
                Err(err) => {
                    for vq in &rings {
                        virtqueues.free(vq);
                    }
                    return Err(err.into());
                }
            }
        }

        tracing::debug!(device = index, id, "created virtual device");
        Ok(VdevHandle::new(Arc::new(Self {
            index,
            id,
            location,
            table: Arc::downgrade(table),
            rings: Mutex::new(rings),
            buffer: Mutex::new(None),
            state: Mutex::new(VdevState::Created),
            supported_features,
            refs: AtomicUsize::new(1),
            virtqueues: virtqueues.clone(),
            carveouts: carveouts.clone(),
        })))
    }

    /// Device index, as used in carveout names.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Virtio device id.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> VdevState {
        *self.state.lock()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Created → Registered.
    pub fn register(&self) -> Result<(), VdevError> {
        self.transition(VdevState::Created, VdevState::Registered)
    }

    /// Binds the shared buffer carveout, Registered → Active.
    pub fn prepare(&self) -> Result<(), VdevError> {
        self.expect_state(VdevState::Registered)?;
        let buffer = self.carveouts.bind(CarveoutName::vdev_buffer(self.index))?;
        *self.buffer.lock() = Some(buffer);
        self.transition(VdevState::Registered, VdevState::Active)
    }

    /// Detaches ring callbacks, → Stopped. A no-op unless Registered or Active.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if matches!(*state, VdevState::Registered | VdevState::Active) {
            *state = VdevState::Stopped;
            drop(state);
            self.del_vqs();
            tracing::debug!(device = self.index, "stopped virtual device");
        }
    }

    /// Frees the rings; runs once, when the last handle goes away.
    fn release(&self) {
        let rings = core::mem::take(&mut *self.rings.lock());
        for vq in &rings {
            vq.set_callback(None);
            self.virtqueues.free(vq);
        }
        *self.state.lock() = VdevState::Released;
        tracing::debug!(device = self.index, "released virtual device");
    }

    fn expect_state(&self, expected: VdevState) -> Result<(), VdevError> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(VdevError::InvalidState {
                index: self.index,
                state,
                expected,
            })
        }
    }

    fn transition(&self, from: VdevState, to: VdevState) -> Result<(), VdevError> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(VdevError::InvalidState {
                index: self.index,
                state: *state,
                expected: from,
            });
        }
        *state = to;
        Ok(())
    }

    fn with_table<R>(&self, f: impl FnOnce(&mut ResourceTable) -> R) -> Option<R> {
        let table = self.table.upgrade()?;
        let mut table = table.lock();
        Some(f(&mut table))
    }

    // =========================================================================
    // Transport contract
    // =========================================================================

    /// Features offered by the MCU.
    #[must_use]
    pub fn features(&self) -> u32 {
        self.with_table(|table| table.vdev(self.location).map(|e| e.device_features.get()))
            .flatten()
            .unwrap_or(0)
    }

    /// Masks the driver's features with the supported set and the device's
    /// offer, and publishes the result to the MCU.
    pub fn finalize_features(&self, features: u64) -> Result<u32, VdevError> {
        let requested = features & self.supported_features;
        let requested =
            u32::try_from(requested).map_err(|_| VdevError::FeaturesTooWide(requested))?;
        let negotiated = requested & self.features();
        self.with_table(|table| {
            if let Some(entry) = table.vdev_mut(self.location) {
                entry.guest_features = Le32::new(negotiated);
            }
        });
        Ok(negotiated)
    }

    /// Status byte as the MCU sees it.
    #[must_use]
    pub fn status(&self) -> u8 {
        self.with_table(|table| table.vdev(self.location).map(|e| e.status))
            .flatten()
            .unwrap_or(0)
    }

    /// Writes the status byte into the live table.
    pub fn set_status(&self, status: u8) {
        self.with_table(|table| {
            if let Some(entry) = table.vdev_mut(self.location) {
                entry.status = status;
            }
        });
    }

    /// Length of the config space.
    #[must_use]
    pub const fn config_len(&self) -> usize {
        self.location.config_len()
    }

    /// Reads config space. Out-of-bounds reads leave `buf` untouched.
    pub fn config_read(&self, offset: usize, buf: &mut [u8]) {
        let Some(range) = self.config_range(offset, buf.len()) else {
            tracing::warn!(device = self.index, offset, len = buf.len(), "config read out of bounds");
            return;
        };
        self.with_table(|table| {
            if let Some(config) = table.config(self.location) {
                buf.copy_from_slice(&config[range]);
            }
        });
    }

    /// Writes config space. Out-of-bounds writes are ignored.
    pub fn config_write(&self, offset: usize, data: &[u8]) {
        let Some(range) = self.config_range(offset, data.len()) else {
            tracing::warn!(device = self.index, offset, len = data.len(), "config write out of bounds");
            return;
        };
        self.with_table(|table| {
            if let Some(config) = table.config_mut(self.location) {
                config[range].copy_from_slice(data);
            }
        });
    }

    fn config_range(&self, offset: usize, len: usize) -> Option<core::ops::Range<usize>> {
        let end = offset.checked_add(len)?;
        (end <= self.location.config_len()).then_some(offset..end)
    }

    /// Shared memory region `id` of the device.
    ///
    /// Region 0 is the device buffer past its header reservation. Unknown
    /// ids, an unbound buffer or a buffer smaller than the header give a
    /// zero-length region.
    #[must_use]
    pub fn shared_region(&self, id: u32) -> SharedRegion {
        let buffer = self.buffer.lock();
        let Some(buffer) = buffer.as_ref().filter(|_| id == 0) else {
            return SharedRegion::default();
        };
        let Some(len) = buffer.len().checked_sub(SHARED_REGION_HEADER) else {
            return SharedRegion::default();
        };
        let header = SHARED_REGION_HEADER as u32;
        match (
            buffer.device_address().checked_add(header),
            buffer.host_base().checked_add(u64::from(header)),
        ) {
            (Some(device_address), Some(host_address)) => SharedRegion {
                device_address,
                host_address,
                len,
            },
            _ => SharedRegion::default(),
        }
    }

    /// Installs ring callbacks in ring order and returns the rings.
    pub fn find_vqs(
        &self,
        callbacks: Vec<Option<VqCallback>>,
    ) -> Result<Vec<Arc<Virtqueue>>, VdevError> {
        self.expect_state(VdevState::Active)?;
        let rings = self.rings.lock().clone();
        if callbacks.len() > rings.len() {
            return Err(VdevError::TooManyCallbacks {
                requested: callbacks.len(),
                available: rings.len(),
            });
        }
        for (vq, callback) in rings.iter().zip(callbacks) {
            vq.set_callback(callback);
        }
        Ok(rings)
    }

    /// Removes all ring callbacks.
    pub fn del_vqs(&self) {
        for vq in self.rings.lock().iter() {
            vq.set_callback(None);
        }
    }

    /// Rings the doorbell of ring `ring`. Returns false if there is none.
    pub fn notify(&self, ring: usize) -> bool {
        let vq = self.rings.lock().get(ring).cloned();
        vq.inspect(|vq| vq.kick()).is_some()
    }

    /// Ring `ring`, while the device holds it.
    #[must_use]
    pub fn virtqueue(&self, ring: usize) -> Option<Arc<Virtqueue>> {
        self.rings.lock().get(ring).cloned()
    }
}

impl fmt::Debug for VirtualDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualDevice")
            .field("index", &self.index)
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
