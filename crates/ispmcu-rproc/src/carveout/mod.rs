// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Carveout registry.
//!
//! Maps carveout names to regions obtained from the external
//! [`RegionAllocator`]. A name is bound at most once per registry and stays
//! bound until [`CarveoutRegistry::release_all`] at supervisor teardown, so
//! rebooting reuses the same memory.


use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ispmcu_abi::{ADDR_ANY, CarveoutName};
use parking_lot::Mutex;

use crate::platform::{MemoryError, RegionAllocator, SharedMemory};

/// Carveout binding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CarveoutError {
    /// The region allocator has no region of that name.
    #[error("carveout `{0}` not found")]
    NotFound(CarveoutName),
    /// A requested range is not inside the carveout.
    #[error("range {device_address:#x}+{len:#x} lies outside carveout `{name}`")]
    AddressOutOfRange {
        /// Carveout name.
        name: CarveoutName,
        /// Requested device address, [`ADDR_ANY`] for "anywhere".
        device_address: u32,
        /// Requested length.
        len: usize,
    },
    /// Access to the backing memory failed.
    #[error("carveout memory access failed")]
    Memory(#[from] MemoryError),
}

/// A bound carveout.
///
/// Cloning shares the backing memory.
#[derive(Clone)]
pub struct Carveout {
    name: CarveoutName,
    device_address: u32,
    len: usize,
    host_base: u64,
    memory: Arc<dyn SharedMemory>,
}

impl Carveout {
    /// Carveout name.
    #[must_use]
    pub const fn name(&self) -> CarveoutName {
        self.name
    }

    /// Start address as seen by the MCU.
    #[must_use]
    pub const fn device_address(&self) -> u32 {
        self.device_address
    }

    /// Length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length carveout.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start address as seen by the host.
    #[must_use]
    pub const fn host_base(&self) -> u64 {
        self.host_base
    }

    /// Backing memory.
    #[must_use]
    pub fn memory(&self) -> &Arc<dyn SharedMemory> {
        &self.memory
    }

    /// Resolves a requested range to an offset inside the carveout.
    ///
    /// [`ADDR_ANY`] places the range at the start of the carveout. Otherwise
    /// the whole range must lie inside the carveout's address window.
    pub fn window(&self, device_address: u32, len: usize) -> Result<usize, CarveoutError> {
        let offset = if device_address == ADDR_ANY {
            Some(0)
        } else {
            device_address
                .checked_sub(self.device_address)
                .map(|offset| offset as usize)
        };
        offset
            .filter(|&offset| offset.checked_add(len).is_some_and(|end| end <= self.len))
            .ok_or(CarveoutError::AddressOutOfRange {
                name: self.name,
                device_address,
                len,
            })
    }

    /// Zeroes `len` bytes at `offset`.
    pub fn zero(&self, offset: usize, len: usize) -> Result<(), CarveoutError> {
        Ok(self.memory.fill(offset, len, 0)?)
    }
}

impl fmt::Debug for Carveout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Carveout")
            .field("name", &self.name)
            .field("device_address", &format_args!("{:#x}", self.device_address))
            .field("len", &format_args!("{:#x}", self.len))
            .field("host_base", &format_args!("{:#x}", self.host_base))
            .finish_non_exhaustive()
    }
}

/// Name to region bindings for one processor instance.
pub struct CarveoutRegistry {
    allocator: Arc<dyn RegionAllocator>,
    bound: Mutex<HashMap<CarveoutName, Carveout>>,
}

impl CarveoutRegistry {
    /// Creates an empty registry backed by `allocator`.
    #[must_use]
    pub fn new(allocator: Arc<dyn RegionAllocator>) -> Self {
        Self {
            allocator,
            bound: Mutex::new(HashMap::new()),
        }
    }

    /// Binds `name`, reusing an earlier binding.
    pub fn bind(&self, name: CarveoutName) -> Result<Carveout, CarveoutError> {
        let mut bound = self.bound.lock();
        if let Some(carveout) = bound.get(&name) {
            return Ok(carveout.clone());
        }

        let region = self
            .allocator
            .locate(name.as_str())
            .ok_or(CarveoutError::NotFound(name))?;
        let carveout = Carveout {
            name,
            device_address: region.device_address,
            len: region.len,
            host_base: region.host_base,
            memory: region.memory,
        };
        tracing::debug!(
            carveout = %name,
            device_address = carveout.device_address,
            len = carveout.len,
            "bound carveout"
        );
        bound.insert(name, carveout.clone());
        Ok(carveout)
    }

    /// Binds `name` and resolves the requested range inside it.
    ///
    /// Returns the carveout and the offset of the range.
    pub fn bind_checked(
        &self,
        name: CarveoutName,
        device_address: u32,
        len: usize,
    ) -> Result<(Carveout, usize), CarveoutError> {
        let carveout = self.bind(name)?;
        let offset = carveout.window(device_address, len)?;
        Ok((carveout, offset))
    }

    /// Returns an already bound carveout without asking the allocator.
    #[must_use]
    pub fn lookup(&self, name: CarveoutName) -> Option<Carveout> {
        self.bound.lock().get(&name).cloned()
    }

    /// Number of bound carveouts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bound.lock().len()
    }

    /// Returns true if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bound.lock().is_empty()
    }

    /// Drops every binding.
    pub fn release_all(&self) {
        let released = core::mem::take(&mut *self.bound.lock());
        if !released.is_empty() {
            tracing::debug!(count = released.len(), "released carveouts");
        }
    }
}
