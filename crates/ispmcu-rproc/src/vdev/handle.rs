// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Counted references to a virtual device.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{Ordering, fence};

use super::VirtualDevice;

/// An owning reference to a [`VirtualDevice`].
///
/// Cloning takes a reference and dropping puts it. The put that brings the
/// count to zero releases the device and frees its rings, exactly once.
pub struct VdevHandle {
    device: Arc<VirtualDevice>,
}

impl VdevHandle {
    /// Wraps a freshly created device whose count is already one.
    pub(super) const fn new(device: Arc<VirtualDevice>) -> Self {
        Self { device }
    }

    /// Current number of handles.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.device.refs.load(Ordering::Acquire)
    }
}

impl Clone for VdevHandle {
    fn clone(&self) -> Self {
        self.device.refs.fetch_add(1, Ordering::Relaxed);
        Self {
            device: self.device.clone(),
        }
    }
}

impl Drop for VdevHandle {
    fn drop(&mut self) {
        if self.device.refs.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            self.device.release();
        }
    }
}

impl Deref for VdevHandle {
    type Target = VirtualDevice;

    fn deref(&self) -> &VirtualDevice {
        &self.device
    }
}

impl core::fmt::Debug for VdevHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(&*self.device, f)
    }
}
