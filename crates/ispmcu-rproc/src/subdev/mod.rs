// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Subdevice lifecycle coordinator.
//!
//! Subdevices are auxiliary features whose start and stop are ordered around
//! the MCU boot. The set is closed ([`Subdevice`]), each kind implements
//! [`LifecycleHook`].
//!
//! Registration order is the prepare and start order; stop and unprepare run
//! in reverse. A subdevice only gets `stop` while it is available (started
//! and not yet stopped), so a second stop is a no-op.

#[cfg(test)]
mod hooks_test;

mod log_capture;
mod protection;
mod register_mirror;

pub use log_capture::LogCapture;
pub use protection::{Protection, ProtectionState};
pub use register_mirror::RegisterMirror;

use crate::carveout::{CarveoutError, CarveoutRegistry};
use crate::platform::{MemoryError, Platform, PlatformError};

/// Subdevice failures. They fail the boot that triggered them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubdevError {
    /// A required carveout is missing or too small.
    #[error("subdevice `{name}` has no usable carveout")]
    Carveout {
        /// Subdevice name.
        name: &'static str,
        /// Underlying error.
        #[source]
        source: CarveoutError,
    },
    /// Shared memory access failed.
    #[error("subdevice `{name}` could not access shared memory")]
    Memory {
        /// Subdevice name.
        name: &'static str,
        /// Underlying error.
        #[source]
        source: MemoryError,
    },
    /// The MCU could not be reached.
    #[error("subdevice `{name}` could not reach the MCU")]
    Platform {
        /// Subdevice name.
        name: &'static str,
        /// Underlying error.
        #[source]
        source: PlatformError,
    },
}

/// What lifecycle hooks may touch.
#[derive(Clone, Copy)]
pub struct HookContext<'a> {
    /// Carveouts of the processor instance.
    pub carveouts: &'a CarveoutRegistry,
    /// Hardware controls.
    pub platform: &'a dyn Platform,
}

/// Ordered lifecycle callbacks of a subdevice.
pub trait LifecycleHook {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Runs before the MCU is released from reset.
    fn prepare(&mut self, ctx: HookContext<'_>) -> Result<(), SubdevError>;

    /// Runs after the MCU is released from reset.
    fn start(&mut self, ctx: HookContext<'_>) -> Result<(), SubdevError>;

    /// Runs before the MCU is put into reset. `crashed` asks for the fast
    /// path: the MCU is gone, skip anything that needs its cooperation.
    fn stop(&mut self, ctx: HookContext<'_>, crashed: bool);

    /// Runs after the MCU is in reset.
    fn unprepare(&mut self, ctx: HookContext<'_>);
}

/// The closed set of subdevices.
#[derive(Debug)]
pub enum Subdevice {
    /// MCU log trace buffer.
    LogCapture(LogCapture),
    /// Host shadow of MCU-visible registers.
    RegisterMirror(RegisterMirror),
    /// Protected-memory state of the MCU.
    ProtectionState(ProtectionState),
}

impl Subdevice {
    fn hook(&mut self) -> &mut dyn LifecycleHook {
        match self {
            Self::LogCapture(hook) => hook,
            Self::RegisterMirror(hook) => hook,
            Self::ProtectionState(hook) => hook,
        }
    }
}

impl LifecycleHook for Subdevice {
    fn name(&self) -> &'static str {
        match self {
            Self::LogCapture(hook) => hook.name(),
            Self::RegisterMirror(hook) => hook.name(),
            Self::ProtectionState(hook) => hook.name(),
        }
    }

    fn prepare(&mut self, ctx: HookContext<'_>) -> Result<(), SubdevError> {
        self.hook().prepare(ctx)
    }

    fn start(&mut self, ctx: HookContext<'_>) -> Result<(), SubdevError> {
        self.hook().start(ctx)
    }

    fn stop(&mut self, ctx: HookContext<'_>, crashed: bool) {
        self.hook().stop(ctx, crashed);
    }

    fn unprepare(&mut self, ctx: HookContext<'_>) {
        self.hook().unprepare(ctx);
    }
}

// =============================================================================
// Coordinator
// =============================================================================

struct Slot<H> {
    hook: H,
    prepared: bool,
    avail: bool,
}

/// Ordered list of registered subdevices.
pub struct SubdeviceCoordinator<H = Subdevice> {
    slots: Vec<Slot<H>>,
}

impl<H: LifecycleHook> SubdeviceCoordinator<H> {
    /// Creates an empty coordinator.
    #[must_use]
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Appends a subdevice.
    pub fn register(&mut self, hook: H) {
        tracing::debug!(subdevice = hook.name(), "registered subdevice");
        self.slots.push(Slot {
            hook,
            prepared: false,
            avail: false,
        });
    }

    /// Number of registered subdevices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns true if the named subdevice is started.
    #[must_use]
    pub fn is_available(&self, name: &str) -> bool {
        self.slots.iter().any(|slot| slot.avail && slot.hook.name() == name)
    }

    /// Registered subdevices in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &H> {
        self.slots.iter().map(|slot| &slot.hook)
    }

    /// Prepares every subdevice in order.
    ///
    /// On failure the ones already prepared are unprepared in reverse.
    pub fn prepare(&mut self, ctx: HookContext<'_>) -> Result<(), SubdevError> {
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            if let Err(err) = slot.hook.prepare(ctx) {
                tracing::warn!(subdevice = slot.hook.name(), error = %err, "prepare failed");
                self.unprepare(ctx);
                return Err(err);
            }
            slot.prepared = true;
        }
        Ok(())
    }

    /// Starts every subdevice in order.
    ///
    /// On failure the ones already started are stopped in reverse.
    pub fn start(&mut self, ctx: HookContext<'_>) -> Result<(), SubdevError> {
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            if let Err(err) = slot.hook.start(ctx) {
                tracing::warn!(subdevice = slot.hook.name(), error = %err, "start failed");
                self.stop(ctx, false);
                return Err(err);
            }
            slot.avail = true;
        }
        Ok(())
    }

    /// Stops every available subdevice in reverse order.
    pub fn stop(&mut self, ctx: HookContext<'_>, crashed: bool) {
        for slot in self.slots.iter_mut().rev().filter(|slot| slot.avail) {
            slot.hook.stop(ctx, crashed);
            slot.avail = false;
        }
    }

    /// Unprepares every prepared subdevice in reverse order.
    pub fn unprepare(&mut self, ctx: HookContext<'_>) {
        for slot in self.slots.iter_mut().rev().filter(|slot| slot.prepared) {
            slot.hook.unprepare(ctx);
            slot.prepared = false;
        }
    }
}

impl SubdeviceCoordinator<Subdevice> {
    /// The log capture subdevice, if registered.
    #[must_use]
    pub fn log_capture(&self) -> Option<&LogCapture> {
        self.iter().find_map(|subdevice| match subdevice {
            Subdevice::LogCapture(log) => Some(log),
            _ => None,
        })
    }

    /// The register mirror subdevice, if registered.
    pub fn register_mirror_mut(&mut self) -> Option<&mut RegisterMirror> {
        self.slots.iter_mut().find_map(|slot| match &mut slot.hook {
            Subdevice::RegisterMirror(mirror) => Some(mirror),
            _ => None,
        })
    }

    /// The protection state subdevice, if registered.
    #[must_use]
    pub fn protection(&self) -> Option<&ProtectionState> {
        self.iter().find_map(|subdevice| match subdevice {
            Subdevice::ProtectionState(protection) => Some(protection),
            _ => None,
        })
    }
}

impl<H: LifecycleHook> Default for SubdeviceCoordinator<H> {
    fn default() -> Self {
        Self::new()
    }
}
