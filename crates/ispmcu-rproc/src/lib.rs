// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! # ISP MCU remote processor supervisor
//!
//! Host-side boot and lifecycle control for the image-signal-processing
//! microcontroller that shares DRAM and a hardware mailbox with the host.
//!
//! This crate provides:
//! - A validating parser for the firmware resource table
//! - Name-based carveout binding on top of an external region allocator
//! - Virtqueue allocation and the dense notify-id space
//! - Virtual devices exposed to a virtio-style transport consumer
//! - Ordered subdevice hooks (log capture, register mirror, protection)
//! - Mailbox dispatch with a fast path for ring kicks
//! - The supervisor state machine tying all of it together
//!
//! Hardware access goes exclusively through the traits in [`platform`], so
//! the whole stack runs on the host against the mocks in
//! `platform::mock` (enabled by the `mock` feature or in tests).

pub mod carveout;
pub mod config;
pub mod error;
pub mod mailbox;
pub mod platform;
pub mod stats;
pub mod subdev;
pub mod supervisor;
pub mod table;
pub mod vdev;
pub mod virtqueue;
pub mod workqueue;

#[cfg(test)]
mod test_util;

pub use carveout::{Carveout, CarveoutError, CarveoutRegistry};
pub use config::RprocConfig;
pub use error::RprocError;
pub use mailbox::{Dispatch, DropReason, MailboxDispatcher, MailboxError, MessageHandler};
pub use platform::{Platform, PlatformError, Region, RegionAllocator, SharedMemory};
pub use stats::{Stats, StatsSnapshot};
pub use subdev::{LifecycleHook, Subdevice, SubdevError, SubdeviceCoordinator};
pub use supervisor::{RprocState, Supervisor};
pub use table::{ResourceTable, SharedTable, TableBuilder, TableEntry, TableError};
pub use vdev::{
    ConsumerError, TransportConsumer, VdevError, VdevHandle, VdevState, VirtualDevice,
};
pub use virtqueue::{VqInterrupt, Virtqueue, VirtqueueError, VirtqueueManager};

/// Crate version.
pub const VERSION: &str = match option_env!("ISPMCU_VERSION") {
    Some(v) => v,
    None => "unknown",
};
