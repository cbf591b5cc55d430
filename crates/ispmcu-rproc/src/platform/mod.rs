// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Platform abstraction for the supervisor.
//!
//! Everything outside the supervisor core (clock and rail control, interrupt
//! lines, the mailbox transmitter, MCU reset, named memory regions) is reached
//! through these traits, allowing the core to be tested on the host.


#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod traits;

pub use traits::{MemoryError, Platform, PlatformError, Region, RegionAllocator, SharedMemory};
