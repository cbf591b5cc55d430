// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Shared fixtures for unit tests.

use ispmcu_abi::ADDR_ANY;
use tracing_subscriber::EnvFilter;

use crate::platform::mock::MockRegions;
use crate::table::{RingSpec, TableBuilder};

/// Descriptors per ring in the standard table.
pub const RING_LEN: u32 = 128;

/// Ring alignment in the standard table.
pub const RING_ALIGN: u32 = 64;

/// Virtio device id of the standard device.
pub const DEVICE_ID: u32 = 7;

/// Features offered by the standard device.
pub const DEVICE_FEATURES: u32 = 0b1011;

/// Installs a test-writer subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Log trace entry, one two-ring device with eight config bytes, board info.
pub fn isp_table() -> Vec<u8> {
    TableBuilder::new()
        .trace("isp0log", ADDR_ANY, 0x1000)
        .vdev(DEVICE_ID, DEVICE_FEATURES, &[ring(), ring()], &[0; 8])
        .board_info()
        .build()
}

/// The ring every standard device uses.
pub const fn ring() -> RingSpec {
    RingSpec::new(RING_LEN, RING_ALIGN)
}

/// Regions backing `count` standard devices plus log and register mirror.
pub fn isp_regions(count: usize) -> MockRegions {
    let mut regions = MockRegions::new()
        .with_region("isp0log", 0x0010_0000, 0x1000)
        .with_region("isp0regs", 0x0011_0000, 0x1000);
    for device in 0..count {
        let base = 0x0100_0000 + (device as u32) * 0x0010_0000;
        regions = regions
            .with_region(&format!("vdev{device}vring0"), base, 0x2000)
            .with_region(&format!("vdev{device}vring1"), base + 0x2000, 0x2000)
            .with_region(&format!("vdev{device}buffer"), base + 0x8000, 0x1_0000);
    }
    regions
}
