// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Resource table wire format.
//!
//! The resource table is a versioned, self-describing document that the MCU
//! firmware ships and that the host and the MCU both read and write before
//! the MCU becomes active. All fields are little-endian.
//!
//! # Layout
//!
//! ```text
//! +--------------------+
//! | TableHeader        |  version, entry_count, reserved[2]
//! +--------------------+
//! | u32 offsets[count] |  byte offsets from the start of the table
//! +--------------------+
//! | entries ...        |  each starts with a u32 entry type
//! +--------------------+
//! ```
//!
//! A `VdevEntry` is followed by `ring_count` `VringEntry` records and then
//! `config_len` bytes of device config space.


use core::mem::size_of;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Little-endian `u32` as laid out in the table.
pub type Le32 = zerocopy::U32<zerocopy::LittleEndian>;

/// Little-endian `u64` as laid out in the table.
pub type Le64 = zerocopy::U64<zerocopy::LittleEndian>;

// =============================================================================
// Constants
// =============================================================================

/// The only table format version the host understands.
pub const TABLE_VERSION: u32 = 1;

/// Sentinel for "address not assigned yet".
///
/// Only valid before the host binds the entry; never a real address.
pub const ADDR_ANY: u32 = 0xFFFF_FFFF;

/// Sentinel for "notify id not assigned yet".
pub const NOTIFY_ID_ANY: u32 = 0xFFFF_FFFF;

/// Maximum rings per virtual device (one receive, one transmit).
pub const MAX_VRINGS: usize = 2;

/// Length of the NUL-padded name field of a trace entry.
pub const NAME_LEN: usize = 32;

/// Size of the fixed table header.
pub const TABLE_HEADER_SIZE: usize = size_of::<TableHeader>();

/// Size of one offset array slot.
pub const OFFSET_SIZE: usize = size_of::<u32>();

// =============================================================================
// Entry Types
// =============================================================================

/// Resource entry type tag (first word of every entry).
///
/// Values below 128 follow the generic remote processor numbering, 128 and
/// above are vendor entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EntryType {
    /// Log trace buffer shared with the MCU.
    LogTrace = 2,
    /// Virtual device with its rings and config space.
    VirtualDevice = 3,
    /// Board clocks and host time offset (vendor).
    BoardInfo = 128,
}

impl EntryType {
    /// Try to convert from a raw entry type word.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            2 => Some(Self::LogTrace),
            3 => Some(Self::VirtualDevice),
            128 => Some(Self::BoardInfo),
            _ => None,
        }
    }

    /// Returns true for the vendor-specific range.
    #[inline]
    #[must_use]
    pub const fn is_vendor(self) -> bool {
        (self as u32) >= 128
    }
}

// =============================================================================
// Wire Structures
// =============================================================================

/// Table header.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct TableHeader {
    /// Format version, must equal [`TABLE_VERSION`].
    pub version: Le32,
    /// Number of entries (and offset slots).
    pub entry_count: Le32,
    /// Must be zero.
    pub reserved: [Le32; 2],
}

/// Log trace entry: where the MCU writes its text log.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct TraceEntry {
    /// [`EntryType::LogTrace`].
    pub kind: Le32,
    /// NUL-padded UTF-8 name.
    pub name: [u8; NAME_LEN],
    /// Device address of the buffer, [`ADDR_ANY`] until bound.
    pub device_address: Le32,
    /// Buffer length in bytes.
    pub len: Le32,
    /// Must be zero.
    pub reserved: Le32,
}

impl TraceEntry {
    /// Returns the name up to the first NUL, if it is valid UTF-8.
    #[must_use]
    pub fn name_str(&self) -> Option<&str> {
        let end = self.name.iter().position(|&b| b == 0)?;
        core::str::from_utf8(&self.name[..end]).ok()
    }
}

/// Virtual device entry header (followed by rings and config bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct VdevEntry {
    /// [`EntryType::VirtualDevice`].
    pub kind: Le32,
    /// Virtio device id.
    pub id: Le32,
    /// Features offered by the MCU.
    pub device_features: Le32,
    /// Features accepted by the host (host-written).
    pub guest_features: Le32,
    /// Length of the config space after the rings.
    pub config_len: Le32,
    /// Number of [`VringEntry`] records that follow.
    pub ring_count: Le32,
    /// Virtio status byte (host-written, MCU-observed).
    pub status: u8,
    /// Must be zero.
    pub reserved: [u8; 3],
}

impl VdevEntry {
    /// Total entry size including rings and config space.
    ///
    /// Returns `None` on arithmetic overflow.
    #[must_use]
    pub const fn total_size(ring_count: u32, config_len: u32) -> Option<usize> {
        let Some(rings) = (ring_count as usize).checked_mul(VRING_ENTRY_SIZE) else {
            return None;
        };
        let Some(with_rings) = VDEV_ENTRY_SIZE.checked_add(rings) else {
            return None;
        };
        with_rings.checked_add(config_len as usize)
    }
}

/// One ring descriptor inside a virtual device entry.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct VringEntry {
    /// Device address of the ring, [`ADDR_ANY`] until allocated.
    pub device_address: Le32,
    /// Number of descriptors.
    pub len: Le32,
    /// Ring alignment in bytes.
    pub align: Le32,
    /// Notify id, [`NOTIFY_ID_ANY`] until allocated.
    pub notify_id: Le32,
}

/// Board information entry (host-written at boot).
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct BoardInfoEntry {
    /// [`EntryType::BoardInfo`].
    pub kind: Le32,
    /// MCU core clock in Hz.
    pub mcu_clock: Le32,
    /// MCU UART clock in Hz.
    pub uart_clock: Le32,
    /// MCU timer clock in Hz.
    pub timer_clock: Le32,
    /// Host time in nanoseconds when the MCU was released.
    pub time_offset: Le64,
}

/// Size of [`TraceEntry`].
pub const TRACE_ENTRY_SIZE: usize = size_of::<TraceEntry>();

/// Size of the fixed [`VdevEntry`] header.
pub const VDEV_ENTRY_SIZE: usize = size_of::<VdevEntry>();

/// Size of one [`VringEntry`].
pub const VRING_ENTRY_SIZE: usize = size_of::<VringEntry>();

/// Size of [`BoardInfoEntry`].
pub const BOARD_INFO_ENTRY_SIZE: usize = size_of::<BoardInfoEntry>();

// Compile-time verification of the wire layout
const _: () = {
    assert!(TABLE_HEADER_SIZE == 16);
    assert!(TRACE_ENTRY_SIZE == 48);
    assert!(VDEV_ENTRY_SIZE == 28);
    assert!(VRING_ENTRY_SIZE == 16);
    assert!(BOARD_INFO_ENTRY_SIZE == 24);
};
