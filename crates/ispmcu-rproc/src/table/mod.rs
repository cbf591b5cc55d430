// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Resource table catalog.
//!
//! [`ResourceTable::parse`] validates a raw table and keeps its own copy of
//! the bytes. The table is a two-way negotiation document: carveout binding
//! and virtqueue allocation later fill in the "unset" fields in place, and
//! the MCU reads them back. All mutation goes through typed views into that
//! copy, so [`ResourceTable::as_bytes`] always reflects the live state.

#[cfg(test)]
mod table_test;

mod builder;

pub use builder::{RingSpec, TableBuilder};

use ispmcu_abi::rsc::{
    BoardInfoEntry, EntryType, Le32, OFFSET_SIZE, TABLE_HEADER_SIZE, TABLE_VERSION, TableHeader,
    TraceEntry, VDEV_ENTRY_SIZE, VRING_ENTRY_SIZE, VdevEntry, VringEntry,
};
use ispmcu_abi::{ADDR_ANY, MAX_VRINGS, NOTIFY_ID_ANY};
use parking_lot::Mutex;
use std::sync::Arc;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// The cached table of a running processor, shared by everything that
/// negotiates through it.
pub type SharedTable = Arc<Mutex<ResourceTable>>;

/// Reasons a resource table is rejected.
///
/// Every variant is fatal for the boot that parsed the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// The buffer is too small for the table header.
    #[error("table of {len} bytes is too small for its header")]
    Truncated {
        /// Buffer length.
        len: usize,
    },
    /// The header carries a version this host does not understand.
    #[error("unsupported table version {0}")]
    UnsupportedVersion(u32),
    /// A reserved header word is not zero.
    #[error("reserved header field is not zero")]
    ReservedHeader,
    /// The offset array runs past the end of the buffer.
    #[error("offset array of {count} entries overruns the table")]
    OffsetArrayOverrun {
        /// Advertised entry count.
        count: usize,
    },
    /// An entry offset points outside the entry area.
    #[error("entry {index} offset {offset:#x} is out of bounds")]
    OffsetOutOfBounds {
        /// Entry index.
        index: usize,
        /// Offending offset.
        offset: usize,
    },
    /// An entry's declared size runs past the end of the buffer.
    #[error("entry {index} overruns the table")]
    EntryOverrun {
        /// Entry index.
        index: usize,
    },
    /// A reserved field inside an entry is not zero.
    #[error("reserved field of entry {index} is not zero")]
    ReservedNotZero {
        /// Entry index.
        index: usize,
    },
    /// A virtual device asks for more rings than supported.
    #[error("entry {index} requests {count} rings, at most {MAX_VRINGS} are supported")]
    TooManyRings {
        /// Entry index.
        index: usize,
        /// Requested ring count.
        count: u32,
    },
    /// A trace entry name is not NUL-terminated UTF-8.
    #[error("entry {index} has an invalid name")]
    InvalidName {
        /// Entry index.
        index: usize,
    },
}

// =============================================================================
// Entry locations
// =============================================================================

/// Position of a log trace entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceLocation {
    index: usize,
    offset: usize,
}

impl TraceLocation {
    /// Entry index in the offset array.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

/// Position and shape of a virtual device entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VdevLocation {
    index: usize,
    offset: usize,
    device: usize,
    ring_count: usize,
    config_len: usize,
}

impl VdevLocation {
    /// Entry index in the offset array.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Position among the virtual device entries, used for carveout names.
    #[must_use]
    pub const fn device_index(&self) -> usize {
        self.device
    }

    /// Number of rings the entry declares.
    #[must_use]
    pub const fn ring_count(&self) -> usize {
        self.ring_count
    }

    /// Length of the config space.
    #[must_use]
    pub const fn config_len(&self) -> usize {
        self.config_len
    }

    const fn ring_offset(&self, ring: usize) -> usize {
        self.offset + VDEV_ENTRY_SIZE + ring * VRING_ENTRY_SIZE
    }

    const fn config_offset(&self) -> usize {
        self.ring_offset(self.ring_count)
    }
}

/// Position of a board information entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoardInfoLocation {
    index: usize,
    offset: usize,
}

/// A validated table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableEntry {
    /// Log trace buffer.
    LogTrace(TraceLocation),
    /// Virtual device.
    VirtualDevice(VdevLocation),
    /// Board information.
    BoardInfo(BoardInfoLocation),
    /// Entry of a type this host does not know; left untouched.
    Unknown {
        /// Entry index.
        index: usize,
        /// Raw entry type.
        kind: u32,
    },
}

// =============================================================================
// Resource Table
// =============================================================================

/// A parsed resource table owning its live bytes.
#[derive(Clone, Debug)]
pub struct ResourceTable {
    bytes: Vec<u8>,
    entries: Vec<TableEntry>,
}

impl ResourceTable {
    /// Validates `raw` and takes a copy of it.
    pub fn parse(raw: &[u8]) -> Result<Self, TableError> {
        let (header, _) = TableHeader::read_from_prefix(raw)
            .map_err(|_| TableError::Truncated { len: raw.len() })?;

        let version = header.version.get();
        if version != TABLE_VERSION {
            return Err(TableError::UnsupportedVersion(version));
        }
        if header.reserved.iter().any(|word| word.get() != 0) {
            return Err(TableError::ReservedHeader);
        }

        let count = header.entry_count.get() as usize;
        let entries_start = count
            .checked_mul(OFFSET_SIZE)
            .and_then(|size| size.checked_add(TABLE_HEADER_SIZE))
            .filter(|&end| end <= raw.len())
            .ok_or(TableError::OffsetArrayOverrun { count })?;

        let mut entries = Vec::with_capacity(count);
        let mut devices = 0;
        for (index, slot) in raw[TABLE_HEADER_SIZE..entries_start]
            .chunks_exact(OFFSET_SIZE)
            .enumerate()
        {
            let offset = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]) as usize;
            let entry = parse_entry(raw, entries_start, index, offset, devices)?;
            if matches!(entry, TableEntry::VirtualDevice(_)) {
                devices += 1;
            }
            entries.push(entry);
        }

        tracing::debug!(entries = count, len = raw.len(), "parsed resource table");
        Ok(Self {
            bytes: raw.to_vec(),
            entries,
        })
    }

    /// The live table bytes, including everything the host filled in.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// All entries in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    /// Virtual device entries in declaration order.
    pub fn vdevs(&self) -> impl Iterator<Item = VdevLocation> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            TableEntry::VirtualDevice(location) => Some(*location),
            _ => None,
        })
    }

    /// Log trace entries in declaration order.
    pub fn traces(&self) -> impl Iterator<Item = TraceLocation> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            TableEntry::LogTrace(location) => Some(*location),
            _ => None,
        })
    }

    /// Board information entries in declaration order.
    pub fn board_infos(&self) -> impl Iterator<Item = BoardInfoLocation> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            TableEntry::BoardInfo(location) => Some(*location),
            _ => None,
        })
    }

    /// View of a log trace entry.
    #[must_use]
    pub fn trace(&self, location: TraceLocation) -> Option<&TraceEntry> {
        self.view(location.offset)
    }

    /// Mutable view of a log trace entry.
    pub fn trace_mut(&mut self, location: TraceLocation) -> Option<&mut TraceEntry> {
        self.view_mut(location.offset)
    }

    /// View of a virtual device entry header.
    #[must_use]
    pub fn vdev(&self, location: VdevLocation) -> Option<&VdevEntry> {
        self.view(location.offset)
    }

    /// Mutable view of a virtual device entry header.
    pub fn vdev_mut(&mut self, location: VdevLocation) -> Option<&mut VdevEntry> {
        self.view_mut(location.offset)
    }

    /// View of one ring of a virtual device.
    #[must_use]
    pub fn vring(&self, location: VdevLocation, ring: usize) -> Option<&VringEntry> {
        if ring >= location.ring_count {
            return None;
        }
        self.view(location.ring_offset(ring))
    }

    /// Mutable view of one ring of a virtual device.
    pub fn vring_mut(&mut self, location: VdevLocation, ring: usize) -> Option<&mut VringEntry> {
        if ring >= location.ring_count {
            return None;
        }
        self.view_mut(location.ring_offset(ring))
    }

    /// Marks a ring's address and notify id as unset again.
    pub fn reset_vring(&mut self, location: VdevLocation, ring: usize) {
        if let Some(entry) = self.vring_mut(location, ring) {
            entry.device_address = Le32::new(ADDR_ANY);
            entry.notify_id = Le32::new(NOTIFY_ID_ANY);
        }
    }

    /// Config space of a virtual device.
    #[must_use]
    pub fn config(&self, location: VdevLocation) -> Option<&[u8]> {
        let start = location.config_offset();
        self.bytes.get(start..start + location.config_len)
    }

    /// Mutable config space of a virtual device.
    pub fn config_mut(&mut self, location: VdevLocation) -> Option<&mut [u8]> {
        let start = location.config_offset();
        self.bytes.get_mut(start..start + location.config_len)
    }

    /// Mutable view of a board information entry.
    pub fn board_info_mut(&mut self, location: BoardInfoLocation) -> Option<&mut BoardInfoEntry> {
        self.view_mut(location.offset)
    }

    /// View of a board information entry.
    #[must_use]
    pub fn board_info(&self, location: BoardInfoLocation) -> Option<&BoardInfoEntry> {
        self.view(location.offset)
    }

    // Locations are produced by `parse` of this very buffer, whose length
    // never changes, so the views below only fail for a foreign location.
    fn view<T: FromBytes + KnownLayout + Immutable>(&self, offset: usize) -> Option<&T> {
        T::ref_from_prefix(self.bytes.get(offset..)?)
            .ok()
            .map(|(entry, _)| entry)
    }

    fn view_mut<T: FromBytes + IntoBytes + KnownLayout>(&mut self, offset: usize) -> Option<&mut T> {
        T::mut_from_prefix(self.bytes.get_mut(offset..)?)
            .ok()
            .map(|(entry, _)| entry)
    }
}

fn parse_entry(
    raw: &[u8],
    entries_start: usize,
    index: usize,
    offset: usize,
    device: usize,
) -> Result<TableEntry, TableError> {
    if offset < entries_start || offset.checked_add(4).is_none_or(|end| end > raw.len()) {
        return Err(TableError::OffsetOutOfBounds { index, offset });
    }
    let body = &raw[offset..];
    let (kind, _) = Le32::read_from_prefix(body).map_err(|_| TableError::EntryOverrun { index })?;

    let entry = match EntryType::from_u32(kind.get()) {
        Some(EntryType::LogTrace) => {
            let (entry, _) = TraceEntry::read_from_prefix(body)
                .map_err(|_| TableError::EntryOverrun { index })?;
            if entry.reserved.get() != 0 {
                return Err(TableError::ReservedNotZero { index });
            }
            if entry.name_str().is_none() {
                return Err(TableError::InvalidName { index });
            }
            TableEntry::LogTrace(TraceLocation { index, offset })
        }
        Some(EntryType::VirtualDevice) => {
            let (entry, _) = VdevEntry::read_from_prefix(body)
                .map_err(|_| TableError::EntryOverrun { index })?;
            if entry.reserved != [0; 3] {
                return Err(TableError::ReservedNotZero { index });
            }
            let ring_count = entry.ring_count.get();
            if ring_count as usize > MAX_VRINGS {
                return Err(TableError::TooManyRings {
                    index,
                    count: ring_count,
                });
            }
            let config_len = entry.config_len.get();
            let size = VdevEntry::total_size(ring_count, config_len)
                .ok_or(TableError::EntryOverrun { index })?;
            if size > body.len() {
                return Err(TableError::EntryOverrun { index });
            }
            TableEntry::VirtualDevice(VdevLocation {
                index,
                offset,
                device,
                ring_count: ring_count as usize,
                config_len: config_len as usize,
            })
        }
        Some(EntryType::BoardInfo) => {
            BoardInfoEntry::ref_from_prefix(body).map_err(|_| TableError::EntryOverrun { index })?;
            TableEntry::BoardInfo(BoardInfoLocation { index, offset })
        }
        None => {
            tracing::warn!(index, kind = kind.get(), "skipping unknown resource entry");
            TableEntry::Unknown {
                index,
                kind: kind.get(),
            }
        }
    };
    Ok(entry)
}
