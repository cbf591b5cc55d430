// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Builder for well-formed resource tables.
//!
//! Used for load-time constant tables and in tests.

use ispmcu_abi::rsc::{
    BoardInfoEntry, EntryType, Le32, Le64, NAME_LEN, OFFSET_SIZE, TABLE_HEADER_SIZE,
    TABLE_VERSION, TableHeader, TraceEntry, VdevEntry, VringEntry,
};
use ispmcu_abi::{ADDR_ANY, NOTIFY_ID_ANY};
use zerocopy::IntoBytes;

/// Ring parameters of a virtual device entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingSpec {
    /// Number of descriptors.
    pub len: u32,
    /// Alignment in bytes.
    pub align: u32,
    /// Requested device address, or [`ADDR_ANY`].
    pub device_address: u32,
}

impl RingSpec {
    /// A ring placed wherever its carveout lives.
    #[must_use]
    pub const fn new(len: u32, align: u32) -> Self {
        Self {
            len,
            align,
            device_address: ADDR_ANY,
        }
    }

    /// Requests a fixed device address.
    #[must_use]
    pub const fn at(self, device_address: u32) -> Self {
        Self {
            device_address,
            ..self
        }
    }
}

/// Assembles a resource table entry by entry.
#[derive(Clone, Debug, Default)]
pub struct TableBuilder {
    entries: Vec<Vec<u8>>,
}

impl TableBuilder {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a log trace entry.
    ///
    /// Names longer than the field are truncated so a NUL always remains.
    #[must_use]
    pub fn trace(mut self, name: &str, device_address: u32, len: u32) -> Self {
        let mut field = [0u8; NAME_LEN];
        let take = name.len().min(NAME_LEN - 1);
        field[..take].copy_from_slice(&name.as_bytes()[..take]);
        let entry = TraceEntry {
            kind: Le32::new(EntryType::LogTrace as u32),
            name: field,
            device_address: Le32::new(device_address),
            len: Le32::new(len),
            reserved: Le32::ZERO,
        };
        self.entries.push(entry.as_bytes().to_vec());
        self
    }

    /// Appends a virtual device entry with its rings and config space.
    #[must_use]
    pub fn vdev(mut self, id: u32, features: u32, rings: &[RingSpec], config: &[u8]) -> Self {
        let header = VdevEntry {
            kind: Le32::new(EntryType::VirtualDevice as u32),
            id: Le32::new(id),
            device_features: Le32::new(features),
            guest_features: Le32::ZERO,
            config_len: Le32::new(config.len() as u32),
            ring_count: Le32::new(rings.len() as u32),
            status: 0,
            reserved: [0; 3],
        };
        let mut bytes = header.as_bytes().to_vec();
        for ring in rings {
            let entry = VringEntry {
                device_address: Le32::new(ring.device_address),
                len: Le32::new(ring.len),
                align: Le32::new(ring.align),
                notify_id: Le32::new(NOTIFY_ID_ANY),
            };
            bytes.extend_from_slice(entry.as_bytes());
        }
        bytes.extend_from_slice(config);
        self.entries.push(bytes);
        self
    }

    /// Appends an empty board information entry for the host to fill.
    #[must_use]
    pub fn board_info(mut self) -> Self {
        let entry = BoardInfoEntry {
            kind: Le32::new(EntryType::BoardInfo as u32),
            mcu_clock: Le32::ZERO,
            uart_clock: Le32::ZERO,
            timer_clock: Le32::ZERO,
            time_offset: Le64::ZERO,
        };
        self.entries.push(entry.as_bytes().to_vec());
        self
    }

    /// Appends an entry of arbitrary type followed by `body`.
    #[must_use]
    pub fn raw(mut self, kind: u32, body: &[u8]) -> Self {
        let mut bytes = kind.to_le_bytes().to_vec();
        bytes.extend_from_slice(body);
        self.entries.push(bytes);
        self
    }

    /// Serializes header, offset array and entries.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let header = TableHeader {
            version: Le32::new(TABLE_VERSION),
            entry_count: Le32::new(self.entries.len() as u32),
            reserved: [Le32::ZERO; 2],
        };
        let mut out = header.as_bytes().to_vec();

        let mut offset = TABLE_HEADER_SIZE + self.entries.len() * OFFSET_SIZE;
        for entry in &self.entries {
            out.extend_from_slice(&(offset as u32).to_le_bytes());
            offset += entry.len();
        }
        for entry in &self.entries {
            out.extend_from_slice(entry);
        }
        out
    }
}
