// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the resource table parser.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use proptest::prelude::*;

/// Byte offset of entry `index`, read from the offset array.
fn entry_offset(table: &[u8], index: usize) -> usize {
    let slot = TABLE_HEADER_SIZE + index * OFFSET_SIZE;
    u32::from_le_bytes(table[slot..slot + 4].try_into().unwrap()) as usize
}

fn put_u32(table: &mut [u8], at: usize, value: u32) {
    table[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn isp_table() -> Vec<u8> {
    TableBuilder::new()
        .trace("isp0log", ADDR_ANY, 0x1000)
        .vdev(7, 0b101, &[RingSpec::new(128, 64), RingSpec::new(128, 64)], &[1, 2, 3, 4])
        .board_info()
        .build()
}

// =============================================================================
// Accepted tables
// =============================================================================

#[test]
fn parse_isp_table() {
    let raw = isp_table();
    let table = ResourceTable::parse(&raw).unwrap();

    assert_eq!(table.entries().len(), 3);
    assert_eq!(table.as_bytes(), raw.as_slice());

    let trace = table.traces().next().unwrap();
    let entry = table.trace(trace).unwrap();
    assert_eq!(entry.name_str(), Some("isp0log"));
    assert_eq!(entry.device_address.get(), ADDR_ANY);
    assert_eq!(entry.len.get(), 0x1000);

    let vdev = table.vdevs().next().unwrap();
    assert_eq!(vdev.index(), 1);
    assert_eq!(vdev.device_index(), 0);
    assert_eq!(vdev.ring_count(), 2);
    assert_eq!(vdev.config_len(), 4);
    assert_eq!(table.vdev(vdev).unwrap().id.get(), 7);
    assert_eq!(table.vdev(vdev).unwrap().device_features.get(), 0b101);
    assert_eq!(table.config(vdev), Some(&[1u8, 2, 3, 4][..]));

    let ring = table.vring(vdev, 1).unwrap();
    assert_eq!(ring.len.get(), 128);
    assert_eq!(ring.align.get(), 64);
    assert_eq!(ring.notify_id.get(), NOTIFY_ID_ANY);
    assert!(table.vring(vdev, 2).is_none());

    assert_eq!(table.board_infos().count(), 1);
}

#[test]
fn empty_table() {
    let table = ResourceTable::parse(&TableBuilder::new().build()).unwrap();
    assert!(table.entries().is_empty());
    assert_eq!(table.as_bytes().len(), TABLE_HEADER_SIZE);
}

#[test]
fn device_index_counts_only_vdevs() {
    let raw = TableBuilder::new()
        .vdev(1, 0, &[], &[])
        .trace("isp0log", ADDR_ANY, 16)
        .vdev(2, 0, &[], &[])
        .build();
    let table = ResourceTable::parse(&raw).unwrap();
    let indices: Vec<_> = table.vdevs().map(|v| (v.index(), v.device_index())).collect();
    assert_eq!(indices, vec![(0, 0), (2, 1)]);
}

#[test]
fn unknown_entries_are_skipped() {
    let raw = TableBuilder::new()
        .raw(99, &[0xAA; 8])
        .trace("isp0log", ADDR_ANY, 16)
        .build();
    let table = ResourceTable::parse(&raw).unwrap();
    assert_eq!(table.entries()[0], TableEntry::Unknown { index: 0, kind: 99 });
    assert_eq!(table.traces().count(), 1);
}

// =============================================================================
// Rejected tables
// =============================================================================

#[test]
fn truncated_header() {
    assert_eq!(
        ResourceTable::parse(&[0; 8]).unwrap_err(),
        TableError::Truncated { len: 8 }
    );
}

#[test]
fn unsupported_version() {
    let mut raw = isp_table();
    put_u32(&mut raw, 0, 2);
    assert_eq!(
        ResourceTable::parse(&raw).unwrap_err(),
        TableError::UnsupportedVersion(2)
    );
}

#[test]
fn reserved_header_words() {
    let mut raw = isp_table();
    put_u32(&mut raw, 12, 1);
    assert_eq!(
        ResourceTable::parse(&raw).unwrap_err(),
        TableError::ReservedHeader
    );
}

#[test]
fn offset_array_overrun() {
    let mut raw = isp_table();
    put_u32(&mut raw, 4, 0x4000_0000);
    assert_eq!(
        ResourceTable::parse(&raw).unwrap_err(),
        TableError::OffsetArrayOverrun { count: 0x4000_0000 }
    );
}

#[test]
fn offset_into_header() {
    let mut raw = isp_table();
    put_u32(&mut raw, TABLE_HEADER_SIZE, 4);
    assert_eq!(
        ResourceTable::parse(&raw).unwrap_err(),
        TableError::OffsetOutOfBounds { index: 0, offset: 4 }
    );
}

#[test]
fn offset_past_end() {
    let mut raw = isp_table();
    let len = raw.len() as u32;
    put_u32(&mut raw, TABLE_HEADER_SIZE + OFFSET_SIZE, len - 2);
    assert_eq!(
        ResourceTable::parse(&raw).unwrap_err(),
        TableError::OffsetOutOfBounds {
            index: 1,
            offset: len as usize - 2
        }
    );
}

#[test]
fn config_len_overrun() {
    let mut raw = isp_table();
    let vdev = entry_offset(&raw, 1);
    // config_len is the fifth word of the entry.
    put_u32(&mut raw, vdev + 16, 0x10_000);
    assert_eq!(
        ResourceTable::parse(&raw).unwrap_err(),
        TableError::EntryOverrun { index: 1 }
    );
}

#[test]
fn config_len_overflow() {
    let mut raw = isp_table();
    let vdev = entry_offset(&raw, 1);
    put_u32(&mut raw, vdev + 16, u32::MAX);
    assert_eq!(
        ResourceTable::parse(&raw).unwrap_err(),
        TableError::EntryOverrun { index: 1 }
    );
}

#[test]
fn truncated_trace_entry() {
    let mut raw = TableBuilder::new().trace("isp0log", ADDR_ANY, 16).build();
    raw.truncate(raw.len() - 1);
    assert_eq!(
        ResourceTable::parse(&raw).unwrap_err(),
        TableError::EntryOverrun { index: 0 }
    );
}

#[test]
fn too_many_rings() {
    let ring = RingSpec::new(16, 16);
    let raw = TableBuilder::new().vdev(1, 0, &[ring, ring, ring], &[]).build();
    assert_eq!(
        ResourceTable::parse(&raw).unwrap_err(),
        TableError::TooManyRings { index: 0, count: 3 }
    );
}

#[test]
fn reserved_trace_field() {
    let mut raw = isp_table();
    let trace = entry_offset(&raw, 0);
    put_u32(&mut raw, trace + 44, 1);
    assert_eq!(
        ResourceTable::parse(&raw).unwrap_err(),
        TableError::ReservedNotZero { index: 0 }
    );
}

#[test]
fn reserved_vdev_padding() {
    let mut raw = isp_table();
    let vdev = entry_offset(&raw, 1);
    raw[vdev + 25] = 1;
    assert_eq!(
        ResourceTable::parse(&raw).unwrap_err(),
        TableError::ReservedNotZero { index: 1 }
    );
}

#[test]
fn unterminated_trace_name() {
    let mut raw = isp_table();
    let trace = entry_offset(&raw, 0);
    raw[trace + 4..trace + 36].fill(b'x');
    assert_eq!(
        ResourceTable::parse(&raw).unwrap_err(),
        TableError::InvalidName { index: 0 }
    );
}

// =============================================================================
// In-place negotiation
// =============================================================================

#[test]
fn host_writes_are_visible_in_bytes() {
    let mut table = ResourceTable::parse(&isp_table()).unwrap();
    let vdev = table.vdevs().next().unwrap();

    let ring = table.vring_mut(vdev, 0).unwrap();
    ring.device_address = Le32::new(0x8000);
    ring.notify_id = Le32::new(3);
    table.vdev_mut(vdev).unwrap().status = 0x0F;
    table.config_mut(vdev).unwrap()[0] = 9;

    let reparsed = ResourceTable::parse(table.as_bytes()).unwrap();
    let vdev = reparsed.vdevs().next().unwrap();
    assert_eq!(reparsed.vring(vdev, 0).unwrap().device_address.get(), 0x8000);
    assert_eq!(reparsed.vring(vdev, 0).unwrap().notify_id.get(), 3);
    assert_eq!(reparsed.vdev(vdev).unwrap().status, 0x0F);
    assert_eq!(reparsed.config(vdev).unwrap()[0], 9);
}

#[test]
fn reset_vring_restores_sentinels() {
    let mut table = ResourceTable::parse(&isp_table()).unwrap();
    let vdev = table.vdevs().next().unwrap();
    let ring = table.vring_mut(vdev, 1).unwrap();
    ring.device_address = Le32::new(0x9000);
    ring.notify_id = Le32::new(1);

    table.reset_vring(vdev, 1);
    let ring = table.vring(vdev, 1).unwrap();
    assert_eq!(ring.device_address.get(), ADDR_ANY);
    assert_eq!(ring.notify_id.get(), NOTIFY_ID_ANY);
    // Out-of-range rings are ignored.
    table.reset_vring(vdev, 5);
}

#[test]
fn board_info_written_in_place() {
    let mut table = ResourceTable::parse(&isp_table()).unwrap();
    let board = table.board_infos().next().unwrap();
    let entry = table.board_info_mut(board).unwrap();
    entry.mcu_clock = Le32::new(400_000_000);
    entry.time_offset = ispmcu_abi::rsc::Le64::new(1 << 40);

    let entry = table.board_info(board).unwrap();
    assert_eq!(entry.mcu_clock.get(), 400_000_000);
    assert_eq!(entry.time_offset.get(), 1 << 40);
}

// =============================================================================
// Properties
// =============================================================================

#[derive(Clone, Debug)]
enum Shape {
    Trace(String, u32, u32),
    Vdev(u32, u32, Vec<(u32, u32)>, Vec<u8>),
    Board,
    Raw(u32, Vec<u8>),
}

fn shape() -> impl Strategy<Value = Shape> {
    prop_oneof![
        ("[a-z0-9]{1,31}", any::<u32>(), any::<u32>())
            .prop_map(|(name, da, len)| Shape::Trace(name, da, len)),
        (
            any::<u32>(),
            any::<u32>(),
            prop::collection::vec((1u32..1024, 1u32..4096), 0..=MAX_VRINGS),
            prop::collection::vec(any::<u8>(), 0..32),
        )
            .prop_map(|(id, features, rings, config)| Shape::Vdev(id, features, rings, config)),
        Just(Shape::Board),
        (200u32..300, prop::collection::vec(any::<u8>(), 0..16))
            .prop_map(|(kind, body)| Shape::Raw(kind, body)),
    ]
}

fn build(shapes: &[Shape]) -> Vec<u8> {
    shapes
        .iter()
        .fold(TableBuilder::new(), |builder, shape| match shape {
            Shape::Trace(name, da, len) => builder.trace(name, *da, *len),
            Shape::Vdev(id, features, rings, config) => {
                let rings: Vec<_> = rings.iter().map(|&(len, align)| RingSpec::new(len, align)).collect();
                builder.vdev(*id, *features, &rings, config)
            }
            Shape::Board => builder.board_info(),
            Shape::Raw(kind, body) => builder.raw(*kind, body),
        })
        .build()
}

proptest! {
    #[test]
    fn parse_round_trips(shapes in prop::collection::vec(shape(), 0..8)) {
        let raw = build(&shapes);
        let table = ResourceTable::parse(&raw).unwrap();
        prop_assert_eq!(table.entries().len(), shapes.len());
        prop_assert_eq!(table.as_bytes(), raw.as_slice());
    }

    #[test]
    fn negotiation_touches_only_negotiated_fields(
        shapes in prop::collection::vec(shape(), 0..8),
        status in any::<u8>(),
        da in any::<u32>(),
        notify_id in any::<u32>(),
    ) {
        let raw = build(&shapes);
        let mut table = ResourceTable::parse(&raw).unwrap();

        let mut allowed = Vec::new();
        let vdevs: Vec<_> = table.vdevs().collect();
        for vdev in vdevs {
            table.vdev_mut(vdev).unwrap().status = status;
            allowed.push(vdev.offset + 24);
            for ring in 0..vdev.ring_count() {
                let entry = table.vring_mut(vdev, ring).unwrap();
                entry.device_address = Le32::new(da);
                entry.notify_id = Le32::new(notify_id);
                let at = vdev.ring_offset(ring);
                allowed.extend(at..at + 4);
                allowed.extend(at + 12..at + 16);
            }
        }

        for (i, (before, after)) in raw.iter().zip(table.as_bytes()).enumerate() {
            if before != after {
                prop_assert!(allowed.contains(&i), "byte {} changed", i);
            }
        }
    }
}
