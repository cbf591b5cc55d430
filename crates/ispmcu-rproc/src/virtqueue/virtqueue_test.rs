// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for virtqueue allocation and interrupt routing.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use crate::platform::SharedMemory;
use crate::platform::mock::{MockPlatform, MockRegions};
use crate::table::{RingSpec, TableBuilder};
use crate::test_util::{RING_ALIGN, RING_LEN, init_tracing, isp_regions, isp_table, ring};
use ispmcu_abi::{ADDR_ANY, NOTIFY_ID_ANY};

struct Fixture {
    regions: Arc<MockRegions>,
    platform: Arc<MockPlatform>,
    stats: Arc<Stats>,
    manager: VirtqueueManager,
}

fn fixture(regions: MockRegions) -> Fixture {
    init_tracing();
    let regions = Arc::new(regions);
    let platform = Arc::new(MockPlatform::new());
    let stats = Arc::new(Stats::new());
    let carveouts = Arc::new(CarveoutRegistry::new(regions.clone()));
    let manager = VirtqueueManager::new(carveouts, platform.clone(), stats.clone());
    Fixture {
        regions,
        platform,
        stats,
        manager,
    }
}

fn shared(raw: &[u8]) -> (SharedTable, VdevLocation) {
    let table = ResourceTable::parse(raw).unwrap();
    let location = table.vdevs().next().unwrap();
    (Arc::new(Mutex::new(table)), location)
}

#[test]
fn allocate_writes_back_address_and_id() {
    let f = fixture(isp_regions(1));
    let (table, location) = shared(&isp_table());

    let rx = f.manager.allocate(&table, location, 0).unwrap();
    let tx = f.manager.allocate(&table, location, 1).unwrap();

    assert_eq!(rx.notify_id(), 0);
    assert_eq!(tx.notify_id(), 1);
    assert_eq!(rx.len(), RING_LEN);
    assert_eq!(rx.align(), RING_ALIGN);
    assert_eq!(rx.size(), 4096);
    assert_eq!(rx.device_address(), 0x0100_0000);
    assert_eq!(tx.device_address(), 0x0100_2000);

    let table = table.lock();
    let entry = table.vring(location, 1).unwrap();
    assert_eq!(entry.device_address.get(), 0x0100_2000);
    assert_eq!(entry.notify_id.get(), 1);
    assert_eq!(f.manager.max_notify_id(), Some(1));
    assert_eq!(f.manager.notify_ids(), vec![0, 1]);
}

#[test]
fn allocate_zeroes_ring_memory() {
    let f = fixture(isp_regions(1));
    let memory = f.regions.memory("vdev0vring0").unwrap();
    memory.fill(0, 0x2000, 0xEE).unwrap();
    let (table, location) = shared(&isp_table());

    f.manager.allocate(&table, location, 0).unwrap();

    let bytes = memory.snapshot();
    assert!(bytes[..4096].iter().all(|&b| b == 0));
    assert!(bytes[4096..].iter().all(|&b| b == 0xEE));
}

#[test]
fn missing_carveout() {
    let f = fixture(MockRegions::new().with_region("vdev0vring0", 0, 0x2000));
    let (table, location) = shared(&isp_table());

    f.manager.allocate(&table, location, 0).unwrap();
    let err = f.manager.allocate(&table, location, 1).unwrap_err();
    assert_eq!(
        err,
        VirtqueueError::Carveout(CarveoutError::NotFound(CarveoutName::vdev_vring(0, 1)))
    );
    // The failed ring keeps its sentinels.
    assert_eq!(
        table.lock().vring(location, 1).unwrap().notify_id.get(),
        NOTIFY_ID_ANY
    );
}

#[test]
fn zero_geometry_rejected() {
    let f = fixture(isp_regions(1));
    for (len, align) in [(0, 64), (128, 0)] {
        let raw = TableBuilder::new()
            .vdev(1, 0, &[RingSpec::new(len, align)], &[])
            .build();
        let (table, location) = shared(&raw);
        assert_eq!(
            f.manager.allocate(&table, location, 0).unwrap_err(),
            VirtqueueError::InvalidGeometry { len, align }
        );
    }
    assert_eq!(f.manager.max_notify_id(), None);
}

#[test]
fn undeclared_ring() {
    let f = fixture(isp_regions(1));
    let raw = TableBuilder::new().vdev(1, 0, &[ring()], &[]).build();
    let (table, location) = shared(&raw);
    assert_eq!(
        f.manager.allocate(&table, location, 1).unwrap_err(),
        VirtqueueError::NoSuchRing { ring: 1 }
    );
}

#[test]
fn ring_larger_than_carveout() {
    let f = fixture(isp_regions(1));
    let raw = TableBuilder::new()
        .vdev(1, 0, &[RingSpec::new(1024, 4096)], &[])
        .build();
    let (table, location) = shared(&raw);
    assert!(matches!(
        f.manager.allocate(&table, location, 0),
        Err(VirtqueueError::Carveout(CarveoutError::AddressOutOfRange { .. }))
    ));
    assert!(f.manager.notify_ids().is_empty());
}

#[test]
fn fixed_address_inside_carveout() {
    let f = fixture(isp_regions(1));
    let raw = TableBuilder::new()
        .vdev(1, 0, &[ring().at(0x0100_1000)], &[])
        .build();
    let (table, location) = shared(&raw);
    let vq = f.manager.allocate(&table, location, 0).unwrap();
    assert_eq!(vq.device_address(), 0x0100_1000);

    let raw = TableBuilder::new()
        .vdev(1, 0, &[ring().at(0x0100_1800)], &[])
        .build();
    let (table, location) = shared(&raw);
    assert!(f.manager.allocate(&table, location, 0).is_err());
}

#[test]
fn free_resets_table_and_releases_id() {
    let f = fixture(isp_regions(1));
    let (table, location) = shared(&isp_table());
    let vq = f.manager.allocate(&table, location, 0).unwrap();

    f.manager.free(&vq);

    let entry = *table.lock().vring(location, 0).unwrap();
    assert_eq!(entry.device_address.get(), ADDR_ANY);
    assert_eq!(entry.notify_id.get(), NOTIFY_ID_ANY);
    assert!(f.manager.notify_ids().is_empty());
    assert_eq!(f.manager.vq_interrupt(0), VqInterrupt::NotFound);
    assert_eq!(f.manager.max_notify_id(), Some(0));
}

#[test]
fn free_after_table_teardown() {
    let f = fixture(isp_regions(1));
    let (table, location) = shared(&isp_table());
    let vq = f.manager.allocate(&table, location, 0).unwrap();
    drop(table);

    f.manager.free(&vq);
    assert!(f.manager.notify_ids().is_empty());
}

#[test]
fn stale_free_keeps_new_owner() {
    let f = fixture(isp_regions(1));
    let (table, location) = shared(&isp_table());
    let first = f.manager.allocate(&table, location, 0).unwrap();
    f.manager.free(&first);
    let second = f.manager.allocate(&table, location, 0).unwrap();
    assert_eq!(second.notify_id(), first.notify_id());

    f.manager.free(&first);
    assert_eq!(f.manager.notify_ids(), vec![second.notify_id()]);
}

#[test]
fn interrupt_runs_callback() {
    let f = fixture(isp_regions(1));
    let (table, location) = shared(&isp_table());
    let vq = f.manager.allocate(&table, location, 1).unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let seen = hits.clone();
    vq.set_callback(Some(Arc::new(move |vq: &Virtqueue| {
        assert_eq!(vq.ring_index(), 1);
        seen.fetch_add(1, Ordering::SeqCst);
    })));

    assert_eq!(f.manager.vq_interrupt(vq.notify_id()), VqInterrupt::Delivered);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    vq.set_callback(None);
    assert_eq!(f.manager.vq_interrupt(vq.notify_id()), VqInterrupt::Delivered);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn unknown_interrupt_is_counted() {
    let f = fixture(isp_regions(1));
    assert_eq!(f.manager.vq_interrupt(42), VqInterrupt::NotFound);
    assert_eq!(f.stats.snapshot().spurious_interrupts, 1);
}

#[test]
fn kick_rings_doorbell() {
    let f = fixture(isp_regions(1));
    let (table, location) = shared(&isp_table());
    f.manager.allocate(&table, location, 0).unwrap();
    let tx = f.manager.allocate(&table, location, 1).unwrap();
    tx.kick();
    assert_eq!(f.platform.kicks(), vec![1]);
}

#[test]
fn ring_memory_is_bounded() {
    let f = fixture(isp_regions(1));
    let (table, location) = shared(&isp_table());
    let vq = f.manager.allocate(&table, location, 1).unwrap();

    vq.write(16, &[1, 2, 3]).unwrap();
    let mut buf = [0; 3];
    vq.read(16, &mut buf).unwrap();
    assert_eq!(buf, [1, 2, 3]);
    assert_eq!(&f.regions.memory("vdev0vring1").unwrap().snapshot()[16..19], &[1, 2, 3]);

    assert!(vq.write(4095, &[0, 0]).is_err());
}
