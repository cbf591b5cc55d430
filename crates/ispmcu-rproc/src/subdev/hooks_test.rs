// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the individual subdevices.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use ispmcu_abi::{CarveoutName, MailboxMessage};

use super::*;
use crate::platform::SharedMemory;
use crate::platform::mock::{MockPlatform, MockRegions};
use crate::test_util::isp_regions;

struct Env {
    regions: Arc<MockRegions>,
    carveouts: CarveoutRegistry,
    platform: MockPlatform,
}

impl Env {
    fn new(regions: MockRegions) -> Self {
        let regions = Arc::new(regions);
        Self {
            carveouts: CarveoutRegistry::new(regions.clone()),
            regions,
            platform: MockPlatform::new(),
        }
    }

    fn ctx(&self) -> HookContext<'_> {
        HookContext {
            carveouts: &self.carveouts,
            platform: &self.platform,
        }
    }
}

// =============================================================================
// Log capture
// =============================================================================

#[test]
fn log_capture_without_carveout_is_unavailable() {
    let env = Env::new(MockRegions::new());
    let mut log = LogCapture::new();
    log.prepare(env.ctx()).unwrap();
    log.start(env.ctx()).unwrap();
    assert!(!log.is_live());
    assert_eq!(log.snapshot(), None);
}

#[test]
fn log_capture_needs_bound_carveout() {
    // Present at the allocator but never bound: start only looks it up.
    let env = Env::new(isp_regions(0));
    let mut log = LogCapture::new();
    log.start(env.ctx()).unwrap();
    assert!(!log.is_live());
}

#[test]
fn log_capture_reads_text() {
    let env = Env::new(isp_regions(0));
    env.carveouts.bind(CarveoutName::LOG_TRACE).unwrap();
    env.regions
        .memory("isp0log")
        .unwrap()
        .write(0, b"boot ok\n\0garbage")
        .unwrap();

    let mut log = LogCapture::new();
    log.start(env.ctx()).unwrap();
    assert!(log.is_live());
    assert_eq!(log.snapshot().as_deref(), Some("boot ok\n"));

    log.stop(env.ctx(), false);
    assert!(!log.is_live());
    assert_eq!(log.crash_log(), None);
}

#[test]
fn log_capture_keeps_crash_log() {
    let env = Env::new(isp_regions(0));
    env.carveouts.bind(CarveoutName::LOG_TRACE).unwrap();
    env.regions
        .memory("isp0log")
        .unwrap()
        .write(0, b"panic at 0x1234\0")
        .unwrap();

    let mut log = LogCapture::new();
    log.start(env.ctx()).unwrap();
    log.stop(env.ctx(), true);
    assert_eq!(log.crash_log(), Some("panic at 0x1234"));
    assert_eq!(log.snapshot(), None);
}

// =============================================================================
// Register mirror
// =============================================================================

#[test]
fn register_mirror_round_trip() {
    let env = Env::new(isp_regions(0));
    let memory = env.regions.memory("isp0regs").unwrap();
    let mut mirror = RegisterMirror::new(4);
    assert!(mirror.set(1, 0xDEAD_BEEF));
    assert!(!mirror.set(4, 1));

    mirror.prepare(env.ctx()).unwrap();
    mirror.start(env.ctx()).unwrap();
    assert_eq!(&memory.snapshot()[4..8], &0xDEAD_BEEFu32.to_le_bytes());

    // The MCU updates register 2.
    memory.write(8, &7u32.to_le_bytes()).unwrap();
    mirror.stop(env.ctx(), false);
    assert_eq!(mirror.shadow(), &[0, 0xDEAD_BEEF, 7, 0]);
}

#[test]
fn register_mirror_skips_read_back_after_crash() {
    let env = Env::new(isp_regions(0));
    let memory = env.regions.memory("isp0regs").unwrap();
    let mut mirror = RegisterMirror::new(2);
    mirror.prepare(env.ctx()).unwrap();
    mirror.start(env.ctx()).unwrap();

    memory.write(0, &[0xFF; 8]).unwrap();
    mirror.stop(env.ctx(), true);
    assert_eq!(mirror.shadow(), &[0, 0]);
}

#[test]
fn register_mirror_requires_carveout() {
    let env = Env::new(MockRegions::new());
    let mut mirror = RegisterMirror::new(2);
    assert!(matches!(
        mirror.prepare(env.ctx()),
        Err(SubdevError::Carveout {
            source: CarveoutError::NotFound(_),
            ..
        })
    ));
}

#[test]
fn register_mirror_too_large() {
    let env = Env::new(isp_regions(0));
    let mut mirror = RegisterMirror::new(0x1000);
    assert!(matches!(
        mirror.prepare(env.ctx()),
        Err(SubdevError::Carveout {
            source: CarveoutError::AddressOutOfRange { .. },
            ..
        })
    ));
}

// =============================================================================
// Protection state
// =============================================================================

#[test]
fn protection_round_trip() {
    let env = Env::new(MockRegions::new());
    let mut protection = ProtectionState::new();
    assert_eq!(protection.state(), Protection::Unprotected);

    protection.start(env.ctx()).unwrap();
    assert_eq!(protection.state(), Protection::Protected);
    protection.stop(env.ctx(), false);
    assert_eq!(protection.state(), Protection::Unprotected);

    assert_eq!(
        env.platform.messages(),
        vec![
            MailboxMessage::protection(true),
            MailboxMessage::protection(false)
        ]
    );
}

#[test]
fn protection_crash_skips_release() {
    let env = Env::new(MockRegions::new());
    let mut protection = ProtectionState::new();
    protection.start(env.ctx()).unwrap();
    protection.stop(env.ctx(), true);

    assert_eq!(protection.state(), Protection::Unprotected);
    assert_eq!(env.platform.messages(), vec![MailboxMessage::protection(true)]);
}

#[test]
fn protection_start_fails_without_mailbox() {
    let env = Env::new(MockRegions::new());
    env.platform.fail_messages(true);
    let mut protection = ProtectionState::new();
    assert_eq!(
        protection.start(env.ctx()).unwrap_err(),
        SubdevError::Platform {
            name: "protection-state",
            source: PlatformError::MailboxBusy
        }
    );
    assert_eq!(protection.state(), Protection::Unprotected);
}

#[test]
fn subdevice_enum_delegates() {
    let env = Env::new(MockRegions::new());
    let mut coordinator = SubdeviceCoordinator::new();
    coordinator.register(Subdevice::LogCapture(LogCapture::new()));
    coordinator.register(Subdevice::ProtectionState(ProtectionState::new()));

    coordinator.prepare(env.ctx()).unwrap();
    coordinator.start(env.ctx()).unwrap();
    assert!(coordinator.is_available("log-capture"));
    assert_eq!(
        coordinator.protection().unwrap().state(),
        Protection::Protected
    );
    assert!(!coordinator.log_capture().unwrap().is_live());
    assert!(coordinator.register_mirror_mut().is_none());

    coordinator.stop(env.ctx(), false);
    assert_eq!(
        coordinator.protection().unwrap().state(),
        Protection::Unprotected
    );
}
