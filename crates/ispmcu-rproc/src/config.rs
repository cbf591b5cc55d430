// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Supervisor configuration.
//!
//! The configuration is a plain value built by the integrator; nothing here
//! is read from the environment or a device tree.


use ispmcu_abi::PAGE_SIZE;

/// Bytes at the start of each shared buffer reserved for the device header.
pub const SHARED_REGION_HEADER: usize = PAGE_SIZE;

/// Static description of one remote processor instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RprocConfig {
    /// Instance name used in log output.
    pub name: String,
    /// Clocks enabled in order at boot and disabled in reverse at stop.
    pub clocks: Vec<String>,
    /// Supply rails enabled in order at boot and disabled in reverse at stop.
    pub rails: Vec<String>,
    /// Clock whose rate is reported as the MCU core clock.
    pub mcu_clock: String,
    /// Clock whose rate is reported as the MCU UART clock.
    pub uart_clock: String,
    /// Clock whose rate is reported as the MCU timer clock.
    pub timer_clock: String,
    /// Interrupt line of the inbound mailbox.
    pub mailbox_irq: u32,
    /// Virtio features the host side supports.
    pub supported_features: u64,
    /// Worker threads serving typed mailbox messages.
    pub mailbox_workers: usize,
    /// Capacity of the typed message queue.
    pub message_queue_depth: usize,
    /// Capacity of the ring kick queue.
    pub kick_queue_depth: usize,
    /// Registers shadowed through the register mirror; zero disables it.
    pub register_mirror_words: usize,
    /// Restart the MCU automatically after a crash report.
    pub auto_recovery: bool,
}

impl RprocConfig {
    /// Returns true if the register mirror subdevice is configured.
    #[inline]
    #[must_use]
    pub const fn has_register_mirror(&self) -> bool {
        self.register_mirror_words > 0
    }
}

impl Default for RprocConfig {
    fn default() -> Self {
        Self {
            name: "isp0".to_owned(),
            clocks: vec!["isp-mcu".to_owned(), "isp-mcu-uart".to_owned()],
            rails: vec!["vdd-isp".to_owned()],
            mcu_clock: "isp-mcu".to_owned(),
            uart_clock: "isp-mcu-uart".to_owned(),
            timer_clock: "isp-mcu".to_owned(),
            mailbox_irq: 0,
            supported_features: u64::from(u32::MAX),
            mailbox_workers: 2,
            message_queue_depth: 64,
            kick_queue_depth: 64,
            register_mirror_words: 0,
            auto_recovery: false,
        }
    }
}
