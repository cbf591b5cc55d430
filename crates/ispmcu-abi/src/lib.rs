// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Wire formats shared between the ISP MCU firmware and the host supervisor.
//!
//! This crate defines the contract between the two sides of the shared DRAM
//! and the hardware mailbox:
//! - Resource table layout (header, entry types, rings, sentinels)
//! - Mailbox message layout and the reserved message types
//! - Carveout naming convention
//! - Split-ring geometry used to size vring carveouts
//!
//! # Design Principles
//!
//! - **No allocation**: Pure data types, usable from firmware
//! - **Stable layout**: Wire structs are `#[repr(C)]` with explicit
//!   little-endian fields, so they have no padding and no alignment needs
//! - **Host-testable**: Everything here runs in plain `cargo test`
//!
//! # Modules
//!
//! - [`rsc`]: Resource table structures and constants
//! - [`mbox`]: Mailbox message format
//! - [`names`]: Carveout names
//! - [`vring`]: Ring size calculation

#![cfg_attr(not(test), no_std)]

pub mod mbox;
pub mod names;
pub mod rsc;
pub mod vring;

// Re-export commonly used types at crate root
pub use mbox::{MailboxMessage, MessageType};
pub use names::CarveoutName;
pub use rsc::{ADDR_ANY, EntryType, MAX_VRINGS, NOTIFY_ID_ANY};
pub use vring::{PAGE_SIZE, page_align, vring_size};
