// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Carveout naming convention.
//!
//! Carveouts are reserved DRAM regions that the host locates by name. Names
//! follow `"<subsystem><index><kind>"`; these names are the only way the
//! supervisor asks the platform for memory.
//!
//! | Name | Backs |
//! |------|-------|
//! | `vdev<i>buffer` | shared buffer of virtual device `i` |
//! | `vdev<i>vring<r>` | ring `r` of virtual device `i` |
//! | `isp0log` | MCU log trace buffer |
//! | `isp0regs` | register mirror |


use core::fmt::{self, Write};

/// Name of the log trace carveout.
pub const LOG_TRACE: &str = "isp0log";

/// Name of the register mirror carveout.
pub const REGISTER_MIRROR: &str = "isp0regs";

/// Maximum length of a carveout name in bytes.
///
/// Every generated name fits, up to `vdev<usize::MAX>vring<usize::MAX>`.
pub const MAX_NAME_LEN: usize = 64;

/// A carveout name stored inline.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CarveoutName {
    bytes: [u8; MAX_NAME_LEN],
    len: usize,
}

impl CarveoutName {
    /// The log trace carveout.
    pub const LOG_TRACE: Self = Self::from_static(LOG_TRACE);

    /// The register mirror carveout.
    pub const REGISTER_MIRROR: Self = Self::from_static(REGISTER_MIRROR);

    /// Name of the shared buffer of a virtual device.
    #[must_use]
    pub fn vdev_buffer(device_index: usize) -> Self {
        Self::format(format_args!("vdev{device_index}buffer"))
    }

    /// Name of one ring of a virtual device.
    #[must_use]
    pub fn vdev_vring(device_index: usize, ring_index: usize) -> Self {
        Self::format(format_args!("vdev{device_index}vring{ring_index}"))
    }

    /// Creates a name from a string.
    ///
    /// Returns `None` for names longer than [`MAX_NAME_LEN`] bytes, so two
    /// distinct names never map to the same carveout.
    #[must_use]
    pub fn new(name: &str) -> Option<Self> {
        (name.len() <= MAX_NAME_LEN).then(|| Self::format(format_args!("{name}")))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        // Only whole UTF-8 sequences are ever written, see `write_str`.
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or_default()
    }

    const fn from_static(name: &'static str) -> Self {
        let src = name.as_bytes();
        assert!(src.len() <= MAX_NAME_LEN, "carveout name too long");
        let mut bytes = [0; MAX_NAME_LEN];
        let mut i = 0;
        while i < src.len() {
            bytes[i] = src[i];
            i += 1;
        }
        Self {
            bytes,
            len: src.len(),
        }
    }

    /// Callers only format names that fit, so `write_str` never truncates.
    fn format(args: fmt::Arguments<'_>) -> Self {
        let mut name = Self {
            bytes: [0; MAX_NAME_LEN],
            len: 0,
        };
        let _ = name.write_fmt(args);
        name
    }
}

impl Write for CarveoutName {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = MAX_NAME_LEN - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.bytes[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        if take < s.len() { Err(fmt::Error) } else { Ok(()) }
    }
}

impl AsRef<str> for CarveoutName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Debug for CarveoutName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for CarveoutName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
