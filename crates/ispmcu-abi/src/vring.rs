// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Split virtqueue geometry.
//!
//! A ring of `num` descriptors occupies, in order:
//!
//! ```text
//! struct desc  { le64 addr; le32 len; le16 flags; le16 next; } [num]
//! struct avail { le16 flags; le16 idx; le16 ring[num]; le16 used_event; }
//! -- padding up to `align` --
//! struct used  { le16 flags; le16 idx; struct { le32 id; le32 len; } ring[num]; le16 avail_event; }
//! ```


/// Page size used to round carveout allocations.
pub const PAGE_SIZE: usize = 4096;

/// Size of one descriptor.
pub const DESC_SIZE: usize = 16;

/// Size of one used ring element.
pub const USED_ELEMENT_SIZE: usize = 8;

/// Size of one 16-bit ring field.
const U16_SIZE: usize = 2;

/// Returns the byte size of a split ring with `num` descriptors.
///
/// `align` must be non-zero; it does not need to be a power of two. Returns
/// `None` if `align` is zero or the size overflows.
#[must_use]
pub const fn vring_size(num: usize, align: usize) -> Option<usize> {
    if align == 0 {
        return None;
    }
    let Some(desc) = DESC_SIZE.checked_mul(num) else {
        return None;
    };
    let Some(avail_words) = num.checked_add(3) else {
        return None;
    };
    let Some(avail) = U16_SIZE.checked_mul(avail_words) else {
        return None;
    };
    let Some(front) = desc.checked_add(avail) else {
        return None;
    };
    let Some(front) = round_up(front, align) else {
        return None;
    };
    let Some(used_ring) = USED_ELEMENT_SIZE.checked_mul(num) else {
        return None;
    };
    let Some(used) = (U16_SIZE * 3).checked_add(used_ring) else {
        return None;
    };
    front.checked_add(used)
}

/// Rounds `size` up to a whole number of pages.
#[must_use]
pub const fn page_align(size: usize) -> Option<usize> {
    round_up(size, PAGE_SIZE)
}

const fn round_up(value: usize, align: usize) -> Option<usize> {
    let Some(units) = value.checked_add(align - 1) else {
        return None;
    };
    (units / align).checked_mul(align)
}
