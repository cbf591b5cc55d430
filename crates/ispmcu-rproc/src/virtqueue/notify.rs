// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Dense notify id allocation.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ispmcu_abi::NOTIFY_ID_ANY;

/// Slot map from notify id to value.
///
/// Ids are handed out lowest-first so the id space stays dense; a removed id
/// becomes free again immediately. The highest id ever handed out is tracked
/// as a watermark that never decreases.
#[derive(Debug)]
pub struct NotifyIdTable<T> {
    slots: Vec<Option<T>>,
    free: BinaryHeap<Reverse<u32>>,
    max_id: Option<u32>,
}

impl<T> NotifyIdTable<T> {
    /// Creates an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: BinaryHeap::new(),
            max_id: None,
        }
    }

    /// Stores the value built by `make` under the lowest free id.
    ///
    /// Returns `None` once every id below [`NOTIFY_ID_ANY`] is taken.
    pub fn insert_with(&mut self, make: impl FnOnce(u32) -> T) -> Option<u32> {
        let id = if let Some(Reverse(id)) = self.free.pop() {
            id
        } else {
            let id = u32::try_from(self.slots.len()).ok().filter(|&id| id != NOTIFY_ID_ANY)?;
            self.slots.push(None);
            id
        };
        self.slots[id as usize] = Some(make(id));
        self.max_id = self.max_id.max(Some(id));
        Some(id)
    }

    /// Removes and returns the value stored under `id`.
    pub fn remove(&mut self, id: u32) -> Option<T> {
        let value = self.slots.get_mut(id as usize)?.take()?;
        self.free.push(Reverse(id));
        Some(value)
    }

    /// Returns the value stored under `id`.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<&T> {
        self.slots.get(id as usize)?.as_ref()
    }

    /// Number of ids in use.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Returns true if no id is in use.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest id ever handed out.
    #[must_use]
    pub const fn max_id(&self) -> Option<u32> {
        self.max_id
    }

    /// Ids in use, ascending.
    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(id, _)| id as u32)
    }
}

impl<T> Default for NotifyIdTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
