// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Reference-counted table of driver-visible handles
//!
//! Handles are issued from a strictly increasing counter and never reused
//! while the table lives, so a stale id can only ever miss; it can never
//! alias a newer object.

use crate::types::HandleId;
use std::collections::HashMap;
use std::sync::Mutex;

struct Slot<T> {
    refs: u32,
    target: T,
}

/// Outcome of dropping one reference.
#[derive(Debug, PartialEq, Eq)]
pub enum Release<T> {
    /// Last reference gone; the entry has been removed
    Closed(T),
    /// Other references remain
    Retained(u32),
    /// Unknown or already-closed handle
    Absent,
}

impl<T> Release<T> {
    pub fn is_closed(&self) -> bool {
        matches!(self, Release::Closed(_))
    }
}

pub struct HandleTable<T> {
    slots: Mutex<HashMap<HandleId, Slot<T>>>,
    next_handle_id: Mutex<u64>,
}

impl<T: Clone> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_handle_id: Mutex::new(1),
        }
    }

    /// Registers `target` with a single reference.
    pub fn alloc(&self, target: T) -> HandleId {
        let id = {
            let mut next = self.next_handle_id.lock().unwrap();
            let id = HandleId::new(*next);
            *next += 1;
            id
        };
        self.slots.lock().unwrap().insert(id, Slot { refs: 1, target });
        id
    }

    pub fn get(&self, id: HandleId) -> Option<T> {
        self.slots.lock().unwrap().get(&id).map(|slot| slot.target.clone())
    }

    /// Adds a reference and returns the target.
    pub fn acquire(&self, id: HandleId) -> Option<T> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.get_mut(&id)?;
        slot.refs = slot.refs.saturating_add(1);
        Some(slot.target.clone())
    }

    /// Drops a reference, removing the entry when none remain.
    pub fn release(&self, id: HandleId) -> Release<T> {
        let mut slots = self.slots.lock().unwrap();
        let Some(slot) = slots.get_mut(&id) else {
            return Release::Absent;
        };
        slot.refs -= 1;
        if slot.refs > 0 {
            return Release::Retained(slot.refs);
        }
        match slots.remove(&id) {
            Some(slot) => Release::Closed(slot.target),
            None => Release::Absent,
        }
    }

    /// Removes the entry whatever its reference count.
    pub fn free(&self, id: HandleId) -> Option<T> {
        self.slots.lock().unwrap().remove(&id).map(|slot| slot.target)
    }

    /// Swaps the target of a live handle, returning the previous one.
    ///
    /// Unknown ids are left unknown; the table only hands out ids via `alloc`.
    pub fn set(&self, id: HandleId, target: T) -> Option<T> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.get_mut(&id)?;
        Some(std::mem::replace(&mut slot.target, target))
    }

    /// Drains every entry, for unmount.
    pub fn clear(&self) -> Vec<(HandleId, T)> {
        let mut slots = self.slots.lock().unwrap();
        let mut drained: Vec<_> = slots.drain().map(|(id, slot)| (id, slot.target)).collect();
        drained.sort_by_key(|(id, _)| *id);
        drained
    }

    pub fn refcount(&self, id: HandleId) -> Option<u32> {
        self.slots.lock().unwrap().get(&id).map(|slot| slot.refs)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
