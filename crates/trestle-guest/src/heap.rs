//! Refcounted object heap.
//!
//! Values referenced from the host side live in heap slots identified by an
//! opaque 64-bit [`GuestRef`]. Each slot carries an ownership count: boxing
//! retains, destroying a box releases, and the slot is freed when the count
//! reaches zero. A freed slot's id is never reused, so a stale handle is
//! always detectable.

use rustc_hash::FxHashMap;

use crate::{GuestError, GuestResult, GuestValue};

/// Opaque handle to a heap slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuestRef(u64);

impl GuestRef {
    /// Reconstruct a handle from its raw 64-bit representation.
    pub fn from_raw(raw: u64) -> Self {
        GuestRef(raw)
    }

    /// The raw 64-bit representation carried inside a host box.
    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct Slot {
    value: GuestValue,
    refs: usize,
}

/// The guest's refcounted slot table.
#[derive(Debug, Default)]
pub struct GuestHeap {
    slots: FxHashMap<u64, Slot>,
    next_id: u64,
}

impl GuestHeap {
    pub fn new() -> Self {
        GuestHeap {
            slots: FxHashMap::default(),
            next_id: 1,
        }
    }

    /// Allocate a slot holding `value` with an ownership count of one.
    pub fn alloc(&mut self, value: GuestValue) -> GuestRef {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.insert(id, Slot { value, refs: 1 });
        GuestRef(id)
    }

    /// Increment the ownership count.
    pub fn retain(&mut self, handle: GuestRef) -> GuestResult<()> {
        let slot = self
            .slots
            .get_mut(&handle.0)
            .ok_or(GuestError::DanglingRef { raw: handle.0 })?;
        slot.refs += 1;
        Ok(())
    }

    /// Decrement the ownership count, freeing the slot at zero.
    pub fn release(&mut self, handle: GuestRef) -> GuestResult<()> {
        let slot = self
            .slots
            .get_mut(&handle.0)
            .ok_or(GuestError::DanglingRef { raw: handle.0 })?;
        slot.refs -= 1;
        if slot.refs == 0 {
            self.slots.remove(&handle.0);
        }
        Ok(())
    }

    /// Borrow the value in a slot.
    pub fn get(&self, handle: GuestRef) -> GuestResult<&GuestValue> {
        self.slots
            .get(&handle.0)
            .map(|slot| &slot.value)
            .ok_or(GuestError::DanglingRef { raw: handle.0 })
    }

    /// Current ownership count, if the slot is live.
    pub fn ref_count(&self, handle: GuestRef) -> Option<usize> {
        self.slots.get(&handle.0).map(|slot| slot.refs)
    }

    pub fn is_live(&self, handle: GuestRef) -> bool {
        self.slots.contains_key(&handle.0)
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
