//! Pinned host values.
//!
//! When a host value is boxed into the guest runtime, the guest ends up
//! holding a reference into host memory. The host reclaims temporaries
//! automatically, so the bridge pins a duplicate of the value here instead;
//! the pinned copy stays valid until the guest box is destroyed and the pin
//! is explicitly released.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::HostValue;

/// Errors from pin-table operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PinError {
    /// The handle does not name a live pinned value (never pinned, or
    /// already released).
    #[error("no pinned host value for handle {0:#x}")]
    Dangling(u64),
}

/// Opaque handle to a pinned host value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostRef(u64);

impl HostRef {
    /// Reconstruct a handle from its raw 64-bit representation.
    pub fn from_raw(raw: u64) -> Self {
        HostRef(raw)
    }

    /// The raw 64-bit representation carried inside a guest box.
    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

/// Table of pinned host values, keyed by opaque handle.
///
/// Pins are single-owner: each `pin` is balanced by exactly one `release`.
/// Releasing twice, or using a handle after release, reports
/// [`PinError::Dangling`].
#[derive(Debug, Default)]
pub struct PinTable {
    slots: FxHashMap<u64, HostValue>,
    next_id: u64,
}

impl PinTable {
    pub fn new() -> Self {
        PinTable {
            slots: FxHashMap::default(),
            next_id: 1,
        }
    }

    /// Pin a value, exempting it from host storage reclamation.
    ///
    /// The table owns an independent copy; the caller's value is unaffected.
    pub fn pin(&mut self, value: HostValue) -> HostRef {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.insert(id, value);
        HostRef(id)
    }

    /// Look up a pinned value without releasing it.
    pub fn get(&self, handle: HostRef) -> Result<&HostValue, PinError> {
        self.slots.get(&handle.0).ok_or(PinError::Dangling(handle.0))
    }

    /// Whether the handle names a live pinned value.
    pub fn is_live(&self, handle: HostRef) -> bool {
        self.slots.contains_key(&handle.0)
    }

    /// Release a pin, returning the value to the caller.
    pub fn release(&mut self, handle: HostRef) -> Result<HostValue, PinError> {
        self.slots
            .remove(&handle.0)
            .ok_or(PinError::Dangling(handle.0))
    }

    /// Number of live pins.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pin_and_get() {
        let mut pins = PinTable::new();
        let h = pins.pin(HostValue::Double(2.5));
        assert_eq!(pins.get(h), Ok(&HostValue::Double(2.5)));
        assert!(pins.is_live(h));
    }

    #[test]
    fn test_release_exactly_once() {
        let mut pins = PinTable::new();
        let h = pins.pin(HostValue::Text("keep".into()));

        assert_eq!(pins.release(h), Ok(HostValue::Text("keep".into())));
        assert_eq!(pins.release(h), Err(PinError::Dangling(h.as_raw())));
        assert!(pins.get(h).is_err());
    }

    #[test]
    fn test_handles_are_distinct() {
        let mut pins = PinTable::new();
        let a = pins.pin(HostValue::Int32(1));
        let b = pins.pin(HostValue::Int32(1));
        assert_ne!(a, b);
        assert_eq!(pins.len(), 2);
    }

    #[test]
    fn test_raw_round_trip() {
        let mut pins = PinTable::new();
        let h = pins.pin(HostValue::Nil);
        let again = HostRef::from_raw(h.as_raw());
        assert_eq!(h, again);
        assert!(pins.is_live(again));
    }
}
