//! Ownership-tagged handle wrappers.
//!
//! Manual retain/release across a foreign boundary is where bridges leak.
//! Instead of bare handles and convention, the marshaller moves references
//! around in wrappers that encode ownership in the type system:
//!
//! - [`OwnedGuest`] / [`OwnedPin`] hold exactly one ownership count and must
//!   be released explicitly, exactly once; `release` consumes the wrapper,
//!   so a double release does not compile.
//! - [`BorrowedGuest`] / [`BorrowedPin`] take no ownership and cannot
//!   outlive the box they were unboxed from; storing one past its call
//!   scope requires an explicit `to_owned` upgrade, which retains.

use std::marker::PhantomData;

use trestle_guest::{GuestRef, GuestRuntime};
use trestle_host::{HostRef, HostValue, PinTable};

use crate::MarshalResult;

/// A guest reference holding exactly one ownership count.
///
/// Created by retaining a live reference ([`OwnedGuest::retain`]) or by
/// adopting a count the caller already holds ([`OwnedGuest::adopt`], e.g.
/// the reference a module import returns). The count must be given back
/// exactly once, either by [`release`](OwnedGuest::release) or by moving it
/// into a box.
#[derive(Debug)]
#[must_use = "an OwnedGuest holds a reference count that must be released"]
pub struct OwnedGuest {
    handle: GuestRef,
}

impl OwnedGuest {
    /// Take ownership of a count the caller already holds.
    pub fn adopt(handle: GuestRef) -> Self {
        OwnedGuest { handle }
    }

    /// Retain a live reference and own the new count.
    pub fn retain(rt: &mut GuestRuntime, handle: GuestRef) -> MarshalResult<Self> {
        rt.retain(handle)?;
        Ok(OwnedGuest { handle })
    }

    pub fn handle(&self) -> GuestRef {
        self.handle
    }

    /// Give the count back to the heap.
    pub fn release(self, rt: &mut GuestRuntime) -> MarshalResult<()> {
        rt.release(self.handle)?;
        Ok(())
    }

    /// Transfer the count out of the wrapper. The caller becomes
    /// responsible for the eventual release.
    pub fn into_handle(self) -> GuestRef {
        self.handle
    }
}

/// A guest reference borrowed from a box, valid only while the box is.
///
/// Holds no ownership count. Pass it through into a call freely; to keep it
/// longer, upgrade with [`to_owned`](BorrowedGuest::to_owned).
#[derive(Debug, Clone, Copy)]
pub struct BorrowedGuest<'a> {
    handle: GuestRef,
    _source: PhantomData<&'a ()>,
}

impl<'a> BorrowedGuest<'a> {
    pub(crate) fn new(handle: GuestRef) -> Self {
        BorrowedGuest {
            handle,
            _source: PhantomData,
        }
    }

    pub fn handle(&self) -> GuestRef {
        self.handle
    }

    /// Retain the reference, producing a count the caller owns.
    pub fn to_owned(&self, rt: &mut GuestRuntime) -> MarshalResult<OwnedGuest> {
        OwnedGuest::retain(rt, self.handle)
    }
}

/// A pinned host value owned by the wrapper.
///
/// The pin must be released exactly once; `release` consumes the wrapper
/// and hands the pinned value back.
#[derive(Debug)]
#[must_use = "an OwnedPin keeps a host value pinned until released"]
pub struct OwnedPin {
    handle: HostRef,
}

impl OwnedPin {
    /// Pin a copy of `value`, owning the resulting pin.
    pub fn pin(pins: &mut PinTable, value: HostValue) -> Self {
        OwnedPin {
            handle: pins.pin(value),
        }
    }

    /// Take ownership of a pin the caller already holds.
    pub fn adopt(handle: HostRef) -> Self {
        OwnedPin { handle }
    }

    pub fn handle(&self) -> HostRef {
        self.handle
    }

    /// Release the pin, recovering the pinned value.
    pub fn release(self, pins: &mut PinTable) -> MarshalResult<HostValue> {
        Ok(pins.release(self.handle)?)
    }

    /// Transfer the pin out of the wrapper.
    pub fn into_handle(self) -> HostRef {
        self.handle
    }
}

/// A pin handle borrowed from a guest-side box.
#[derive(Debug, Clone, Copy)]
pub struct BorrowedPin<'a> {
    handle: HostRef,
    _source: PhantomData<&'a ()>,
}

impl<'a> BorrowedPin<'a> {
    pub(crate) fn new(handle: HostRef) -> Self {
        BorrowedPin {
            handle,
            _source: PhantomData,
        }
    }

    pub fn handle(&self) -> HostRef {
        self.handle
    }

    /// Borrow the pinned value.
    pub fn value<'p>(&self, pins: &'p PinTable) -> MarshalResult<&'p HostValue> {
        Ok(pins.get(self.handle)?)
    }
}
