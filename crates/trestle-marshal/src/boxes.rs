//! Opaque handle boxes.
//!
//! A box carries a live reference from one runtime inside a value native to
//! the other, without conversion. On the host side a boxed guest reference
//! is an object of class [`GUEST_BOX_CLASS`] whose single property holds the
//! reference's raw 64-bit handle; on the guest side a boxed host value is an
//! object of class [`HOST_BOX_CLASS`] carrying a pin-table handle the same
//! way. `is_*_box` checks go by class identity, so no other object can be
//! mistaken for a box.
//!
//! Boxing retains (guest refcount, host pin); destroying a box must release
//! exactly once through `release_*_box`. Unboxing borrows: the embedded
//! reference stays owned by the box, and a caller that wants to keep it must
//! upgrade the borrow explicitly.
//!
//! Ownership is tracked per box, not per heap slot. A host-side box carries
//! a box id issued by the session's [`GuestBoxTable`], which maps the id to
//! the guest reference the box owns; release removes the entry, so a second
//! release of the same box is detected even while other owners (a module
//! registry entry, another box) keep the underlying slot alive. Guest-side
//! boxes get the same property from the pin table directly, because every
//! one pins its own copy under a fresh pin handle.
//!
//! A box whose internal shape is wrong — missing property, wrong embedded
//! type, or an id with no live table entry — was corrupted or already
//! released. That is [`MarshalError::MalformedBox`], fatal to the
//! surrounding operation.

use rustc_hash::FxHashMap;
use trestle_guest::{GuestObject, GuestRef, GuestRuntime, GuestValue};
use trestle_host::{HostObject, HostRef, HostValue, PinTable};

use crate::ownership::{BorrowedGuest, BorrowedPin, OwnedGuest, OwnedPin};
use crate::{MarshalError, MarshalResult};

/// Host class name identifying a boxed guest reference.
pub const GUEST_BOX_CLASS: &str = "GuestRef";

/// Guest class name identifying a boxed host value.
pub const HOST_BOX_CLASS: &str = "HostArray";

/// Property/attribute name holding the raw 64-bit handle.
pub const HANDLE_FIELD: &str = "handle";

/// Registry of the guest references owned by live host-side boxes.
///
/// One table per session. Box ids are never reused, so a released box stays
/// detectable for the life of the session no matter who else holds its
/// slot.
#[derive(Debug)]
pub struct GuestBoxTable {
    entries: FxHashMap<u64, GuestRef>,
    next_id: u64,
}

impl Default for GuestBoxTable {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestBoxTable {
    pub fn new() -> Self {
        GuestBoxTable {
            entries: FxHashMap::default(),
            next_id: 1,
        }
    }

    fn insert(&mut self, handle: GuestRef) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, handle);
        id
    }

    fn get(&self, id: u64) -> Option<GuestRef> {
        self.entries.get(&id).copied()
    }

    fn remove(&mut self, id: u64) -> Option<GuestRef> {
        self.entries.remove(&id)
    }

    /// Number of live boxes; used by leak assertions in tests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// -- guest references boxed into host values --------------------------------

/// Box a guest reference into a host value, retaining it.
///
/// The box owns the new count; the caller's own hold on `handle` is
/// untouched. Round-trips through [`unbox_guest`] to the identical
/// reference.
pub fn box_guest(
    rt: &mut GuestRuntime,
    boxes: &mut GuestBoxTable,
    handle: GuestRef,
) -> MarshalResult<HostValue> {
    let owned = OwnedGuest::retain(rt, handle)?;
    Ok(box_guest_owned(boxes, owned))
}

/// Box an already-owned guest reference, transferring the count into the
/// box without retaining again.
pub fn box_guest_owned(boxes: &mut GuestBoxTable, owned: OwnedGuest) -> HostValue {
    let id = boxes.insert(owned.into_handle());
    let mut object = HostObject::new(GUEST_BOX_CLASS);
    object.set(HANDLE_FIELD, HostValue::Int64(id as i64));
    HostValue::Object(object)
}

/// Whether a host value is a boxed guest reference, by class identity.
pub fn is_guest_box(value: &HostValue) -> bool {
    matches!(value, HostValue::Object(obj) if obj.class_name == GUEST_BOX_CLASS)
}

/// Pull the box id out of a host-side box, checking its shape.
fn guest_box_id(value: &HostValue) -> MarshalResult<u64> {
    let object = match value {
        HostValue::Object(obj) if obj.class_name == GUEST_BOX_CLASS => obj,
        other => {
            return Err(MarshalError::TypeMismatch {
                expected: "guest reference box",
                actual: other.class_name().to_string(),
            })
        }
    };
    match object.get(HANDLE_FIELD) {
        Some(HostValue::Int64(raw)) => Ok(*raw as u64),
        Some(other) => Err(MarshalError::MalformedBox {
            reason: format!(
                "'{}' property holds a {} instead of a 64-bit handle",
                HANDLE_FIELD,
                other.class_name()
            ),
        }),
        None => Err(MarshalError::MalformedBox {
            reason: format!("'{}' property is missing", HANDLE_FIELD),
        }),
    }
}

/// Unbox a guest reference, borrowing it from the box.
///
/// No new ownership is taken; the borrow cannot outlive the box value. The
/// box id is resolved through the table, so unboxing after the box was
/// released reports `MalformedBox` rather than handing out a reference the
/// box no longer owns.
pub fn unbox_guest<'v>(
    rt: &GuestRuntime,
    boxes: &GuestBoxTable,
    value: &'v HostValue,
) -> MarshalResult<BorrowedGuest<'v>> {
    let id = guest_box_id(value)?;
    let handle = boxes.get(id).ok_or_else(|| MarshalError::MalformedBox {
        reason: format!("guest box {id:#x} was already released"),
    })?;
    // a live table entry owns a count, so a dead slot here means the heap
    // was driven outside the table's bookkeeping
    if !rt.ref_is_live(handle) {
        return Err(MarshalError::MalformedBox {
            reason: format!("guest reference {:#x} is not live", handle.as_raw()),
        });
    }
    Ok(BorrowedGuest::new(handle))
}

/// Release the reference a box owns. Must be called exactly once per box;
/// a second release finds no table entry and reports `MalformedBox`,
/// leaving every other owner of the slot untouched.
pub fn release_guest_box(
    rt: &mut GuestRuntime,
    boxes: &mut GuestBoxTable,
    value: &HostValue,
) -> MarshalResult<()> {
    let id = guest_box_id(value)?;
    let handle = boxes.remove(id).ok_or_else(|| MarshalError::MalformedBox {
        reason: format!("guest box {id:#x} was already released"),
    })?;
    rt.release(handle)?;
    Ok(())
}

// -- host values boxed into guest values -------------------------------------

/// Box a host value into the guest, pinning a copy.
///
/// The pin keeps the copy alive under host storage reclamation until the
/// guest box is destroyed and [`release_host_box`] runs.
pub fn box_host(pins: &mut PinTable, value: &HostValue) -> GuestValue {
    let owned = OwnedPin::pin(pins, value.clone());
    box_host_owned(owned)
}

/// Box an already-owned pin, transferring it into the box.
pub fn box_host_owned(owned: OwnedPin) -> GuestValue {
    let object = GuestObject::new(HOST_BOX_CLASS);
    object.set_attr(
        HANDLE_FIELD,
        GuestValue::Int(owned.into_handle().as_raw() as i64),
    );
    GuestValue::Object(object)
}

/// Whether a guest value is a boxed host value, by class identity.
pub fn is_host_box(value: &GuestValue) -> bool {
    matches!(value, GuestValue::Object(obj) if obj.class_name() == HOST_BOX_CLASS)
}

/// Unbox a host pin handle, borrowing it from the box.
pub fn unbox_host<'v>(
    pins: &PinTable,
    value: &'v GuestValue,
) -> MarshalResult<BorrowedPin<'v>> {
    let object = match value {
        GuestValue::Object(obj) if obj.class_name() == HOST_BOX_CLASS => obj,
        other => {
            return Err(MarshalError::TypeMismatch {
                expected: "host value box",
                actual: other.type_name().to_string(),
            })
        }
    };
    let raw = match object.get_attr(HANDLE_FIELD) {
        Some(GuestValue::Int(raw)) => raw as u64,
        Some(other) => {
            return Err(MarshalError::MalformedBox {
                reason: format!(
                    "'{}' attribute holds a {} instead of a 64-bit handle",
                    HANDLE_FIELD,
                    other.type_name()
                ),
            })
        }
        None => {
            return Err(MarshalError::MalformedBox {
                reason: format!("'{}' attribute is missing", HANDLE_FIELD),
            })
        }
    };
    let handle = HostRef::from_raw(raw);
    if !pins.is_live(handle) {
        return Err(MarshalError::MalformedBox {
            reason: format!("host pin {raw:#x} is not live"),
        });
    }
    Ok(BorrowedPin::new(handle))
}

/// Release the pin a guest-side box owns, recovering the pinned value.
pub fn release_host_box(pins: &mut PinTable, value: &GuestValue) -> MarshalResult<HostValue> {
    let handle = unbox_host(pins, value)?.handle();
    Ok(pins.release(handle)?)
}
