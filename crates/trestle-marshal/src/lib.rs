//! Bidirectional value marshaller between the host and guest runtimes.
//!
//! The marshaller is the core of the bridge: it converts host values to
//! guest values and back, boxing a value as an opaque handle whenever no
//! faithful conversion exists. Conversions always produce an independently
//! owned value in the target system; ownership of boxed references is
//! tracked with the [`OwnedGuest`]/[`BorrowedGuest`] wrapper types, so a
//! borrowed handle cannot be stored without an explicit retain.
//!
//! Layers, leaf to root: lossless leaf conversions (numbers, booleans,
//! text), the opaque handle boxes carried across the boundary, and the
//! [`Marshaller`] with its recursive container conversion and
//! singleton-dimension flatten policy.

mod boxes;
mod container;
mod error;
mod ownership;
mod scalar;

pub use boxes::{
    box_guest, box_guest_owned, box_host, box_host_owned, is_guest_box, is_host_box,
    release_guest_box, release_host_box, unbox_guest, unbox_host, GuestBoxTable,
    GUEST_BOX_CLASS, HANDLE_FIELD, HOST_BOX_CLASS,
};
pub use container::Marshaller;
pub use error::{MarshalError, MarshalResult};
pub use ownership::{BorrowedGuest, BorrowedPin, OwnedGuest, OwnedPin};
pub use scalar::{guest_scalar_to_host, host_scalar_to_guest, narrow_int};
