//! Host-side value model for the Trestle bridge.
//!
//! The "host" is a numeric/array-oriented computing environment that drives
//! the embedded guest runtime through the bridge dispatcher. This crate
//! models the host values that cross the bridge boundary: scalars, text,
//! rectangular cell arrays, records, numeric buffers, and class instances
//! (including the opaque box carrying a guest reference).
//!
//! It also provides the [`PinTable`], which keeps host values alive while a
//! guest-side box points at them: a pinned value is exempt from the host's
//! automatic storage reclamation until it is explicitly released.

mod pin;
mod value;

pub use pin::{HostRef, PinError, PinTable};
pub use value::{CellArray, HostObject, HostStruct, HostValue, is_valid_field_name};
