//! Bridge dispatcher between the host environment and the embedded guest
//! runtime.
//!
//! A host-side call enters [`Session::dispatch`] with an operation code from
//! the fixed vocabulary ([`Opcode`]) and host-native operand values. The
//! dispatcher marshals the operands into guest values (unboxing handle
//! boxes that already carry guest references), performs the requested
//! guest-native operation, and marshals the result back, boxing it when no
//! native host representation exists. Zero or one host value comes back;
//! any failure aborts the operation with a [`BridgeError`].
//!
//! Everything is synchronous and single-threaded: operations run to
//! completion in issue order against the session's one guest namespace.

mod error;
mod opcode;
mod session;

pub use error::{BridgeError, BridgeResult};
pub use opcode::Opcode;
pub use session::Session;
