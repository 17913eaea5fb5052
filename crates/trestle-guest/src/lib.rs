//! Embedded dynamic object runtime for the Trestle bridge.
//!
//! The "guest" is a small dynamically-typed object runtime embedded in the
//! host process. It owns a refcounted object heap, a single global
//! namespace, a module registry, and a miniature expression evaluator. The
//! bridge dispatcher drives it through [`GuestRuntime`]; values cross the
//! boundary through the marshal crate.
//!
//! The runtime is single-threaded and synchronous: every operation runs to
//! completion, and its global namespace is shared mutable state observed by
//! subsequent operations in issue order.

use smol_str::SmolStr;
use thiserror::Error;

mod eval;
mod heap;
mod runtime;
mod value;

pub use heap::{GuestHeap, GuestRef};
pub use runtime::{ArithOp, CompareOp, GuestRuntime, HostHooks};
pub use value::{GuestCallable, GuestList, GuestMap, GuestObject, GuestValue};

/// Errors raised by the guest runtime itself.
///
/// These carry the runtime's own diagnostic text; the bridge surfaces that
/// text before reporting its own fatal error, preserving root cause.
#[derive(Error, Debug, Clone)]
pub enum GuestError {
    #[error("name '{name}' is not defined")]
    NameNotFound { name: SmolStr },

    #[error("'{class}' object has no attribute '{attribute}'")]
    AttributeNotFound { attribute: SmolStr, class: SmolStr },

    #[error("'{type_name}' object is not callable")]
    NotCallable { type_name: String },

    #[error("{callable}() takes {expected} arguments, got {got}")]
    ArityMismatch {
        callable: SmolStr,
        expected: usize,
        got: usize,
    },

    #[error("type error: {message}")]
    TypeError { message: String },

    #[error("index {index} out of range for length {length}")]
    IndexOutOfRange { index: i64, length: usize },

    #[error("key '{key}' not found")]
    KeyNotFound { key: SmolStr },

    #[error("no module named '{name}'")]
    ModuleNotFound { name: SmolStr },

    #[error("dangling guest reference {raw:#x}")]
    DanglingRef { raw: u64 },

    #[error("syntax error: {message}")]
    SyntaxError { message: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("host error: {message}")]
    HostError { message: String },
}

/// Result type for guest runtime operations.
pub type GuestResult<T> = std::result::Result<T, GuestError>;
