//! Bridge-level errors.
//!
//! Every failure aborts the current operation and surfaces one descriptive
//! message; there is no structured error code beyond pass/fail. Errors from
//! the marshaller and the guest runtime are folded into this taxonomy at
//! the dispatch boundary.

use smol_str::SmolStr;
use thiserror::Error;
use trestle_guest::GuestError;
use trestle_marshal::MarshalError;

/// A fatal error for the current bridge operation.
///
/// The session's global state remains valid afterwards; the caller may keep
/// issuing operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Wrong number of operands for an opcode.
    #[error("{op} expects {expected}, got {got} operand(s)")]
    ArgumentCount {
        op: &'static str,
        expected: &'static str,
        got: usize,
    },

    /// An operand is not the shape the opcode expects.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    /// No mapping exists and boxing was disallowed for the context.
    #[error("unsupported conversion: {message}")]
    ConversionUnsupported { message: String },

    /// No global binding under this name.
    #[error("no global named '{name}'")]
    NotFound { name: SmolStr },

    /// The target has no such attribute.
    #[error("'{class}' object has no attribute '{attribute}'")]
    NoSuchAttribute { attribute: SmolStr, class: String },

    /// The callee is not callable.
    #[error("'{type_name}' object is not callable")]
    NotCallable { type_name: String },

    /// The guest runtime raised; `diagnostic` is its own message, printed
    /// to the host output channel before this error surfaces.
    #[error("guest runtime error: {diagnostic}")]
    GuestRuntime { diagnostic: String },

    /// A box's internal invariant was violated externally. Terminates the
    /// operation immediately.
    #[error("malformed box: {reason}")]
    MalformedBox { reason: String },

    /// The operation code is outside the bridge vocabulary.
    #[error("invalid function label {code} received")]
    UnknownOpcode { code: u8 },
}

impl From<MarshalError> for BridgeError {
    fn from(err: MarshalError) -> Self {
        match err {
            MarshalError::TypeMismatch { expected, actual } => {
                BridgeError::TypeMismatch { expected, actual }
            }
            MarshalError::Unsupported { .. } | MarshalError::InvalidFieldName { .. } => {
                BridgeError::ConversionUnsupported {
                    message: err.to_string(),
                }
            }
            MarshalError::MalformedBox { reason } => BridgeError::MalformedBox { reason },
            MarshalError::Guest(guest) => BridgeError::from(guest),
            MarshalError::Pin(pin) => BridgeError::MalformedBox {
                reason: pin.to_string(),
            },
        }
    }
}

impl From<GuestError> for BridgeError {
    fn from(err: GuestError) -> Self {
        match err {
            GuestError::AttributeNotFound { attribute, class } => {
                BridgeError::NoSuchAttribute {
                    attribute,
                    class: class.to_string(),
                }
            }
            GuestError::NotCallable { type_name } => BridgeError::NotCallable { type_name },
            other => BridgeError::GuestRuntime {
                diagnostic: other.to_string(),
            },
        }
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
