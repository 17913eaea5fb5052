//! Marshalling errors.

use thiserror::Error;
use trestle_guest::GuestError;
use trestle_host::PinError;

/// Errors raised while converting values across the bridge boundary.
#[derive(Error, Debug)]
pub enum MarshalError {
    /// The value is not the shape the conversion expects.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    /// No mapping exists and boxing is disallowed in this context.
    #[error("cannot convert '{class}' value{}", detail_suffix(.detail))]
    Unsupported { class: String, detail: String },

    /// A map key is not usable as a host record field name.
    #[error("'{name}' is not a valid field name")]
    InvalidFieldName { name: String },

    /// A box's internal invariant was violated externally. Not recoverable
    /// within the current operation.
    #[error("malformed box: {reason}")]
    MalformedBox { reason: String },

    /// The guest runtime raised during conversion.
    #[error(transparent)]
    Guest(#[from] GuestError),

    /// The pin table rejected a host handle.
    #[error(transparent)]
    Pin(#[from] PinError),
}

fn detail_suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {}", detail)
    }
}

/// Result type for marshalling operations.
pub type MarshalResult<T> = std::result::Result<T, MarshalError>;
