//! Leaf conversions: numbers, booleans, text.
//!
//! These are purely functional and lossless in both directions. They never
//! box; a value with no scalar mapping is the caller's problem
//! ([`MarshalError::TypeMismatch`] or [`MarshalError::Unsupported`]), which
//! lets the container converter decide between substitution and abort.

use smol_str::SmolStr;
use trestle_guest::GuestValue;
use trestle_host::HostValue;

use crate::{MarshalError, MarshalResult};

/// Convert a host leaf value to its canonical guest equivalent.
///
/// Booleans, 32/64-bit integers, doubles, and text all map losslessly. A
/// numeric buffer is accepted only when it holds exactly one element;
/// anything wider fails the expected-shape check. `Nil` maps to the guest's
/// `None`.
pub fn host_scalar_to_guest(value: &HostValue) -> MarshalResult<GuestValue> {
    match value {
        HostValue::Nil => Ok(GuestValue::None),
        HostValue::Bool(b) => Ok(GuestValue::Bool(*b)),
        HostValue::Int32(n) => Ok(GuestValue::Int(i64::from(*n))),
        HostValue::Int64(n) => Ok(GuestValue::Int(*n)),
        HostValue::Double(f) => Ok(GuestValue::Float(*f)),
        HostValue::Text(s) => Ok(GuestValue::Str(s.clone())),
        HostValue::NumArray { data, .. } if data.len() == 1 => {
            Ok(GuestValue::Float(data[0]))
        }
        HostValue::NumArray { dims, .. } => Err(MarshalError::TypeMismatch {
            expected: "numeric scalar",
            actual: format!("{} numeric array", format_dims(dims)),
        }),
        other => Err(MarshalError::TypeMismatch {
            expected: "scalar",
            actual: other.class_name().to_string(),
        }),
    }
}

/// Convert a guest leaf value to its host equivalent.
///
/// Floats become doubles, strings become text, booleans map directly, and
/// integers take the narrowest host integer type that holds the value (see
/// [`narrow_int`]). The guest's `None` becomes `Nil`.
pub fn guest_scalar_to_host(value: &GuestValue) -> MarshalResult<HostValue> {
    match value {
        GuestValue::None => Ok(HostValue::Nil),
        GuestValue::Bool(b) => Ok(HostValue::Bool(*b)),
        GuestValue::Int(n) => Ok(narrow_int(*n)),
        GuestValue::Float(f) => Ok(HostValue::Double(*f)),
        GuestValue::Str(s) => Ok(HostValue::Text(SmolStr::clone(s))),
        other => Err(MarshalError::TypeMismatch {
            expected: "scalar",
            actual: other.type_name().to_string(),
        }),
    }
}

/// Pick the narrowest host integer type that holds `value` without loss:
/// 32-bit first, widening to 64-bit.
pub fn narrow_int(value: i64) -> HostValue {
    match i32::try_from(value) {
        Ok(narrow) => HostValue::Int32(narrow),
        Err(_) => HostValue::Int64(value),
    }
}

fn format_dims(dims: &[usize]) -> String {
    let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
    parts.join("x")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_host_scalars_to_guest() {
        assert_eq!(
            host_scalar_to_guest(&HostValue::Bool(true)).unwrap(),
            GuestValue::Bool(true)
        );
        assert_eq!(
            host_scalar_to_guest(&HostValue::Int32(-7)).unwrap(),
            GuestValue::Int(-7)
        );
        assert_eq!(
            host_scalar_to_guest(&HostValue::Int64(i64::MAX)).unwrap(),
            GuestValue::Int(i64::MAX)
        );
        assert_eq!(
            host_scalar_to_guest(&HostValue::Double(3.5)).unwrap(),
            GuestValue::Float(3.5)
        );
        assert_eq!(
            host_scalar_to_guest(&HostValue::Text("hi".into())).unwrap(),
            GuestValue::Str("hi".into())
        );
        assert_eq!(
            host_scalar_to_guest(&HostValue::Nil).unwrap(),
            GuestValue::None
        );
    }

    #[test]
    fn test_single_element_buffer_is_scalar() {
        let one = HostValue::NumArray {
            dims: vec![1, 1],
            data: vec![2.25],
        };
        assert_eq!(host_scalar_to_guest(&one).unwrap(), GuestValue::Float(2.25));
    }

    #[test]
    fn test_wide_buffer_fails_shape_check() {
        let wide = HostValue::NumArray {
            dims: vec![1, 3],
            data: vec![1.0, 2.0, 3.0],
        };
        assert!(matches!(
            host_scalar_to_guest(&wide),
            Err(MarshalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_guest_scalars_to_host() {
        assert_eq!(
            guest_scalar_to_host(&GuestValue::Bool(false)).unwrap(),
            HostValue::Bool(false)
        );
        assert_eq!(
            guest_scalar_to_host(&GuestValue::Float(3.5)).unwrap(),
            HostValue::Double(3.5)
        );
        assert_eq!(
            guest_scalar_to_host(&GuestValue::Str("x".into())).unwrap(),
            HostValue::Text("x".into())
        );
        assert_eq!(
            guest_scalar_to_host(&GuestValue::None).unwrap(),
            HostValue::Nil
        );
    }

    #[test]
    fn test_tiered_integer_narrowing() {
        assert_eq!(narrow_int(0), HostValue::Int32(0));
        assert_eq!(narrow_int(-1), HostValue::Int32(-1));
        assert_eq!(narrow_int(i64::from(i32::MAX)), HostValue::Int32(i32::MAX));
        assert_eq!(narrow_int(i64::from(i32::MIN)), HostValue::Int32(i32::MIN));
        assert_eq!(
            narrow_int(i64::from(i32::MAX) + 1),
            HostValue::Int64(i64::from(i32::MAX) + 1)
        );
        assert_eq!(narrow_int(i64::MIN), HostValue::Int64(i64::MIN));
    }

    #[test]
    fn test_round_trip_leaves() {
        // host -> guest -> host
        for value in [
            HostValue::Bool(true),
            HostValue::Int32(0),
            HostValue::Int32(-42),
            HostValue::Int64(i64::MAX),
            HostValue::Double(-0.25),
            HostValue::Text("round".into()),
            HostValue::Nil,
        ] {
            let guest = host_scalar_to_guest(&value).unwrap();
            assert_eq!(guest_scalar_to_host(&guest).unwrap(), value);
        }

        // guest -> host -> guest
        for value in [
            GuestValue::Bool(false),
            GuestValue::Int(0),
            GuestValue::Int(i64::MIN),
            GuestValue::Float(3.5),
            GuestValue::Str("trip".into()),
            GuestValue::None,
        ] {
            let host = guest_scalar_to_host(&value).unwrap();
            assert_eq!(host_scalar_to_guest(&host).unwrap(), value);
        }
    }

    #[test]
    fn test_non_scalars_are_rejected() {
        assert!(guest_scalar_to_host(&GuestValue::List(Default::default())).is_err());
        assert!(host_scalar_to_guest(&HostValue::Struct(Default::default())).is_err());
    }
}
