//! Recursive container conversion.
//!
//! [`Marshaller`] carries the conversion policy and the warning sink shared
//! by a whole bridge session. Host cell arrays become guest lists (one per
//! outer dimension, row-major), host records become guest maps, and the
//! reverse direction rebuilds 1×N cells and records. Boxes short-circuit:
//! converting a boxed guest reference yields the referenced guest value
//! itself, and a boxed host value unboxes back to a copy of the pinned
//! original.
//!
//! ## Flatten policy
//!
//! With `flatten` enabled, every dimension of extent exactly one collapses
//! into its single child instead of wrapping a length-1 list around it. The
//! outermost level of the whole conversion is exempt: the caller always
//! receives a list, so a cell whose every dimension is singleton converts
//! to a one-element list rather than a bare scalar. A 1×1×3 cell therefore
//! converts to the same three-element list as a bare 3-element cell.
//!
//! ## Failure and ownership
//!
//! An element that fails to convert on the way into the guest is replaced
//! with `None` and a warning is recorded; the container conversion itself
//! continues. Failures on the way back to the host (a dead box handle, a
//! map key that is no valid field name) abort the conversion; any guest
//! references retained for already-converted siblings are released on the
//! abort path, so nothing leaks.

use smol_str::SmolStr;
use trestle_guest::{GuestList, GuestMap, GuestRuntime, GuestValue};
use trestle_host::{is_valid_field_name, CellArray, HostStruct, HostValue, PinTable};

use crate::boxes::{self, GuestBoxTable};
use crate::ownership::OwnedGuest;
use crate::scalar::{guest_scalar_to_host, host_scalar_to_guest};
use crate::{MarshalError, MarshalResult};

/// Bidirectional value converter with the session-scoped warning sink and
/// guest box registry.
#[derive(Debug, Default)]
pub struct Marshaller {
    warnings: Vec<String>,
    boxes: GuestBoxTable,
}

impl Marshaller {
    pub fn new() -> Self {
        Marshaller::default()
    }

    /// Warnings recorded by non-fatal element substitutions since the last
    /// drain.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Take the recorded warnings, leaving the sink empty.
    pub fn drain_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    /// The registry of guest references owned by live host-side boxes.
    pub fn guest_boxes(&self) -> &GuestBoxTable {
        &self.boxes
    }

    pub fn guest_boxes_mut(&mut self) -> &mut GuestBoxTable {
        &mut self.boxes
    }

    /// Box an already-owned guest reference under this session's registry.
    pub fn box_guest_owned(&mut self, owned: OwnedGuest) -> HostValue {
        boxes::box_guest_owned(&mut self.boxes, owned)
    }

    /// Release the reference a host-side box owns, exactly once per box.
    pub fn release_guest_box(
        &mut self,
        rt: &mut GuestRuntime,
        value: &HostValue,
    ) -> MarshalResult<()> {
        boxes::release_guest_box(rt, &mut self.boxes, value)
    }

    // -- host to guest -------------------------------------------------------

    /// Convert a host value into an independently owned guest value.
    ///
    /// Boxed guest references short-circuit to the value they refer to.
    /// Values with no guest mapping (numeric buffers wider than one element,
    /// plain host class instances) fail with
    /// [`MarshalError::Unsupported`]; use [`host_to_guest_boxing`] where
    /// boxing is an acceptable fallback.
    pub fn host_to_guest(
        &mut self,
        rt: &mut GuestRuntime,
        pins: &mut PinTable,
        value: &HostValue,
        flatten: bool,
    ) -> MarshalResult<GuestValue> {
        if boxes::is_guest_box(value) {
            let handle = boxes::unbox_guest(rt, &self.boxes, value)?.handle();
            return Ok(rt.value_of(handle)?.clone());
        }

        match value {
            HostValue::Cell(cell) => self.cell_to_guest(rt, pins, cell, flatten),
            HostValue::Struct(record) => self.struct_to_guest(rt, pins, record),
            HostValue::NumArray { dims, data } if data.len() != 1 => {
                Err(MarshalError::Unsupported {
                    class: "double".to_string(),
                    detail: format!(
                        "{} numeric array; only scalars convert, box it instead",
                        format_dims(dims)
                    ),
                })
            }
            HostValue::Object(obj) => Err(MarshalError::Unsupported {
                class: obj.class_name.to_string(),
                detail: String::new(),
            }),
            leaf => host_scalar_to_guest(leaf),
        }
    }

    /// Convert a host value, boxing it when no faithful conversion exists.
    ///
    /// This is the dispatcher's operand policy: convertible values convert,
    /// everything else crosses the boundary as a pinned host box.
    pub fn host_to_guest_boxing(
        &mut self,
        rt: &mut GuestRuntime,
        pins: &mut PinTable,
        value: &HostValue,
        flatten: bool,
    ) -> MarshalResult<GuestValue> {
        match self.host_to_guest(rt, pins, value, flatten) {
            Err(MarshalError::Unsupported { .. }) => Ok(boxes::box_host(pins, value)),
            other => other,
        }
    }

    /// Cell arrays become nested lists, one per outer dimension.
    fn cell_to_guest(
        &mut self,
        rt: &mut GuestRuntime,
        pins: &mut PinTable,
        cell: &CellArray,
        flatten: bool,
    ) -> MarshalResult<GuestValue> {
        let converted = self.cell_dims_to_guest(rt, pins, cell.dims(), cell.elems(), flatten)?;
        // top-level exemption: the caller always receives a list, even when
        // every dimension collapsed away
        if flatten && !matches!(converted, GuestValue::List(_)) {
            return Ok(GuestValue::List(GuestList::from_vec(vec![converted])));
        }
        Ok(converted)
    }

    fn cell_dims_to_guest(
        &mut self,
        rt: &mut GuestRuntime,
        pins: &mut PinTable,
        dims: &[usize],
        elems: &[HostValue],
        flatten: bool,
    ) -> MarshalResult<GuestValue> {
        match dims {
            [] => Ok(self.element_to_guest(rt, pins, &elems[0])),
            [extent, rest @ ..] => {
                if flatten && *extent == 1 {
                    return self.cell_dims_to_guest(rt, pins, rest, elems, flatten);
                }
                let stride: usize = rest.iter().product();
                let mut items = Vec::with_capacity(*extent);
                for chunk in 0..*extent {
                    let slice = &elems[chunk * stride..(chunk + 1) * stride];
                    items.push(self.cell_dims_to_guest(rt, pins, rest, slice, flatten)?);
                }
                Ok(GuestValue::List(GuestList::from_vec(items)))
            }
        }
    }

    /// Records become maps keyed by field name; fields convert without
    /// flattening.
    fn struct_to_guest(
        &mut self,
        rt: &mut GuestRuntime,
        pins: &mut PinTable,
        record: &HostStruct,
    ) -> MarshalResult<GuestValue> {
        let map = GuestMap::new();
        for (name, field) in record.fields() {
            map.set(name.clone(), self.element_to_guest(rt, pins, field));
        }
        Ok(GuestValue::Map(map))
    }

    /// Convert one container element, substituting `None` and recording a
    /// warning when the element has no guest mapping.
    fn element_to_guest(
        &mut self,
        rt: &mut GuestRuntime,
        pins: &mut PinTable,
        element: &HostValue,
    ) -> GuestValue {
        match self.host_to_guest(rt, pins, element, false) {
            Ok(converted) => converted,
            Err(err) => {
                self.warnings
                    .push(format!("unsupported value in container, substituting None: {err}"));
                GuestValue::None
            }
        }
    }

    // -- guest to host -------------------------------------------------------

    /// Convert a guest value into an independently owned host value.
    ///
    /// Boxed host values short-circuit to a copy of the pinned original.
    /// Lists become 1×N cells, maps become records in iteration order, and
    /// values with no host mapping (callables, opaque objects) are boxed as
    /// guest references automatically.
    pub fn guest_to_host(
        &mut self,
        rt: &mut GuestRuntime,
        pins: &mut PinTable,
        value: &GuestValue,
    ) -> MarshalResult<HostValue> {
        if boxes::is_host_box(value) {
            let pin = boxes::unbox_host(pins, value)?;
            return Ok(pin.value(pins)?.clone());
        }

        match value {
            GuestValue::List(list) => self.list_to_host(rt, pins, list.to_vec()),
            GuestValue::Map(map) => self.map_to_host(rt, pins, map),
            GuestValue::Callable(_) | GuestValue::Object(_) => {
                let handle = rt.alloc(value.clone());
                Ok(boxes::box_guest_owned(&mut self.boxes, OwnedGuest::adopt(handle)))
            }
            leaf => guest_scalar_to_host(leaf),
        }
    }

    /// Lists become 1×N cells; heterogeneous element types are preserved
    /// because every slot holds an independently typed host value.
    fn list_to_host(
        &mut self,
        rt: &mut GuestRuntime,
        pins: &mut PinTable,
        items: Vec<GuestValue>,
    ) -> MarshalResult<HostValue> {
        let mut elems: Vec<HostValue> = Vec::with_capacity(items.len());
        for item in &items {
            match self.guest_to_host(rt, pins, item) {
                Ok(converted) => elems.push(converted),
                Err(err) => {
                    release_embedded_guest_refs(rt, &mut self.boxes, &elems);
                    return Err(err);
                }
            }
        }
        Ok(HostValue::Cell(CellArray::row(elems)))
    }

    /// Maps become records; field order follows the map's iteration order,
    /// and every key must be a valid host identifier.
    fn map_to_host(
        &mut self,
        rt: &mut GuestRuntime,
        pins: &mut PinTable,
        map: &GuestMap,
    ) -> MarshalResult<HostValue> {
        let mut record = HostStruct::new();
        let mut converted_fields: Vec<HostValue> = Vec::new();
        for (key, item) in map.entries() {
            if !is_valid_field_name(&key) {
                release_embedded_guest_refs(rt, &mut self.boxes, &converted_fields);
                return Err(MarshalError::InvalidFieldName {
                    name: key.to_string(),
                });
            }
            match self.guest_to_host(rt, pins, &item) {
                Ok(converted) => {
                    converted_fields.push(converted.clone());
                    record.set(SmolStr::clone(&key), converted);
                }
                Err(err) => {
                    release_embedded_guest_refs(rt, &mut self.boxes, &converted_fields);
                    return Err(err);
                }
            }
        }
        Ok(HostValue::Struct(record))
    }
}

/// Abort-path cleanup: release the guest references owned by any boxes
/// embedded in already-converted sibling values.
fn release_embedded_guest_refs(
    rt: &mut GuestRuntime,
    boxes_table: &mut GuestBoxTable,
    values: &[HostValue],
) {
    for value in values {
        if boxes::is_guest_box(value) {
            // the box was created moments ago; a missing entry here means
            // the cleanup already ran, which is fine to skip
            let _ = boxes::release_guest_box(rt, boxes_table, value);
            continue;
        }
        match value {
            HostValue::Cell(cell) => release_embedded_guest_refs(rt, boxes_table, cell.elems()),
            HostValue::Struct(record) => {
                let fields: Vec<HostValue> =
                    record.fields().map(|(_, v)| v.clone()).collect();
                release_embedded_guest_refs(rt, boxes_table, &fields);
            }
            _ => {}
        }
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
    use trestle_guest::GuestObject;

    fn ints(values: &[i32]) -> Vec<HostValue> {
        values.iter().copied().map(HostValue::Int32).collect()
    }

    fn guest_list(values: &[i64]) -> GuestValue {
        GuestValue::List(GuestList::from_vec(
            values.iter().copied().map(GuestValue::Int).collect(),
        ))
    }

    #[test]
    fn test_row_cell_to_list() {
        let mut m = Marshaller::new();
        let mut rt = GuestRuntime::new();
        let mut pins = PinTable::new();

        let cell = HostValue::Cell(CellArray::new(vec![1, 3], ints(&[1, 2, 3])).unwrap());
        let out = m.host_to_guest(&mut rt, &mut pins, &cell, true).unwrap();
        assert_eq!(out, guest_list(&[1, 2, 3]));
    }

    #[test]
    fn test_flatten_collapses_singleton_dims() {
        let mut m = Marshaller::new();
        let mut rt = GuestRuntime::new();
        let mut pins = PinTable::new();

        // 1x1x3 with flatten converts like a bare 3-element cell
        let deep = HostValue::Cell(CellArray::new(vec![1, 1, 3], ints(&[1, 2, 3])).unwrap());
        let flat = HostValue::Cell(CellArray::new(vec![3], ints(&[1, 2, 3])).unwrap());
        assert_eq!(
            m.host_to_guest(&mut rt, &mut pins, &deep, true).unwrap(),
            m.host_to_guest(&mut rt, &mut pins, &flat, true).unwrap()
        );
    }

    #[test]
    fn test_flatten_top_level_exemption() {
        let mut m = Marshaller::new();
        let mut rt = GuestRuntime::new();
        let mut pins = PinTable::new();

        // every dimension singleton: still a one-element list, never a scalar
        let unit = HostValue::Cell(CellArray::new(vec![1, 1], ints(&[9])).unwrap());
        let out = m.host_to_guest(&mut rt, &mut pins, &unit, true).unwrap();
        assert_eq!(out, guest_list(&[9]));
    }

    #[test]
    fn test_no_flatten_keeps_singleton_dims() {
        let mut m = Marshaller::new();
        let mut rt = GuestRuntime::new();
        let mut pins = PinTable::new();

        let cell = HostValue::Cell(CellArray::new(vec![1, 2], ints(&[1, 2])).unwrap());
        let out = m.host_to_guest(&mut rt, &mut pins, &cell, false).unwrap();
        assert_eq!(
            out,
            GuestValue::List(GuestList::from_vec(vec![guest_list(&[1, 2])]))
        );
    }

    #[test]
    fn test_row_major_order_preserved() {
        let mut m = Marshaller::new();
        let mut rt = GuestRuntime::new();
        let mut pins = PinTable::new();

        let cell =
            HostValue::Cell(CellArray::new(vec![2, 3], ints(&[0, 1, 2, 3, 4, 5])).unwrap());
        let out = m.host_to_guest(&mut rt, &mut pins, &cell, false).unwrap();
        assert_eq!(
            out,
            GuestValue::List(GuestList::from_vec(vec![
                guest_list(&[0, 1, 2]),
                guest_list(&[3, 4, 5]),
            ]))
        );
    }

    #[test]
    fn test_zero_extent_dim_is_empty_list() {
        let mut m = Marshaller::new();
        let mut rt = GuestRuntime::new();
        let mut pins = PinTable::new();

        let empty = HostValue::Cell(CellArray::new(vec![0, 3], vec![]).unwrap());
        let out = m.host_to_guest(&mut rt, &mut pins, &empty, false).unwrap();
        assert_eq!(out, GuestValue::List(GuestList::new()));
    }

    #[test]
    fn test_struct_to_map_in_field_order() {
        let mut m = Marshaller::new();
        let mut rt = GuestRuntime::new();
        let mut pins = PinTable::new();

        let mut record = HostStruct::new();
        record.set("a", HostValue::Int32(1));
        record.set("b", HostValue::Text("x".into()));
        let out = m
            .host_to_guest(&mut rt, &mut pins, &HostValue::Struct(record), true)
            .unwrap();

        let map = match out {
            GuestValue::Map(map) => map,
            other => panic!("expected map, got {other:?}"),
        };
        let entries = map.entries();
        assert_eq!(entries[0], ("a".into(), GuestValue::Int(1)));
        assert_eq!(entries[1], ("b".into(), GuestValue::Str("x".into())));
    }

    #[test]
    fn test_failed_element_substitutes_none_with_warning() {
        let mut m = Marshaller::new();
        let mut rt = GuestRuntime::new();
        let mut pins = PinTable::new();

        let wide = HostValue::NumArray {
            dims: vec![1, 2],
            data: vec![1.0, 2.0],
        };
        let cell = HostValue::Cell(CellArray::row(vec![HostValue::Int32(1), wide]));
        let out = m.host_to_guest(&mut rt, &mut pins, &cell, true).unwrap();

        assert_eq!(
            out,
            GuestValue::List(GuestList::from_vec(vec![
                GuestValue::Int(1),
                GuestValue::None,
            ]))
        );
        assert_eq!(m.warnings().len(), 1);
        assert!(m.drain_warnings()[0].contains("substituting None"));
        assert!(m.warnings().is_empty());
    }

    #[test]
    fn test_wide_numeric_array_rejected_at_top_level() {
        let mut m = Marshaller::new();
        let mut rt = GuestRuntime::new();
        let mut pins = PinTable::new();

        let wide = HostValue::NumArray {
            dims: vec![2, 2],
            data: vec![1.0, 2.0, 3.0, 4.0],
        };
        assert!(matches!(
            m.host_to_guest(&mut rt, &mut pins, &wide, true),
            Err(MarshalError::Unsupported { .. })
        ));

        // the boxing policy carries it across as a pin instead
        let boxed = m
            .host_to_guest_boxing(&mut rt, &mut pins, &wide, true)
            .unwrap();
        assert!(boxes::is_host_box(&boxed));
        assert_eq!(pins.len(), 1);
    }

    #[test]
    fn test_guest_box_short_circuits() {
        let mut m = Marshaller::new();
        let mut rt = GuestRuntime::new();
        let mut pins = PinTable::new();

        let handle = rt.alloc(GuestValue::Str("shared".into()));
        let boxed = boxes::box_guest(&mut rt, m.guest_boxes_mut(), handle).unwrap();

        let out = m.host_to_guest(&mut rt, &mut pins, &boxed, true).unwrap();
        assert_eq!(out, GuestValue::Str("shared".into()));
    }

    #[test]
    fn test_list_to_host_preserves_heterogeneous_elements() {
        let mut m = Marshaller::new();
        let mut rt = GuestRuntime::new();
        let mut pins = PinTable::new();

        let list = GuestValue::List(GuestList::from_vec(vec![
            GuestValue::Int(1),
            GuestValue::Str("x".into()),
            GuestValue::Float(2.5),
        ]));
        let out = m.guest_to_host(&mut rt, &mut pins, &list).unwrap();

        let cell = match out {
            HostValue::Cell(cell) => cell,
            other => panic!("expected cell, got {other:?}"),
        };
        assert_eq!(cell.dims(), &[1, 3]);
        assert_eq!(
            cell.elems(),
            &[
                HostValue::Int32(1),
                HostValue::Text("x".into()),
                HostValue::Double(2.5),
            ]
        );
    }

    #[test]
    fn test_map_to_host_record_round_trip() {
        let mut m = Marshaller::new();
        let mut rt = GuestRuntime::new();
        let mut pins = PinTable::new();

        let mut record = HostStruct::new();
        record.set("a", HostValue::Int32(1));
        record.set("b", HostValue::Text("x".into()));
        let original = HostValue::Struct(record);

        let guest = m.host_to_guest(&mut rt, &mut pins, &original, true).unwrap();
        let back = m.guest_to_host(&mut rt, &mut pins, &guest).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_invalid_map_key_is_conversion_error() {
        let mut m = Marshaller::new();
        let mut rt = GuestRuntime::new();
        let mut pins = PinTable::new();

        let map = GuestMap::new();
        map.set("ok", GuestValue::Int(1));
        map.set("Not Valid", GuestValue::Int(2));
        assert!(matches!(
            m.guest_to_host(&mut rt, &mut pins, &GuestValue::Map(map)),
            Err(MarshalError::InvalidFieldName { .. })
        ));
    }

    #[test]
    fn test_opaque_guest_values_box_automatically() {
        let mut m = Marshaller::new();
        let mut rt = GuestRuntime::new();
        let mut pins = PinTable::new();

        let opaque = GuestValue::Object(GuestObject::new("widget"));
        let out = m.guest_to_host(&mut rt, &mut pins, &opaque).unwrap();
        assert!(boxes::is_guest_box(&out));

        let handle = boxes::unbox_guest(&rt, m.guest_boxes(), &out).unwrap().handle();
        assert_eq!(rt.value_of(handle).unwrap(), &opaque);
    }

    #[test]
    fn test_abort_path_releases_sibling_boxes() {
        let mut m = Marshaller::new();
        let mut rt = GuestRuntime::new();
        let mut pins = PinTable::new();
        let baseline = rt.live_refs();

        // first element boxes a guest reference; the bad map key aborts the
        // conversion afterwards
        let bad_map = GuestMap::new();
        bad_map.set("Bad Key", GuestValue::Int(1));
        let list = GuestValue::List(GuestList::from_vec(vec![
            GuestValue::Object(GuestObject::new("widget")),
            GuestValue::Map(bad_map),
        ]));

        assert!(m.guest_to_host(&mut rt, &mut pins, &list).is_err());
        assert_eq!(rt.live_refs(), baseline);
        assert!(m.guest_boxes().is_empty());
    }
}
