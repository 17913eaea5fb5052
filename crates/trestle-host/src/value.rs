//! Host runtime values.

use std::fmt;

use indexmap::IndexMap;
use smol_str::SmolStr;

/// A value native to the host environment.
///
/// Scalars are represented directly; numeric buffers larger than one element
/// are carried as [`HostValue::NumArray`], which the bridge never converts
/// structurally (see the marshal crate). Cell arrays are rectangular and
/// stored in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    /// Empty value (the host's `[]`)
    Nil,

    /// Logical scalar
    Bool(bool),

    /// 32-bit signed integer scalar
    Int32(i32),

    /// 64-bit signed integer scalar
    Int64(i64),

    /// Double-precision scalar
    Double(f64),

    /// Character/text value
    Text(SmolStr),

    /// Raw numeric buffer with explicit dimensions, row-major
    NumArray { dims: Vec<usize>, data: Vec<f64> },

    /// Rectangular container of arbitrary host values
    Cell(CellArray),

    /// Record with named fields, field order preserved
    Struct(HostStruct),

    /// Class instance; also the representation of boxed guest references
    Object(HostObject),
}

impl HostValue {
    /// Name of the host class this value belongs to.
    pub fn class_name(&self) -> &str {
        match self {
            HostValue::Nil => "double",
            HostValue::Bool(_) => "logical",
            HostValue::Int32(_) => "int32",
            HostValue::Int64(_) => "int64",
            HostValue::Double(_) | HostValue::NumArray { .. } => "double",
            HostValue::Text(_) => "char",
            HostValue::Cell(_) => "cell",
            HostValue::Struct(_) => "struct",
            HostValue::Object(obj) => obj.class_name.as_str(),
        }
    }

    /// Whether this value is a numeric or logical scalar with exactly one
    /// element. The marshaller only converts numerics that pass this check.
    pub fn is_scalar(&self) -> bool {
        match self {
            HostValue::Bool(_)
            | HostValue::Int32(_)
            | HostValue::Int64(_)
            | HostValue::Double(_) => true,
            HostValue::NumArray { data, .. } => data.len() == 1,
            _ => false,
        }
    }

    /// Try to extract text contents.
    pub fn as_text(&self) -> Option<&SmolStr> {
        match self {
            HostValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to extract a cell array.
    pub fn as_cell(&self) -> Option<&CellArray> {
        match self {
            HostValue::Cell(c) => Some(c),
            _ => None,
        }
    }
}

impl Default for HostValue {
    fn default() -> Self {
        HostValue::Nil
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Nil => write!(f, "[]"),
            HostValue::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            HostValue::Int32(n) => write!(f, "{}", n),
            HostValue::Int64(n) => write!(f, "{}", n),
            HostValue::Double(n) => write!(f, "{}", n),
            HostValue::Text(s) => write!(f, "{}", s),
            HostValue::NumArray { dims, .. } => {
                write!(f, "<{} double>", format_dims(dims))
            }
            HostValue::Cell(cell) => {
                write!(f, "{{")?;
                for (i, v) in cell.elems().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "}}")
            }
            HostValue::Struct(s) => {
                write!(f, "struct(")?;
                for (i, (k, v)) in s.fields().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, ")")
            }
            HostValue::Object(obj) => write!(f, "<{} instance>", obj.class_name),
        }
    }
}

fn format_dims(dims: &[usize]) -> String {
    let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
    parts.join("x")
}

/// A rectangular, row-major container of host values.
///
/// The element at subscripts `(s0, s1, .., sk)` lives at linear index
/// `((s0 * dims[1] + s1) * dims[2] + s2) ...` — the last subscript varies
/// fastest. This is the fixed index-order convention for the whole bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct CellArray {
    dims: Vec<usize>,
    elems: Vec<HostValue>,
}

impl CellArray {
    /// Create a cell array with explicit dimensions.
    ///
    /// Returns `None` if `elems.len()` does not match the product of `dims`
    /// or `dims` is empty.
    pub fn new(dims: Vec<usize>, elems: Vec<HostValue>) -> Option<Self> {
        if dims.is_empty() {
            return None;
        }
        let numel: usize = dims.iter().product();
        if numel != elems.len() {
            return None;
        }
        Some(CellArray { dims, elems })
    }

    /// Create a 1×N row cell from a vector of values.
    pub fn row(elems: Vec<HostValue>) -> Self {
        CellArray {
            dims: vec![1, elems.len()],
            elems,
        }
    }

    /// Dimension extents.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Total element count.
    pub fn numel(&self) -> usize {
        self.elems.len()
    }

    /// All elements in row-major order.
    pub fn elems(&self) -> &[HostValue] {
        &self.elems
    }

    /// Linear row-major index for a full set of subscripts.
    pub fn index_of(&self, subs: &[usize]) -> Option<usize> {
        if subs.len() != self.dims.len() {
            return None;
        }
        let mut idx = 0usize;
        for (sub, dim) in subs.iter().zip(self.dims.iter()) {
            if sub >= dim {
                return None;
            }
            idx = idx * dim + sub;
        }
        Some(idx)
    }

    /// Element at the given subscripts.
    pub fn get(&self, subs: &[usize]) -> Option<&HostValue> {
        self.index_of(subs).map(|i| &self.elems[i])
    }
}

/// A record value with named fields in insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HostStruct {
    fields: IndexMap<SmolStr, HostValue>,
}

impl HostStruct {
    pub fn new() -> Self {
        HostStruct {
            fields: IndexMap::new(),
        }
    }

    /// Set a field, preserving first-insertion order.
    pub fn set(&mut self, name: impl Into<SmolStr>, value: HostValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&HostValue> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate fields in order.
    pub fn fields(&self) -> impl Iterator<Item = (&SmolStr, &HostValue)> {
        self.fields.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &SmolStr> {
        self.fields.keys()
    }
}

impl FromIterator<(SmolStr, HostValue)> for HostStruct {
    fn from_iter<I: IntoIterator<Item = (SmolStr, HostValue)>>(iter: I) -> Self {
        HostStruct {
            fields: iter.into_iter().collect(),
        }
    }
}

/// A host class instance: a class name plus named properties.
///
/// The bridge's guest-reference box is an object of a fixed class carrying a
/// single 64-bit handle property; `is_box` checks recognize it by class
/// identity, so plain instances of other classes are never mistaken for
/// boxes.
#[derive(Debug, Clone, PartialEq)]
pub struct HostObject {
    pub class_name: SmolStr,
    fields: IndexMap<SmolStr, HostValue>,
}

impl HostObject {
    pub fn new(class_name: impl Into<SmolStr>) -> Self {
        HostObject {
            class_name: class_name.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn set(&mut self, name: impl Into<SmolStr>, value: HostValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&HostValue> {
        self.fields.get(name)
    }

    pub fn property_names(&self) -> impl Iterator<Item = &SmolStr> {
        self.fields.keys()
    }
}

/// Whether `name` is a valid host identifier and can be used as a record
/// field name: a lowercase letter followed by lowercase letters, digits, or
/// underscores.
pub fn is_valid_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
