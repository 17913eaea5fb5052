//! Guest runtime values.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::{GuestError, GuestResult, GuestRuntime};

/// A value native to the guest runtime.
///
/// Lists and maps share their storage on clone (object identity), matching
/// the guest's reference semantics. Everything that has no richer
/// representation is an [`GuestObject`]: an opaque bag of attributes with a
/// class name, which is also how boxed host values travel.
#[derive(Debug, Clone)]
pub enum GuestValue {
    /// The guest's null value
    None,

    /// Boolean
    Bool(bool),

    /// Signed 64-bit integer
    Int(i64),

    /// IEEE 754 double
    Float(f64),

    /// Text
    Str(SmolStr),

    /// Ordered, heterogeneous, variable-length sequence
    List(GuestList),

    /// String-keyed mapping; iteration follows insertion order
    Map(GuestMap),

    /// Native callable registered by the embedder or a builtin module
    Callable(GuestCallable),

    /// Opaque object with attribute access
    Object(GuestObject),
}

impl GuestValue {
    /// Guest-visible type name.
    pub fn type_name(&self) -> &str {
        match self {
            GuestValue::None => "NoneType",
            GuestValue::Bool(_) => "bool",
            GuestValue::Int(_) => "int",
            GuestValue::Float(_) => "float",
            GuestValue::Str(_) => "str",
            GuestValue::List(_) => "list",
            GuestValue::Map(_) => "dict",
            GuestValue::Callable(_) => "function",
            GuestValue::Object(obj) => obj.class_name(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, GuestValue::None)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            GuestValue::None => false,
            GuestValue::Bool(b) => *b,
            GuestValue::Int(n) => *n != 0,
            GuestValue::Float(f) => *f != 0.0 && !f.is_nan(),
            GuestValue::Str(s) => !s.is_empty(),
            GuestValue::List(list) => !list.is_empty(),
            GuestValue::Map(map) => !map.is_empty(),
            GuestValue::Callable(_) | GuestValue::Object(_) => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            GuestValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            GuestValue::Float(f) => Some(*f),
            GuestValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GuestValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&GuestList> {
        match self {
            GuestValue::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&GuestObject> {
        match self {
            GuestValue::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl PartialEq for GuestValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (GuestValue::None, GuestValue::None) => true,
            (GuestValue::Bool(a), GuestValue::Bool(b)) => a == b,
            (GuestValue::Int(a), GuestValue::Int(b)) => a == b,
            (GuestValue::Float(a), GuestValue::Float(b)) => a == b,
            (GuestValue::Int(a), GuestValue::Float(b)) => (*a as f64) == *b,
            (GuestValue::Float(a), GuestValue::Int(b)) => *a == (*b as f64),
            (GuestValue::Str(a), GuestValue::Str(b)) => a == b,
            (GuestValue::List(a), GuestValue::List(b)) => a.to_vec() == b.to_vec(),
            (GuestValue::Map(a), GuestValue::Map(b)) => a.entries() == b.entries(),
            (GuestValue::Callable(a), GuestValue::Callable(b)) => a == b,
            (GuestValue::Object(a), GuestValue::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Default for GuestValue {
    fn default() -> Self {
        GuestValue::None
    }
}

impl fmt::Display for GuestValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestValue::None => write!(f, "None"),
            GuestValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            GuestValue::Int(n) => write!(f, "{}", n),
            GuestValue::Float(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{:.1}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            GuestValue::Str(s) => write!(f, "{}", s),
            GuestValue::List(list) => {
                write!(f, "[")?;
                for (i, v) in list.to_vec().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", Repr(v))?;
                }
                write!(f, "]")
            }
            GuestValue::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.entries().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}': {}", k, Repr(v))?;
                }
                write!(f, "}}")
            }
            GuestValue::Callable(func) => write!(f, "<function {}>", func.name),
            GuestValue::Object(obj) => write!(f, "<{} object>", obj.class_name()),
        }
    }
}

/// Display adapter quoting strings, for container interiors.
struct Repr<'a>(&'a GuestValue);

impl fmt::Display for Repr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            GuestValue::Str(s) => write!(f, "'{}'", s),
            other => write!(f, "{}", other),
        }
    }
}

/// An ordered sequence with shared storage.
#[derive(Debug, Clone, Default)]
pub struct GuestList {
    items: Rc<RefCell<Vec<GuestValue>>>,
}

impl GuestList {
    pub fn new() -> Self {
        GuestList::default()
    }

    pub fn from_vec(items: Vec<GuestValue>) -> Self {
        GuestList {
            items: Rc::new(RefCell::new(items)),
        }
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<GuestValue> {
        self.items.borrow().get(index).cloned()
    }

    pub fn push(&self, value: GuestValue) {
        self.items.borrow_mut().push(value);
    }

    pub fn to_vec(&self) -> Vec<GuestValue> {
        self.items.borrow().clone()
    }
}

impl FromIterator<GuestValue> for GuestList {
    fn from_iter<I: IntoIterator<Item = GuestValue>>(iter: I) -> Self {
        GuestList::from_vec(iter.into_iter().collect())
    }
}

/// A string-keyed mapping with shared storage and stable iteration order.
#[derive(Debug, Clone, Default)]
pub struct GuestMap {
    items: Rc<RefCell<IndexMap<SmolStr, GuestValue>>>,
}

impl GuestMap {
    pub fn new() -> Self {
        GuestMap::default()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, key: &str) -> Option<GuestValue> {
        self.items.borrow().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<SmolStr>, value: GuestValue) {
        self.items.borrow_mut().insert(key.into(), value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.items.borrow().contains_key(key)
    }

    /// Snapshot of the entries in iteration order.
    pub fn entries(&self) -> Vec<(SmolStr, GuestValue)> {
        self.items
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl FromIterator<(SmolStr, GuestValue)> for GuestMap {
    fn from_iter<I: IntoIterator<Item = (SmolStr, GuestValue)>>(iter: I) -> Self {
        GuestMap {
            items: Rc::new(RefCell::new(iter.into_iter().collect())),
        }
    }
}

/// A native callable implemented in Rust.
///
/// Callables receive the runtime so that builtins (and the bridge's
/// registered callbacks) can reach the namespace, heap, and host hooks.
#[derive(Clone)]
pub struct GuestCallable {
    pub name: SmolStr,
    /// `None` means variadic.
    pub arity: Option<usize>,
    func: Rc<CallFn>,
}

type CallFn = dyn Fn(&mut GuestRuntime, Vec<GuestValue>) -> GuestResult<GuestValue>;

impl GuestCallable {
    pub fn new<F>(name: impl Into<SmolStr>, arity: Option<usize>, func: F) -> Self
    where
        F: Fn(&mut GuestRuntime, Vec<GuestValue>) -> GuestResult<GuestValue> + 'static,
    {
        GuestCallable {
            name: name.into(),
            arity,
            func: Rc::new(func),
        }
    }

    /// Invoke with arity checking.
    pub fn invoke(
        &self,
        rt: &mut GuestRuntime,
        args: Vec<GuestValue>,
    ) -> GuestResult<GuestValue> {
        if let Some(expected) = self.arity {
            if args.len() != expected {
                return Err(GuestError::ArityMismatch {
                    callable: self.name.clone(),
                    expected,
                    got: args.len(),
                });
            }
        }
        (self.func)(rt, args)
    }
}

impl fmt::Debug for GuestCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GuestCallable({})", self.name)
    }
}

impl PartialEq for GuestCallable {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

/// An opaque guest object: a class name plus shared attributes.
///
/// Identity (not contents) defines equality, the way the guest's own `is`
/// works; clones share the attribute storage.
#[derive(Debug, Clone)]
pub struct GuestObject {
    id: u64,
    class_name: SmolStr,
    attrs: Rc<RefCell<IndexMap<SmolStr, GuestValue>>>,
}

impl GuestObject {
    pub fn new(class_name: impl Into<SmolStr>) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        GuestObject {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            class_name: class_name.into(),
            attrs: Rc::new(RefCell::new(IndexMap::new())),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn set_attr(&self, name: impl Into<SmolStr>, value: GuestValue) {
        self.attrs.borrow_mut().insert(name.into(), value);
    }

    pub fn get_attr(&self, name: &str) -> Option<GuestValue> {
        self.attrs.borrow().get(name).cloned()
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.borrow().contains_key(name)
    }

    pub fn attr_names(&self) -> Vec<SmolStr> {
        self.attrs.borrow().keys().cloned().collect()
    }
}

impl PartialEq for GuestObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
