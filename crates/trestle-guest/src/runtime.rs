//! The guest runtime: heap, namespace, modules, native operations.

use std::fmt;

use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::{
    GuestCallable, GuestError, GuestHeap, GuestObject, GuestRef, GuestResult, GuestValue,
};

/// Arithmetic operations the runtime evaluates natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Comparison operations the runtime evaluates natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompareOp {
    /// Parse the bridge's textual operator names.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "eq" => Some(CompareOp::Eq),
            "ne" => Some(CompareOp::Ne),
            "lt" => Some(CompareOp::Lt),
            "gt" => Some(CompareOp::Gt),
            "le" => Some(CompareOp::Le),
            "ge" => Some(CompareOp::Ge),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Lt => "lt",
            CompareOp::Gt => "gt",
            CompareOp::Le => "le",
            CompareOp::Ge => "ge",
        }
    }
}

/// Callbacks into the host, installed by the bridge at session bootstrap.
///
/// `eval` hands a source string to the host for evaluation; a reported
/// failure surfaces in the guest as [`GuestError::HostError`]. `write`
/// forwards guest text output to the host's output stream.
pub struct HostHooks {
    pub eval: Box<dyn FnMut(&str) -> Result<(), String>>,
    pub write: Box<dyn FnMut(&str)>,
}

impl Default for HostHooks {
    fn default() -> Self {
        HostHooks {
            eval: Box::new(|_| Err("host evaluation hook is not installed".to_string())),
            write: Box::new(|_| {}),
        }
    }
}

impl fmt::Debug for HostHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostHooks").finish_non_exhaustive()
    }
}

/// The embedded guest runtime.
///
/// Owns the refcounted heap, the single global namespace, and the module
/// registry. The namespace is the attribute set of the root `main` module,
/// so `import("main")` hands the host a live view of the globals. Not
/// thread-safe; a runtime belongs to the one control thread that owns the
/// surrounding session.
#[derive(Debug)]
pub struct GuestRuntime {
    heap: GuestHeap,
    globals: GuestObject,
    modules: FxHashMap<SmolStr, GuestRef>,
    hooks: HostHooks,
}

impl Default for GuestRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestRuntime {
    /// Start a runtime with the builtin namespace and modules in place.
    pub fn new() -> Self {
        let globals = GuestObject::new("module");
        globals.set_attr("__name__", GuestValue::Str("main".into()));
        let mut rt = GuestRuntime {
            heap: GuestHeap::new(),
            globals: globals.clone(),
            modules: FxHashMap::default(),
            hooks: HostHooks::default(),
        };
        rt.define_module("main", globals);
        rt.install_builtins();
        rt
    }

    // -- heap ---------------------------------------------------------------

    /// Move a value into a heap slot owned once by the caller.
    pub fn alloc(&mut self, value: GuestValue) -> GuestRef {
        self.heap.alloc(value)
    }

    pub fn retain(&mut self, handle: GuestRef) -> GuestResult<()> {
        self.heap.retain(handle)
    }

    pub fn release(&mut self, handle: GuestRef) -> GuestResult<()> {
        self.heap.release(handle)
    }

    /// Borrow the value a handle points at.
    pub fn value_of(&self, handle: GuestRef) -> GuestResult<&GuestValue> {
        self.heap.get(handle)
    }

    pub fn ref_is_live(&self, handle: GuestRef) -> bool {
        self.heap.is_live(handle)
    }

    pub fn ref_count(&self, handle: GuestRef) -> Option<usize> {
        self.heap.ref_count(handle)
    }

    /// Number of live heap slots; used by leak assertions in tests.
    pub fn live_refs(&self) -> usize {
        self.heap.len()
    }

    // -- namespace ------------------------------------------------------------

    /// Bind a name in the global namespace, replacing any previous value.
    pub fn bind_global(&mut self, name: impl Into<SmolStr>, value: GuestValue) {
        self.globals.set_attr(name, value);
    }

    pub fn lookup_global(&self, name: &str) -> Option<GuestValue> {
        self.globals.get_attr(name)
    }

    pub fn global_names(&self) -> Vec<SmolStr> {
        self.globals.attr_names()
    }

    // -- modules --------------------------------------------------------------

    /// Register a module object. The runtime keeps one ownership count on
    /// the module slot for the life of the process.
    pub fn define_module(&mut self, name: impl Into<SmolStr>, module: GuestObject) -> GuestRef {
        let name = name.into();
        let handle = self.heap.alloc(GuestValue::Object(module));
        self.modules.insert(name, handle);
        handle
    }

    /// Import a module: the caller receives a newly retained reference and
    /// is responsible for releasing it.
    pub fn import(&mut self, name: &str) -> GuestResult<GuestRef> {
        let handle = *self
            .modules
            .get(name)
            .ok_or_else(|| GuestError::ModuleNotFound { name: name.into() })?;
        self.heap.retain(handle)?;
        Ok(handle)
    }

    // -- native operations ------------------------------------------------------

    /// Attribute access on an object or module.
    pub fn getattr(&self, value: &GuestValue, name: &str) -> GuestResult<GuestValue> {
        match value {
            GuestValue::Object(obj) => {
                obj.get_attr(name)
                    .ok_or_else(|| GuestError::AttributeNotFound {
                        attribute: name.into(),
                        class: obj.class_name().into(),
                    })
            }
            other => Err(GuestError::AttributeNotFound {
                attribute: name.into(),
                class: other.type_name().into(),
            }),
        }
    }

    /// Call a callable value with positional arguments.
    ///
    /// Objects dispatch through their `__call__` attribute when it holds a
    /// callable; anything else is not callable.
    pub fn call(
        &mut self,
        callee: &GuestValue,
        args: Vec<GuestValue>,
    ) -> GuestResult<GuestValue> {
        match callee {
            GuestValue::Callable(func) => func.clone().invoke(self, args),
            GuestValue::Object(obj) => match obj.get_attr("__call__") {
                Some(GuestValue::Callable(func)) => func.invoke(self, args),
                _ => Err(GuestError::NotCallable {
                    type_name: obj.class_name().to_string(),
                }),
            },
            other => Err(GuestError::NotCallable {
                type_name: other.type_name().to_string(),
            }),
        }
    }

    /// Item access: list index, map key, or string index.
    pub fn get_item(&self, container: &GuestValue, key: &GuestValue) -> GuestResult<GuestValue> {
        match (container, key) {
            (GuestValue::List(list), GuestValue::Int(idx)) => {
                let len = list.len();
                let effective = normalize_index(*idx, len).ok_or(GuestError::IndexOutOfRange {
                    index: *idx,
                    length: len,
                })?;
                Ok(list.get(effective).unwrap_or(GuestValue::None))
            }
            (GuestValue::Map(map), GuestValue::Str(key)) => {
                map.get(key)
                    .ok_or_else(|| GuestError::KeyNotFound { key: key.clone() })
            }
            (GuestValue::Str(s), GuestValue::Int(idx)) => {
                let chars: Vec<char> = s.chars().collect();
                let effective =
                    normalize_index(*idx, chars.len()).ok_or(GuestError::IndexOutOfRange {
                        index: *idx,
                        length: chars.len(),
                    })?;
                Ok(GuestValue::Str(SmolStr::new(chars[effective].to_string())))
            }
            (container, key) => Err(GuestError::TypeError {
                message: format!(
                    "'{}' indices must be valid for '{}'",
                    key.type_name(),
                    container.type_name()
                ),
            }),
        }
    }

    /// Native arithmetic with the guest's coercion rules.
    pub fn arith(&self, op: ArithOp, a: &GuestValue, b: &GuestValue) -> GuestResult<GuestValue> {
        use GuestValue::{Float, Int, List, Str};
        match (op, a, b) {
            (ArithOp::Add, Int(x), Int(y)) => {
                x.checked_add(*y)
                    .map(Int)
                    .ok_or_else(|| GuestError::TypeError {
                        message: "integer overflow in addition".to_string(),
                    })
            }
            (ArithOp::Sub, Int(x), Int(y)) => {
                x.checked_sub(*y)
                    .map(Int)
                    .ok_or_else(|| GuestError::TypeError {
                        message: "integer overflow in subtraction".to_string(),
                    })
            }
            (ArithOp::Mul, Int(x), Int(y)) => {
                x.checked_mul(*y)
                    .map(Int)
                    .ok_or_else(|| GuestError::TypeError {
                        message: "integer overflow in multiplication".to_string(),
                    })
            }
            (ArithOp::Div, _, _) => {
                let (x, y) = both_floats(op, a, b)?;
                if y == 0.0 {
                    return Err(GuestError::DivisionByZero);
                }
                Ok(Float(x / y))
            }
            (ArithOp::Add, Str(x), Str(y)) => {
                Ok(Str(SmolStr::new(format!("{}{}", x, y))))
            }
            (ArithOp::Add, List(x), List(y)) => {
                let mut items = x.to_vec();
                items.extend(y.to_vec());
                Ok(List(crate::GuestList::from_vec(items)))
            }
            (ArithOp::Mul, Str(s), Int(n)) | (ArithOp::Mul, Int(n), Str(s)) => {
                Ok(Str(SmolStr::new(s.repeat((*n).max(0) as usize))))
            }
            (ArithOp::Mul, List(list), Int(n)) | (ArithOp::Mul, Int(n), List(list)) => {
                let mut items = Vec::new();
                for _ in 0..(*n).max(0) {
                    items.extend(list.to_vec());
                }
                Ok(List(crate::GuestList::from_vec(items)))
            }
            (op, a, b) => {
                let (x, y) = both_floats(op, a, b)?;
                let r = match op {
                    ArithOp::Add => x + y,
                    ArithOp::Sub => x - y,
                    ArithOp::Mul => x * y,
                    ArithOp::Div => unreachable!("handled above"),
                };
                Ok(Float(r))
            }
        }
    }

    /// Native comparison with the guest's coercion rules.
    pub fn compare(
        &self,
        op: CompareOp,
        a: &GuestValue,
        b: &GuestValue,
    ) -> GuestResult<GuestValue> {
        let result = match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            ordering => {
                let less_equal_greater = order_values(a, b)?;
                match ordering {
                    CompareOp::Lt => less_equal_greater == std::cmp::Ordering::Less,
                    CompareOp::Gt => less_equal_greater == std::cmp::Ordering::Greater,
                    CompareOp::Le => less_equal_greater != std::cmp::Ordering::Greater,
                    CompareOp::Ge => less_equal_greater != std::cmp::Ordering::Less,
                    CompareOp::Eq | CompareOp::Ne => unreachable!("handled above"),
                }
            }
        };
        Ok(GuestValue::Bool(result))
    }

    /// The guest's own textual rendering of a value.
    pub fn str_of(&self, value: &GuestValue) -> String {
        value.to_string()
    }

    // -- host hooks ----------------------------------------------------------

    pub fn set_host_hooks(&mut self, hooks: HostHooks) {
        self.hooks = hooks;
    }

    /// Evaluate host code through the embedder-supplied hook.
    pub fn host_eval(&mut self, code: &str) -> GuestResult<()> {
        (self.hooks.eval)(code).map_err(|message| GuestError::HostError { message })
    }

    /// Write text to the host output stream.
    pub fn host_write(&mut self, text: &str) {
        (self.hooks.write)(text);
    }

    // -- builtins --------------------------------------------------------------

    fn install_builtins(&mut self) {
        self.bind_global(
            "len",
            GuestValue::Callable(GuestCallable::new("len", Some(1), |_, args| {
                match &args[0] {
                    GuestValue::Str(s) => Ok(GuestValue::Int(s.chars().count() as i64)),
                    GuestValue::List(list) => Ok(GuestValue::Int(list.len() as i64)),
                    GuestValue::Map(map) => Ok(GuestValue::Int(map.len() as i64)),
                    other => Err(GuestError::TypeError {
                        message: format!("object of type '{}' has no len()", other.type_name()),
                    }),
                }
            })),
        );
        self.bind_global(
            "str",
            GuestValue::Callable(GuestCallable::new("str", Some(1), |_, args| {
                Ok(GuestValue::Str(SmolStr::new(args[0].to_string())))
            })),
        );
        self.bind_global(
            "abs",
            GuestValue::Callable(GuestCallable::new("abs", Some(1), |_, args| {
                match &args[0] {
                    GuestValue::Int(n) => Ok(GuestValue::Int(n.abs())),
                    GuestValue::Float(f) => Ok(GuestValue::Float(f.abs())),
                    other => Err(GuestError::TypeError {
                        message: format!("bad operand type for abs(): '{}'", other.type_name()),
                    }),
                }
            })),
        );
        self.bind_global(
            "type",
            GuestValue::Callable(GuestCallable::new("type", Some(1), |_, args| {
                Ok(GuestValue::Str(args[0].type_name().into()))
            })),
        );

        let math = GuestObject::new("module");
        math.set_attr("__name__", GuestValue::Str("math".into()));
        math.set_attr("pi", GuestValue::Float(std::f64::consts::PI));
        math.set_attr(
            "sqrt",
            GuestValue::Callable(GuestCallable::new("sqrt", Some(1), |_, args| {
                let x = args[0].as_float().ok_or_else(|| GuestError::TypeError {
                    message: format!("sqrt() argument must be a number, not '{}'",
                        args[0].type_name()),
                })?;
                if x < 0.0 {
                    return Err(GuestError::TypeError {
                        message: "math domain error".to_string(),
                    });
                }
                Ok(GuestValue::Float(x.sqrt()))
            })),
        );
        self.define_module("math", math);

        let operator = GuestObject::new("module");
        operator.set_attr("__name__", GuestValue::Str("operator".into()));
        operator.set_attr(
            "add",
            GuestValue::Callable(GuestCallable::new("add", Some(2), |rt, args| {
                rt.arith(ArithOp::Add, &args[0], &args[1])
            })),
        );
        operator.set_attr(
            "mul",
            GuestValue::Callable(GuestCallable::new("mul", Some(2), |rt, args| {
                rt.arith(ArithOp::Mul, &args[0], &args[1])
            })),
        );
        operator.set_attr(
            "eq",
            GuestValue::Callable(GuestCallable::new("eq", Some(2), |rt, args| {
                rt.compare(CompareOp::Eq, &args[0], &args[1])
            })),
        );
        operator.set_attr(
            "getitem",
            GuestValue::Callable(GuestCallable::new("getitem", Some(2), |rt, args| {
                rt.get_item(&args[0], &args[1])
            })),
        );
        self.define_module("operator", operator);
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let effective = if index < 0 {
        index + len as i64
    } else {
        index
    };
    if effective >= 0 && (effective as usize) < len {
        Some(effective as usize)
    } else {
        None
    }
}

fn both_floats(op: ArithOp, a: &GuestValue, b: &GuestValue) -> GuestResult<(f64, f64)> {
    match (a.as_float(), b.as_float()) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(GuestError::TypeError {
            message: format!(
                "unsupported operand types for {:?}: '{}' and '{}'",
                op,
                a.type_name(),
                b.type_name()
            ),
        }),
    }
}

fn order_values(a: &GuestValue, b: &GuestValue) -> GuestResult<std::cmp::Ordering> {
    match (a, b) {
        (GuestValue::Str(x), GuestValue::Str(y)) => Ok(x.cmp(y)),
        _ => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).ok_or_else(|| GuestError::TypeError {
                message: "cannot order NaN".to_string(),
            }),
            _ => Err(GuestError::TypeError {
                message: format!(
                    "'<' not supported between '{}' and '{}'",
                    a.type_name(),
                    b.type_name()
                ),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_globals_bind_and_lookup() {
        let mut rt = GuestRuntime::new();
        rt.bind_global("x", GuestValue::Int(42));
        assert_eq!(rt.lookup_global("x"), Some(GuestValue::Int(42)));
        assert_eq!(rt.lookup_global("missing"), None);
    }

    #[test]
    fn test_import_retains_module_slot() {
        let mut rt = GuestRuntime::new();
        let first = rt.import("math").unwrap();
        assert_eq!(rt.ref_count(first), Some(2)); // runtime + caller

        let second = rt.import("math").unwrap();
        assert_eq!(first, second);
        assert_eq!(rt.ref_count(first), Some(3));

        rt.release(first).unwrap();
        rt.release(second).unwrap();
        assert_eq!(rt.ref_count(first), Some(1));
    }

    #[test]
    fn test_main_module_reflects_globals() {
        let mut rt = GuestRuntime::new();
        rt.bind_global("answer", GuestValue::Int(42));

        let m = rt.import("main").unwrap();
        let module = rt.value_of(m).unwrap().clone();
        assert_eq!(
            rt.getattr(&module, "answer").unwrap(),
            GuestValue::Int(42)
        );
        assert_eq!(
            rt.getattr(&module, "__name__").unwrap(),
            GuestValue::Str("main".into())
        );
        rt.release(m).unwrap();
    }

    #[test]
    fn test_operator_module_callables() {
        let mut rt = GuestRuntime::new();
        let m = rt.import("operator").unwrap();
        let module = rt.value_of(m).unwrap().clone();

        let mul = rt.getattr(&module, "mul").unwrap();
        let out = rt
            .call(&mul, vec![GuestValue::Int(6), GuestValue::Int(7)])
            .unwrap();
        assert_eq!(out, GuestValue::Int(42));

        let eq = rt.getattr(&module, "eq").unwrap();
        let out = rt
            .call(&eq, vec![GuestValue::Int(1), GuestValue::Float(1.0)])
            .unwrap();
        assert_eq!(out, GuestValue::Bool(true));
        rt.release(m).unwrap();
    }

    #[test]
    fn test_import_missing_module() {
        let mut rt = GuestRuntime::new();
        assert!(matches!(
            rt.import("nope"),
            Err(GuestError::ModuleNotFound { .. })
        ));
    }

    #[test]
    fn test_getattr_on_module() {
        let mut rt = GuestRuntime::new();
        let m = rt.import("math").unwrap();
        let module = rt.value_of(m).unwrap().clone();

        let pi = rt.getattr(&module, "pi").unwrap();
        assert_eq!(pi, GuestValue::Float(std::f64::consts::PI));

        assert!(matches!(
            rt.getattr(&module, "tau"),
            Err(GuestError::AttributeNotFound { .. })
        ));
        rt.release(m).unwrap();
    }

    #[test]
    fn test_call_sqrt() {
        let mut rt = GuestRuntime::new();
        let m = rt.import("math").unwrap();
        let module = rt.value_of(m).unwrap().clone();
        let sqrt = rt.getattr(&module, "sqrt").unwrap();

        let out = rt.call(&sqrt, vec![GuestValue::Float(9.0)]).unwrap();
        assert_eq!(out, GuestValue::Float(3.0));
        rt.release(m).unwrap();
    }

    #[test]
    fn test_call_non_callable() {
        let mut rt = GuestRuntime::new();
        let err = rt.call(&GuestValue::Int(3), vec![]).unwrap_err();
        assert!(matches!(err, GuestError::NotCallable { .. }));
    }

    #[test]
    fn test_object_dispatches_through_dunder_call() {
        let mut rt = GuestRuntime::new();
        let adder = GuestObject::new("adder");
        adder.set_attr(
            "__call__",
            GuestValue::Callable(GuestCallable::new("__call__", Some(2), |rt, args| {
                rt.arith(ArithOp::Add, &args[0], &args[1])
            })),
        );
        let out = rt
            .call(
                &GuestValue::Object(adder),
                vec![GuestValue::Int(2), GuestValue::Int(3)],
            )
            .unwrap();
        assert_eq!(out, GuestValue::Int(5));

        // an object without the attribute stays uncallable
        let plain = GuestObject::new("widget");
        assert!(matches!(
            rt.call(&GuestValue::Object(plain), vec![]),
            Err(GuestError::NotCallable { .. })
        ));
    }

    #[test]
    fn test_get_item() {
        let rt = GuestRuntime::new();
        let list = GuestValue::List(crate::GuestList::from_vec(vec![
            GuestValue::Int(10),
            GuestValue::Int(20),
        ]));
        assert_eq!(
            rt.get_item(&list, &GuestValue::Int(1)).unwrap(),
            GuestValue::Int(20)
        );
        assert_eq!(
            rt.get_item(&list, &GuestValue::Int(-1)).unwrap(),
            GuestValue::Int(20)
        );
        assert!(rt.get_item(&list, &GuestValue::Int(2)).is_err());

        let map = crate::GuestMap::new();
        map.set("k", GuestValue::Str("v".into()));
        assert_eq!(
            rt.get_item(&GuestValue::Map(map), &GuestValue::Str("k".into()))
                .unwrap(),
            GuestValue::Str("v".into())
        );
    }

    #[test]
    fn test_arith() {
        let rt = GuestRuntime::new();
        assert_eq!(
            rt.arith(ArithOp::Mul, &GuestValue::Int(6), &GuestValue::Int(7))
                .unwrap(),
            GuestValue::Int(42)
        );
        assert_eq!(
            rt.arith(ArithOp::Mul, &GuestValue::Int(2), &GuestValue::Float(1.5))
                .unwrap(),
            GuestValue::Float(3.0)
        );
        assert_eq!(
            rt.arith(
                ArithOp::Mul,
                &GuestValue::Str("ab".into()),
                &GuestValue::Int(2)
            )
            .unwrap(),
            GuestValue::Str("abab".into())
        );
        assert!(matches!(
            rt.arith(ArithOp::Div, &GuestValue::Int(1), &GuestValue::Int(0)),
            Err(GuestError::DivisionByZero)
        ));
        // division is always true division
        assert_eq!(
            rt.arith(ArithOp::Div, &GuestValue::Int(7), &GuestValue::Int(2))
                .unwrap(),
            GuestValue::Float(3.5)
        );
    }

    #[test]
    fn test_compare() {
        let rt = GuestRuntime::new();
        assert_eq!(
            rt.compare(CompareOp::Eq, &GuestValue::Int(3), &GuestValue::Float(3.0))
                .unwrap(),
            GuestValue::Bool(true)
        );
        assert_eq!(
            rt.compare(CompareOp::Lt, &GuestValue::Int(2), &GuestValue::Int(5))
                .unwrap(),
            GuestValue::Bool(true)
        );
        assert_eq!(
            rt.compare(
                CompareOp::Ge,
                &GuestValue::Str("b".into()),
                &GuestValue::Str("a".into())
            )
            .unwrap(),
            GuestValue::Bool(true)
        );
        assert!(rt
            .compare(CompareOp::Lt, &GuestValue::None, &GuestValue::Int(1))
            .is_err());
    }

    #[test]
    fn test_host_hooks_default_eval_fails() {
        let mut rt = GuestRuntime::new();
        assert!(matches!(
            rt.host_eval("disp(1)"),
            Err(GuestError::HostError { .. })
        ));
    }

    #[test]
    fn test_host_hooks_installed() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let written: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = written.clone();

        let mut rt = GuestRuntime::new();
        rt.set_host_hooks(HostHooks {
            eval: Box::new(|_| Ok(())),
            write: Box::new(move |text| sink.borrow_mut().push(text.to_string())),
        });

        rt.host_eval("x = 1;").unwrap();
        rt.host_write("hello");
        assert_eq!(written.borrow().as_slice(), ["hello".to_string()]);
    }
}
