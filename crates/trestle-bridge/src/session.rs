//! The bridge session: one embedded guest runtime driven synchronously.

use trestle_guest::{
    ArithOp, CompareOp, GuestCallable, GuestError, GuestRuntime, GuestValue, HostHooks,
};
use trestle_host::{HostValue, PinTable};
use trestle_marshal::{self as marshal, Marshaller, OwnedGuest};

use crate::{BridgeError, BridgeResult, Opcode};

/// Everything the runtime needs once it has started.
#[derive(Debug)]
struct State {
    rt: GuestRuntime,
    pins: PinTable,
    marshal: Marshaller,
}

/// A bridge session owning one embedded guest runtime.
///
/// The session is the explicit stand-in for process-global interpreter
/// state: tests may run several sessions side by side, each with its own
/// namespace, heap, and pin table. All operations are synchronous and run
/// to completion in issue order; the session stays valid after a failed
/// operation, with any partially constructed result discarded.
///
/// The runtime starts lazily on the first dispatched operation. Bootstrap
/// establishes the global namespace and registers the bridge-native
/// callables `hosteval` (guest code evaluating host code through the
/// embedder's hook) and `hostwrite` (guest text output to the host's
/// output stream). Teardown happens when the session drops, or earlier via
/// [`shutdown`](Session::shutdown).
#[derive(Debug)]
pub struct Session {
    hooks: Option<HostHooks>,
    state: Option<State>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A session with default hooks: host evaluation reports failure and
    /// guest output is discarded.
    pub fn new() -> Self {
        Session {
            hooks: None,
            state: None,
        }
    }

    /// A session wired to the embedder's host-evaluation and output hooks.
    pub fn with_hooks(hooks: HostHooks) -> Self {
        Session {
            hooks: Some(hooks),
            state: None,
        }
    }

    /// Whether the embedded runtime has started.
    pub fn is_started(&self) -> bool {
        self.state.is_some()
    }

    /// Tear the embedded runtime down, dropping its heap, namespace, and
    /// pin table. A later dispatch starts a fresh runtime; embedder hooks
    /// belong to the runtime they started, so the fresh one runs with
    /// default hooks.
    pub fn shutdown(&mut self) {
        self.state = None;
    }

    /// Number of live guest heap slots; used by leak assertions in tests.
    pub fn live_guest_refs(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.rt.live_refs())
    }

    /// Number of live host pins.
    pub fn live_pins(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.pins.len())
    }

    /// Dispatch by numeric operation label, as the host calling convention
    /// delivers it.
    pub fn dispatch_code(
        &mut self,
        code: u8,
        args: &[HostValue],
    ) -> BridgeResult<Option<HostValue>> {
        let op = Opcode::from_code(code).ok_or(BridgeError::UnknownOpcode { code })?;
        self.dispatch(op, args)
    }

    /// Run one bridge operation to completion.
    ///
    /// Returns at most one host-native result. On error the operation is
    /// aborted, a guest diagnostic (if any) is written to the host output
    /// channel, and no partial result is returned.
    pub fn dispatch(&mut self, op: Opcode, args: &[HostValue]) -> BridgeResult<Option<HostValue>> {
        let state = self.start_if_needed();
        let result = run_op(state, op, args);

        // root cause first: the guest's own diagnostic goes to the host
        // output channel before the fatal bridge error surfaces
        if let Err(BridgeError::GuestRuntime { diagnostic }) = &result {
            let message = format!("Error: {diagnostic}\n");
            state.rt.host_write(&message);
        }
        for warning in state.marshal.drain_warnings() {
            let message = format!("Warning: {warning}\n");
            state.rt.host_write(&message);
        }
        result
    }

    fn start_if_needed(&mut self) -> &mut State {
        if self.state.is_none() {
            let mut rt = GuestRuntime::new();
            rt.set_host_hooks(self.hooks.take().unwrap_or_default());
            register_bridge_callables(&mut rt);
            self.state = Some(State {
                rt,
                pins: PinTable::new(),
                marshal: Marshaller::new(),
            });
        }
        self.state.as_mut().expect("session state just initialized")
    }
}

/// Install the callables guest code uses to reach back into the host.
fn register_bridge_callables(rt: &mut GuestRuntime) {
    rt.bind_global(
        "hosteval",
        GuestValue::Callable(GuestCallable::new("hosteval", Some(1), |rt, args| {
            let code = args[0].as_str().ok_or_else(|| GuestError::TypeError {
                message: format!(
                    "hosteval() argument must be str, not '{}'",
                    args[0].type_name()
                ),
            })?;
            let code = code.to_string();
            rt.host_eval(&code)?;
            Ok(GuestValue::None)
        })),
    );
    rt.bind_global(
        "hostwrite",
        GuestValue::Callable(GuestCallable::new("hostwrite", Some(1), |rt, args| {
            let text = args[0].to_string();
            rt.host_write(&text);
            Ok(GuestValue::None)
        })),
    );
}

fn run_op(state: &mut State, op: Opcode, args: &[HostValue]) -> BridgeResult<Option<HostValue>> {
    let State { rt, pins, marshal } = state;
    match op {
        Opcode::Eval => {
            let [source] = expect_args::<1>(op, "1 (source text)", args)?;
            let source = text_operand(source, "source text")?;
            let value = rt.eval(source)?;
            let result = marshal.guest_to_host(rt, pins, &value)?;
            Ok(Some(result))
        }
        Opcode::Import => {
            let [name] = expect_args::<1>(op, "1 (module name)", args)?;
            let name = text_operand(name, "module name")?;
            let handle = rt.import(name)?;
            Ok(Some(marshal.box_guest_owned(OwnedGuest::adopt(handle))))
        }
        Opcode::Release => {
            let [boxed] = expect_args::<1>(op, "1 (boxed reference)", args)?;
            marshal.release_guest_box(rt, boxed)?;
            Ok(None)
        }
        Opcode::Str => {
            let [value] = expect_args::<1>(op, "1 (value)", args)?;
            let guest = marshal.host_to_guest_boxing(rt, pins, value, true)?;
            let rendered = rt.str_of(&guest);
            release_transient(pins, &guest);
            Ok(Some(HostValue::Text(rendered.into())))
        }
        Opcode::Put => {
            let [name, value] = expect_args::<2>(op, "2 (name, value)", args)?;
            let name = text_operand(name, "global name")?;
            let converted = marshal.host_to_guest_boxing(rt, pins, value, true)?;
            rt.bind_global(name, converted);
            Ok(None)
        }
        Opcode::Get => {
            let [name] = expect_args::<1>(op, "1 (name)", args)?;
            let name = text_operand(name, "global name")?;
            let value = rt
                .lookup_global(name)
                .ok_or_else(|| BridgeError::NotFound { name: name.into() })?;
            let result = marshal.guest_to_host(rt, pins, &value)?;
            Ok(Some(result))
        }
        Opcode::GetAttr => {
            let [target, name] = expect_args::<2>(op, "2 (object, name)", args)?;
            let name = text_operand(name, "attribute name")?;
            let target = marshal.host_to_guest_boxing(rt, pins, target, true)?;
            let value = rt.getattr(&target, name);
            release_transient(pins, &target);
            let result = marshal.guest_to_host(rt, pins, &value?)?;
            Ok(Some(result))
        }
        Opcode::Call => {
            if args.is_empty() {
                return Err(BridgeError::ArgumentCount {
                    op: op.name(),
                    expected: "at least 1 (callee, arguments...)",
                    got: 0,
                });
            }
            let operands = marshal_operands(marshal, rt, pins, args)?;
            let value = rt.call(&operands[0], operands[1..].to_vec());
            // only the callee is transient: the callee may keep its
            // arguments, so their pins live until an explicit release
            release_transient(pins, &operands[0]);
            let result = marshal.guest_to_host(rt, pins, &value?)?;
            Ok(Some(result))
        }
        Opcode::GetItem => {
            let operands = expect_args::<2>(op, "2 (container, key)", args)?;
            let operands = marshal_operands(marshal, rt, pins, operands)?;
            let value = rt.get_item(&operands[0], &operands[1]);
            release_transients(pins, &operands);
            let result = marshal.guest_to_host(rt, pins, &value?)?;
            Ok(Some(result))
        }
        Opcode::Multiply => {
            let operands = expect_args::<2>(op, "2 (a, b)", args)?;
            let operands = marshal_operands(marshal, rt, pins, operands)?;
            let value = rt.arith(ArithOp::Mul, &operands[0], &operands[1]);
            release_transients(pins, &operands);
            let result = marshal.guest_to_host(rt, pins, &value?)?;
            Ok(Some(result))
        }
        Opcode::Compare => {
            let [name, ..] = expect_args::<3>(op, "3 (operator, a, b)", args)?;
            let name = text_operand(name, "comparison operator name")?;
            let compare = CompareOp::parse(name).ok_or_else(|| BridgeError::TypeMismatch {
                expected: "one of eq, ne, lt, gt, le, ge",
                actual: format!("'{name}'"),
            })?;
            let operands = marshal_operands(marshal, rt, pins, &args[1..])?;
            let value = rt.compare(compare, &operands[0], &operands[1]);
            release_transients(pins, &operands);
            let result = marshal.guest_to_host(rt, pins, &value?)?;
            Ok(Some(result))
        }
    }
}

/// Marshal a run of operands for one operation. When a later operand fails,
/// the pins already created for earlier ones are released before the error
/// propagates, so an aborted operation leaves the pin table unchanged.
fn marshal_operands(
    marshal: &mut Marshaller,
    rt: &mut GuestRuntime,
    pins: &mut PinTable,
    operands: &[HostValue],
) -> BridgeResult<Vec<GuestValue>> {
    let mut converted = Vec::with_capacity(operands.len());
    for operand in operands {
        match marshal.host_to_guest_boxing(rt, pins, operand, true) {
            Ok(value) => converted.push(value),
            Err(err) => {
                release_transients(pins, &converted);
                return Err(err.into());
            }
        }
    }
    Ok(converted)
}

fn expect_args<'a, const N: usize>(
    op: Opcode,
    expected: &'static str,
    args: &'a [HostValue],
) -> BridgeResult<&'a [HostValue; N]> {
    args.try_into().map_err(|_| BridgeError::ArgumentCount {
        op: op.name(),
        expected,
        got: args.len(),
    })
}

fn text_operand<'a>(value: &'a HostValue, expected: &'static str) -> BridgeResult<&'a str> {
    value
        .as_text()
        .map(|s| s.as_str())
        .ok_or_else(|| BridgeError::TypeMismatch {
            expected,
            actual: value.class_name().to_string(),
        })
}

/// Drop the pin behind an operand that was boxed only for the duration of
/// one operation. Converted (non-box) operands are untouched. Arguments
/// passed into a guest call are deliberately not treated as transient: the
/// callee may keep them, so their pins live until an explicit release or
/// session teardown.
fn release_transient(pins: &mut PinTable, operand: &GuestValue) {
    if marshal::is_host_box(operand) {
        let _ = marshal::release_host_box(pins, operand);
    }
}

fn release_transients(pins: &mut PinTable, operands: &[GuestValue]) {
    for operand in operands {
        release_transient(pins, operand);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(s: &str) -> HostValue {
        HostValue::Text(s.into())
    }

    #[test]
    fn test_lazy_start_on_first_dispatch() {
        let mut session = Session::new();
        assert!(!session.is_started());

        let out = session.dispatch(Opcode::Eval, &[text("1 + 1")]).unwrap();
        assert!(session.is_started());
        assert_eq!(out, Some(HostValue::Int32(2)));
    }

    #[test]
    fn test_unknown_opcode() {
        let mut session = Session::new();
        assert!(matches!(
            session.dispatch_code(200, &[]),
            Err(BridgeError::UnknownOpcode { code: 200 })
        ));
    }

    #[test]
    fn test_argument_count_checked_per_opcode() {
        let mut session = Session::new();
        assert!(matches!(
            session.dispatch(Opcode::Eval, &[]),
            Err(BridgeError::ArgumentCount { op: "eval", .. })
        ));
        assert!(matches!(
            session.dispatch(Opcode::Put, &[text("only_name")]),
            Err(BridgeError::ArgumentCount { op: "put", .. })
        ));
        assert!(matches!(
            session.dispatch(Opcode::Call, &[]),
            Err(BridgeError::ArgumentCount { op: "call", .. })
        ));
    }

    #[test]
    fn test_put_get_round_trip_in_issue_order() {
        let mut session = Session::new();
        session
            .dispatch(Opcode::Put, &[text("x"), HostValue::Int32(5)])
            .unwrap();
        session.dispatch(Opcode::Eval, &[text("x = x * 3")]).unwrap();

        let out = session.dispatch(Opcode::Get, &[text("x")]).unwrap();
        assert_eq!(out, Some(HostValue::Int32(15)));
    }

    #[test]
    fn test_get_missing_global() {
        let mut session = Session::new();
        assert!(matches!(
            session.dispatch(Opcode::Get, &[text("missing")]),
            Err(BridgeError::NotFound { .. })
        ));
    }

    #[test]
    fn test_session_survives_failed_operation() {
        let mut session = Session::new();
        assert!(session.dispatch(Opcode::Eval, &[text("nope")]).is_err());

        // global state remains valid; later operations still run
        let out = session.dispatch(Opcode::Eval, &[text("2 * 2")]).unwrap();
        assert_eq!(out, Some(HostValue::Int32(4)));
    }

    #[test]
    fn test_sessions_are_independent() {
        let mut a = Session::new();
        let mut b = Session::new();
        a.dispatch(Opcode::Put, &[text("x"), HostValue::Int32(1)])
            .unwrap();

        assert!(matches!(
            b.dispatch(Opcode::Get, &[text("x")]),
            Err(BridgeError::NotFound { .. })
        ));
    }

    #[test]
    fn test_shutdown_discards_state() {
        let mut session = Session::new();
        session
            .dispatch(Opcode::Put, &[text("x"), HostValue::Int32(1)])
            .unwrap();
        session.shutdown();
        assert!(!session.is_started());

        assert!(matches!(
            session.dispatch(Opcode::Get, &[text("x")]),
            Err(BridgeError::NotFound { .. })
        ));
    }
}
