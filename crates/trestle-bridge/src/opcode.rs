//! The bridge's fixed operation vocabulary.

use std::fmt;

/// Operation codes accepted by the dispatcher.
///
/// The numeric labels are part of the host-side calling convention and are
/// stable; the host encodes the opcode as the first scalar operand of every
/// bridge call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Evaluate guest source text; result converts back or boxes.
    Eval = 0,
    /// Import a module, returning a boxed reference to it.
    Import = 1,
    /// Release the reference a box owns.
    Release = 2,
    /// The guest's textual rendering of a box or convertible value.
    Str = 3,
    /// Bind a global name in the guest namespace.
    Put = 4,
    /// Look up a global name in the guest namespace.
    Get = 5,
    /// Attribute access on a boxed object or module.
    GetAttr = 6,
    /// Call a boxed callable with converted arguments.
    Call = 7,
    /// Item access: list index, map key, or string index.
    GetItem = 8,
    /// Multiply two values with the guest's coercion rules.
    Multiply = 9,
    /// Compare two values; the operator name is the first operand.
    Compare = 10,
}

impl Opcode {
    /// Decode a numeric operation label.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Opcode::Eval),
            1 => Some(Opcode::Import),
            2 => Some(Opcode::Release),
            3 => Some(Opcode::Str),
            4 => Some(Opcode::Put),
            5 => Some(Opcode::Get),
            6 => Some(Opcode::GetAttr),
            7 => Some(Opcode::Call),
            8 => Some(Opcode::GetItem),
            9 => Some(Opcode::Multiply),
            10 => Some(Opcode::Compare),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Eval => "eval",
            Opcode::Import => "import",
            Opcode::Release => "release",
            Opcode::Str => "str",
            Opcode::Put => "put",
            Opcode::Get => "get",
            Opcode::GetAttr => "getattr",
            Opcode::Call => "call",
            Opcode::GetItem => "getitem",
            Opcode::Multiply => "multiply",
            Opcode::Compare => "compare",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
