//! The closed catalog of IR operations.
//!
//! Every operation is a variant of [`Operation`] carrying only its own
//! immutable parameters. Arity, attributes and context rules are derived
//! from the variant by [`Operation::descriptor`] and cached on the
//! instruction that holds it.

use crate::context::{Context, ContextMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Operation flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Attributes(u16);

impl Attributes {
    pub const NONE: Attributes = Attributes(0);
    /// No observable side effect; may be duplicated or reordered
    pub const PURE: Attributes = Attributes(1 << 0);
    /// Has parameters that the operation mutator may change
    pub const MUTABLE: Attributes = Attributes(1 << 1);
    pub const BLOCK_START: Attributes = Attributes(1 << 2);
    pub const BLOCK_END: Attributes = Attributes(1 << 3);
    /// Unconditional control transfer
    pub const JUMP: Attributes = Attributes(1 << 4);
    pub const CALL: Attributes = Attributes(1 << 5);
    pub const LOOP: Attributes = Attributes(1 << 6);
    /// Trailing inputs form a variable-length group
    pub const VARIADIC: Attributes = Attributes(1 << 7);
    /// Used by the fuzzer itself; stripped from stored programs
    pub const INTERNAL: Attributes = Attributes(1 << 8);

    pub const fn union(self, other: Attributes) -> Attributes {
        Attributes(self.0 | other.0)
    }

    pub fn contains(&self, other: Attributes) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Attributes {
    type Output = Attributes;

    fn bitor(self, rhs: Attributes) -> Attributes {
        self.union(rhs)
    }
}

/// Static shape of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub num_inputs: usize,
    pub num_outputs: usize,
    pub num_inner_outputs: usize,
    pub first_variadic_input: Option<usize>,
    pub attributes: Attributes,
    pub required_context: Context,
    pub context_opened: Context,
    pub context_mode: ContextMode,
}

impl Descriptor {
    fn new(num_inputs: usize, num_outputs: usize, attributes: Attributes) -> Self {
        Self {
            num_inputs,
            num_outputs,
            num_inner_outputs: 0,
            first_variadic_input: None,
            attributes,
            required_context: Context::SCRIPT,
            context_opened: Context::EMPTY,
            context_mode: ContextMode::Propagate,
        }
    }

    fn variadic_from(mut self, first: usize) -> Self {
        self.first_variadic_input = Some(first);
        self
    }

    fn inner(mut self, count: usize) -> Self {
        self.num_inner_outputs = count;
        self
    }

    fn requires(mut self, context: Context) -> Self {
        self.required_context = context;
        self
    }

    fn opens(mut self, context: Context, mode: ContextMode) -> Self {
        self.context_opened = context;
        self.context_mode = mode;
        self
    }

    pub fn num_inouts(&self) -> usize {
        self.num_inputs + self.num_outputs + self.num_inner_outputs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperator {
    Plus,
    Minus,
    BitwiseNot,
    LogicalNot,
}

impl UnaryOperator {
    pub const ALL: [UnaryOperator; 4] = [
        UnaryOperator::Plus,
        UnaryOperator::Minus,
        UnaryOperator::BitwiseNot,
        UnaryOperator::LogicalNot,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            UnaryOperator::Plus => "+",
            UnaryOperator::Minus => "-",
            UnaryOperator::BitwiseNot => "~",
            UnaryOperator::LogicalNot => "not ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    Xor,
    LShift,
    RShift,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOperator {
    pub const ALL: [BinaryOperator; 14] = [
        BinaryOperator::Add,
        BinaryOperator::Sub,
        BinaryOperator::Mul,
        BinaryOperator::Div,
        BinaryOperator::FloorDiv,
        BinaryOperator::Mod,
        BinaryOperator::Pow,
        BinaryOperator::BitAnd,
        BinaryOperator::BitOr,
        BinaryOperator::Xor,
        BinaryOperator::LShift,
        BinaryOperator::RShift,
        BinaryOperator::LogicalAnd,
        BinaryOperator::LogicalOr,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::FloorDiv => "//",
            BinaryOperator::Mod => "%",
            BinaryOperator::Pow => "**",
            BinaryOperator::BitAnd => "&",
            BinaryOperator::BitOr => "|",
            BinaryOperator::Xor => "^",
            BinaryOperator::LShift => "<<",
            BinaryOperator::RShift => ">>",
            BinaryOperator::LogicalAnd => "and",
            BinaryOperator::LogicalOr => "or",
        }
    }

    /// Logical operators have no augmented assignment form
    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Is,
    IsNot,
}

impl Comparator {
    pub const ALL: [Comparator; 8] = [
        Comparator::Equal,
        Comparator::NotEqual,
        Comparator::LessThan,
        Comparator::LessThanOrEqual,
        Comparator::GreaterThan,
        Comparator::GreaterThanOrEqual,
        Comparator::Is,
        Comparator::IsNot,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            Comparator::Equal => "==",
            Comparator::NotEqual => "!=",
            Comparator::LessThan => "<",
            Comparator::LessThanOrEqual => "<=",
            Comparator::GreaterThan => ">",
            Comparator::GreaterThanOrEqual => ">=",
            Comparator::Is => "is",
            Comparator::IsNot => "is not",
        }
    }
}

/// A single IR operation and its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Nop,

    // Values
    LoadInteger { value: i64 },
    LoadBigInt { value: i64 },
    LoadFloat {
        #[serde(with = "float_repr")]
        value: f64,
    },
    LoadString { value: String },
    LoadBoolean { value: bool },
    LoadUndefined,
    LoadNull,
    LoadRegExp { pattern: String },
    CreateArray { num_initial_values: usize },
    LoadBuiltin { name: String },

    // Member access
    GetProperty { name: String },
    SetProperty { name: String },
    GetElement { index: i64 },
    SetElement { index: i64 },

    // Functions and calls
    BeginPlainFunction { num_parameters: usize },
    EndPlainFunction,
    Return,
    CallFunction { num_arguments: usize },
    Construct { num_arguments: usize },
    CallMethod { name: String, num_arguments: usize },

    // Operators
    UnaryOperation { op: UnaryOperator },
    BinaryOperation { op: BinaryOperator },
    TernaryOperation,
    Compare { op: Comparator },
    Reassign,
    Update { op: BinaryOperator },
    Dup,
    /// Raw code with `%@` placeholders substituted by the inputs
    Eval { code: String, num_arguments: usize },

    // Control flow
    BeginIf { inverted: bool },
    BeginElse,
    EndIf,
    BeginWhileLoop { comparator: Comparator },
    EndWhileLoop,
    /// Inputs are start, end and step; the inner output is the counter
    BeginForLoop,
    EndForLoop,
    LoopBreak,
    LoopContinue,
    BeginTry,
    BeginCatch,
    BeginFinally,
    EndTryCatchFinally,
    ThrowException,

    // Switch
    BeginSwitch,
    BeginSwitchCase,
    BeginSwitchDefaultCase,
    EndSwitchCase,
    EndSwitch,

    // Classes
    BeginClassDefinition { has_superclass: bool },
    /// Inner outputs are the receiver followed by the parameters
    BeginClassMethod { name: String, num_parameters: usize },
    EndClassMethod,
    EndClassDefinition,

    // Fuzzer-internal
    Print,
}

impl Operation {
    pub fn descriptor(&self) -> Descriptor {
        use Attributes as A;
        use Operation::*;

        let pure_value = A::PURE | A::MUTABLE;
        let block_end = A::BLOCK_END;
        let block_middle = A::BLOCK_END | A::BLOCK_START;

        match self {
            Nop => Descriptor::new(0, 0, A::NONE),

            LoadInteger { .. }
            | LoadBigInt { .. }
            | LoadFloat { .. }
            | LoadString { .. }
            | LoadBoolean { .. }
            | LoadRegExp { .. } => Descriptor::new(0, 1, pure_value),
            LoadUndefined | LoadNull => Descriptor::new(0, 1, A::PURE),
            CreateArray { num_initial_values } => {
                Descriptor::new(*num_initial_values, 1, A::VARIADIC).variadic_from(0)
            }
            LoadBuiltin { .. } => Descriptor::new(0, 1, A::MUTABLE),

            GetProperty { .. } | GetElement { .. } => Descriptor::new(1, 1, A::MUTABLE),
            SetProperty { .. } | SetElement { .. } => Descriptor::new(2, 0, A::MUTABLE),

            BeginPlainFunction { num_parameters } => Descriptor::new(0, 1, A::BLOCK_START)
                .inner(*num_parameters)
                .opens(Context::SCRIPT | Context::SUBROUTINE, ContextMode::Isolate),
            EndPlainFunction => Descriptor::new(0, 0, block_end).requires(Context::EMPTY),
            Return => Descriptor::new(1, 0, A::JUMP)
                .requires(Context::SCRIPT | Context::SUBROUTINE),
            CallFunction { num_arguments } | Construct { num_arguments } => {
                Descriptor::new(num_arguments + 1, 1, A::VARIADIC | A::CALL).variadic_from(1)
            }
            CallMethod { num_arguments, .. } => {
                Descriptor::new(num_arguments + 1, 1, A::MUTABLE | A::VARIADIC | A::CALL)
                    .variadic_from(1)
            }

            UnaryOperation { .. } => Descriptor::new(1, 1, A::MUTABLE),
            BinaryOperation { .. } | Compare { .. } => Descriptor::new(2, 1, A::MUTABLE),
            TernaryOperation => Descriptor::new(3, 1, A::NONE),
            Reassign => Descriptor::new(2, 0, A::NONE),
            Update { .. } => Descriptor::new(2, 0, A::MUTABLE),
            Dup => Descriptor::new(1, 1, A::NONE),
            Eval { num_arguments, .. } => Descriptor::new(*num_arguments, 0, A::NONE),

            BeginIf { .. } => Descriptor::new(1, 0, A::BLOCK_START | A::MUTABLE)
                .opens(Context::EMPTY, ContextMode::Propagate),
            BeginElse => Descriptor::new(0, 0, block_middle)
                .requires(Context::EMPTY)
                .opens(Context::EMPTY, ContextMode::Propagate),
            EndIf => Descriptor::new(0, 0, block_end).requires(Context::EMPTY),
            BeginWhileLoop { .. } => {
                Descriptor::new(2, 0, A::BLOCK_START | A::LOOP | A::MUTABLE)
                    .opens(Context::LOOP, ContextMode::Propagate)
            }
            EndWhileLoop | EndForLoop => {
                Descriptor::new(0, 0, block_end | A::LOOP).requires(Context::EMPTY)
            }
            BeginForLoop => Descriptor::new(3, 0, A::BLOCK_START | A::LOOP)
                .inner(1)
                .opens(Context::LOOP, ContextMode::Propagate),
            LoopBreak | LoopContinue => {
                Descriptor::new(0, 0, A::JUMP).requires(Context::SCRIPT | Context::LOOP)
            }
            BeginTry => Descriptor::new(0, 0, A::BLOCK_START)
                .opens(Context::EMPTY, ContextMode::Propagate),
            BeginCatch => Descriptor::new(0, 0, block_middle)
                .inner(1)
                .requires(Context::EMPTY)
                .opens(Context::EMPTY, ContextMode::Propagate),
            BeginFinally => Descriptor::new(0, 0, block_middle)
                .requires(Context::EMPTY)
                .opens(Context::EMPTY, ContextMode::Propagate),
            EndTryCatchFinally => Descriptor::new(0, 0, block_end).requires(Context::EMPTY),
            ThrowException => Descriptor::new(1, 0, A::JUMP),

            BeginSwitch => Descriptor::new(1, 0, A::BLOCK_START)
                .opens(Context::SWITCH_BLOCK, ContextMode::Isolate),
            BeginSwitchCase => Descriptor::new(1, 0, A::BLOCK_START)
                .requires(Context::SWITCH_BLOCK)
                .opens(Context::SWITCH_CASE, ContextMode::Resume),
            BeginSwitchDefaultCase => Descriptor::new(0, 0, A::BLOCK_START)
                .requires(Context::SWITCH_BLOCK)
                .opens(Context::SWITCH_CASE, ContextMode::Resume),
            EndSwitchCase => Descriptor::new(0, 0, block_end).requires(Context::EMPTY),
            EndSwitch => Descriptor::new(0, 0, block_end).requires(Context::SWITCH_BLOCK),

            BeginClassDefinition { has_superclass } => {
                Descriptor::new(usize::from(*has_superclass), 1, A::BLOCK_START)
                    .opens(Context::CLASS_DEFINITION, ContextMode::Isolate)
            }
            BeginClassMethod { num_parameters, .. } => {
                Descriptor::new(0, 0, A::BLOCK_START | A::MUTABLE)
                    .inner(num_parameters + 1)
                    .requires(Context::CLASS_DEFINITION)
                    .opens(
                        Context::SCRIPT | Context::SUBROUTINE | Context::METHOD,
                        ContextMode::Isolate,
                    )
            }
            EndClassMethod => Descriptor::new(0, 0, block_end).requires(Context::EMPTY),
            EndClassDefinition => {
                Descriptor::new(0, 0, block_end).requires(Context::CLASS_DEFINITION)
            }

            Print => Descriptor::new(1, 0, A::INTERNAL),
        }
    }

    pub fn name(&self) -> &'static str {
        use Operation::*;
        match self {
            Nop => "Nop",
            LoadInteger { .. } => "LoadInteger",
            LoadBigInt { .. } => "LoadBigInt",
            LoadFloat { .. } => "LoadFloat",
            LoadString { .. } => "LoadString",
            LoadBoolean { .. } => "LoadBoolean",
            LoadUndefined => "LoadUndefined",
            LoadNull => "LoadNull",
            LoadRegExp { .. } => "LoadRegExp",
            CreateArray { .. } => "CreateArray",
            LoadBuiltin { .. } => "LoadBuiltin",
            GetProperty { .. } => "GetProperty",
            SetProperty { .. } => "SetProperty",
            GetElement { .. } => "GetElement",
            SetElement { .. } => "SetElement",
            BeginPlainFunction { .. } => "BeginPlainFunction",
            EndPlainFunction => "EndPlainFunction",
            Return => "Return",
            CallFunction { .. } => "CallFunction",
            Construct { .. } => "Construct",
            CallMethod { .. } => "CallMethod",
            UnaryOperation { .. } => "UnaryOperation",
            BinaryOperation { .. } => "BinaryOperation",
            TernaryOperation => "TernaryOperation",
            Compare { .. } => "Compare",
            Reassign => "Reassign",
            Update { .. } => "Update",
            Dup => "Dup",
            Eval { .. } => "Eval",
            BeginIf { .. } => "BeginIf",
            BeginElse => "BeginElse",
            EndIf => "EndIf",
            BeginWhileLoop { .. } => "BeginWhileLoop",
            EndWhileLoop => "EndWhileLoop",
            BeginForLoop => "BeginForLoop",
            EndForLoop => "EndForLoop",
            LoopBreak => "LoopBreak",
            LoopContinue => "LoopContinue",
            BeginTry => "BeginTry",
            BeginCatch => "BeginCatch",
            BeginFinally => "BeginFinally",
            EndTryCatchFinally => "EndTryCatchFinally",
            ThrowException => "ThrowException",
            BeginSwitch => "BeginSwitch",
            BeginSwitchCase => "BeginSwitchCase",
            BeginSwitchDefaultCase => "BeginSwitchDefaultCase",
            EndSwitchCase => "EndSwitchCase",
            EndSwitch => "EndSwitch",
            BeginClassDefinition { .. } => "BeginClassDefinition",
            BeginClassMethod { .. } => "BeginClassMethod",
            EndClassMethod => "EndClassMethod",
            EndClassDefinition => "EndClassDefinition",
            Print => "Print",
        }
    }

    /// Whether this block end (or intermediate block instruction) may close
    /// a block opened by `opener`.
    pub fn closes(&self, opener: &Operation) -> bool {
        use Operation::*;
        match self {
            EndPlainFunction => matches!(opener, BeginPlainFunction { .. }),
            BeginElse => matches!(opener, BeginIf { .. }),
            EndIf => matches!(opener, BeginIf { .. } | BeginElse),
            EndWhileLoop => matches!(opener, BeginWhileLoop { .. }),
            EndForLoop => matches!(opener, BeginForLoop),
            BeginCatch => matches!(opener, BeginTry),
            BeginFinally => matches!(opener, BeginTry | BeginCatch),
            EndTryCatchFinally => matches!(opener, BeginCatch | BeginFinally),
            EndSwitchCase => matches!(opener, BeginSwitchCase | BeginSwitchDefaultCase),
            EndSwitch => matches!(opener, BeginSwitch),
            EndClassMethod => matches!(opener, BeginClassMethod { .. }),
            EndClassDefinition => matches!(opener, BeginClassDefinition { .. }),
            _ => false,
        }
    }

    pub fn is_try_start(&self) -> bool {
        matches!(self, Operation::BeginTry)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Operation::*;
        match self {
            LoadInteger { value } | LoadBigInt { value } => write!(f, "{} '{}'", self.name(), value),
            LoadFloat { value } => write!(f, "{} '{}'", self.name(), value),
            LoadString { value } => write!(f, "{} '{}'", self.name(), value),
            LoadBoolean { value } => write!(f, "{} '{}'", self.name(), value),
            LoadRegExp { pattern } => write!(f, "{} '{}'", self.name(), pattern),
            LoadBuiltin { name }
            | GetProperty { name }
            | SetProperty { name }
            | CallMethod { name, .. }
            | BeginClassMethod { name, .. } => write!(f, "{} '{}'", self.name(), name),
            GetElement { index } | SetElement { index } => write!(f, "{} '{}'", self.name(), index),
            UnaryOperation { op } => write!(f, "{} '{}'", self.name(), op.token().trim()),
            BinaryOperation { op } | Update { op } => write!(f, "{} '{}'", self.name(), op.token()),
            Compare { op } | BeginWhileLoop { comparator: op } => {
                write!(f, "{} '{}'", self.name(), op.token())
            }
            BeginIf { inverted: true } => write!(f, "{} (inverted)", self.name()),
            Eval { code, .. } => write!(f, "{} '{}'", self.name(), code),
            _ => f.write_str(self.name()),
        }
    }
}

/// Floats go through JSON as numbers when finite and as named strings
/// otherwise; binary formats keep the raw value.
mod float_repr {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Named(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if !serializer.is_human_readable() || value.is_finite() {
            return value.serialize(serializer);
        }
        let name = if value.is_nan() {
            "nan"
        } else if value.is_sign_positive() {
            "inf"
        } else {
            "-inf"
        };
        serializer.serialize_str(name)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        if !deserializer.is_human_readable() {
            return f64::deserialize(deserializer);
        }
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Named(name) => match name.as_str() {
                "nan" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("invalid float '{}'", other))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_arity() {
        let desc = Operation::CallMethod {
            name: "append".to_string(),
            num_arguments: 2,
        }
        .descriptor();
        assert_eq!(desc.num_inputs, 3);
        assert_eq!(desc.num_outputs, 1);
        assert_eq!(desc.first_variadic_input, Some(1));
        assert!(desc.attributes.contains(Attributes::CALL | Attributes::VARIADIC));
    }

    #[test]
    fn test_block_matching() {
        assert!(Operation::BeginCatch.closes(&Operation::BeginTry));
        assert!(Operation::BeginFinally.closes(&Operation::BeginCatch));
        assert!(Operation::EndTryCatchFinally.closes(&Operation::BeginFinally));
        assert!(!Operation::EndTryCatchFinally.closes(&Operation::BeginTry));
        assert!(Operation::EndIf.closes(&Operation::BeginElse));
        assert!(!Operation::EndWhileLoop.closes(&Operation::BeginForLoop));
        assert!(!Operation::LoadNull.closes(&Operation::BeginTry));
    }

    #[test]
    fn test_context_rules() {
        let ret = Operation::Return.descriptor();
        assert!(ret.required_context.contains(Context::SUBROUTINE));

        let case = Operation::BeginSwitchCase.descriptor();
        assert_eq!(case.context_mode, ContextMode::Resume);
        assert_eq!(case.required_context, Context::SWITCH_BLOCK);

        let method = Operation::BeginClassMethod {
            name: "m".to_string(),
            num_parameters: 2,
        }
        .descriptor();
        assert_eq!(method.num_inner_outputs, 3);
        assert!(method.context_opened.contains(Context::METHOD));
    }

    #[test]
    fn test_float_json_roundtrip_keeps_specials() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.5] {
            let op = Operation::LoadFloat { value };
            let json = serde_json::to_string(&op).unwrap();
            let back: Operation = serde_json::from_str(&json).unwrap();
            match back {
                Operation::LoadFloat { value: v } if value.is_nan() => assert!(v.is_nan()),
                Operation::LoadFloat { value: v } => assert_eq!(v, value),
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
