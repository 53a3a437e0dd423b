//! A single IR instruction.

use crate::operation::{Attributes, Descriptor, Operation};
use crate::variable::Variable;
use refuzz_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One program line: an operation and its variables.
///
/// Inputs, outputs and inner outputs share one vector, in that order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "InstructionRecord", into = "InstructionRecord")]
pub struct Instruction {
    op: Operation,
    desc: Descriptor,
    inouts: Vec<Variable>,
    index: usize,
}

impl Instruction {
    /// Create an instruction. Panics if the number of variables does not
    /// match the operation's arity.
    pub fn new(op: Operation, inouts: Vec<Variable>) -> Self {
        let desc = op.descriptor();
        assert_eq!(
            inouts.len(),
            desc.num_inouts(),
            "{} expects {} variables, got {}",
            op.name(),
            desc.num_inouts(),
            inouts.len()
        );
        Self {
            op,
            desc,
            inouts,
            index: 0,
        }
    }

    /// Fallible counterpart of [`Instruction::new`] for untrusted input
    pub fn try_new(op: Operation, inouts: Vec<Variable>) -> Result<Self> {
        let desc = op.descriptor();
        if inouts.len() != desc.num_inouts() {
            return Err(Error::Validation(format!(
                "{} expects {} variables, got {}",
                op.name(),
                desc.num_inouts(),
                inouts.len()
            )));
        }
        Ok(Self {
            op,
            desc,
            inouts,
            index: 0,
        })
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn op(&self) -> &Operation {
        &self.op
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.desc
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn inputs(&self) -> &[Variable] {
        &self.inouts[..self.desc.num_inputs]
    }

    pub fn input(&self, i: usize) -> Variable {
        self.inputs()[i]
    }

    /// Inputs belonging to the trailing variable-length group
    pub fn variadic_inputs(&self) -> &[Variable] {
        match self.desc.first_variadic_input {
            Some(first) => &self.inputs()[first..],
            None => &[],
        }
    }

    pub fn outputs(&self) -> &[Variable] {
        let start = self.desc.num_inputs;
        &self.inouts[start..start + self.desc.num_outputs]
    }

    pub fn inner_outputs(&self) -> &[Variable] {
        &self.inouts[self.desc.num_inputs + self.desc.num_outputs..]
    }

    /// Outputs followed by inner outputs
    pub fn all_outputs(&self) -> &[Variable] {
        &self.inouts[self.desc.num_inputs..]
    }

    pub fn inouts(&self) -> &[Variable] {
        &self.inouts
    }

    pub fn has_one_output(&self) -> bool {
        self.desc.num_outputs == 1
    }

    /// The single output. Panics if the instruction has a different number
    /// of outputs.
    pub fn output(&self) -> Variable {
        assert!(self.has_one_output(), "{} has no single output", self.op.name());
        self.outputs()[0]
    }

    pub fn has(&self, attributes: Attributes) -> bool {
        self.desc.attributes.contains(attributes)
    }

    pub fn is_block_start(&self) -> bool {
        self.has(Attributes::BLOCK_START)
    }

    pub fn is_block_end(&self) -> bool {
        self.has(Attributes::BLOCK_END)
    }

    pub fn is_block(&self) -> bool {
        self.is_block_start() || self.is_block_end()
    }

    pub fn is_jump(&self) -> bool {
        self.has(Attributes::JUMP)
    }

    pub fn is_pure(&self) -> bool {
        self.has(Attributes::PURE)
    }

    pub fn is_internal(&self) -> bool {
        self.has(Attributes::INTERNAL)
    }

    pub fn is_mutable(&self) -> bool {
        self.has(Attributes::MUTABLE)
    }

    /// Neither control flow nor fuzzer-internal
    pub fn is_simple(&self) -> bool {
        !self.is_block() && !self.is_jump() && !self.is_internal()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |vars: &[Variable]| {
            vars.iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        if !self.outputs().is_empty() {
            write!(f, "{} <- ", join(self.outputs()))?;
        }
        write!(f, "{}", self.op)?;
        if !self.inputs().is_empty() {
            write!(f, " {}", join(self.inputs()))?;
        }
        if !self.inner_outputs().is_empty() {
            write!(f, " -> {}", join(self.inner_outputs()))?;
        }
        Ok(())
    }
}

/// Serialized form of an instruction. The descriptor is recomputed on load.
#[derive(Serialize, Deserialize)]
struct InstructionRecord {
    op: Operation,
    inouts: Vec<Variable>,
    index: usize,
}

impl TryFrom<InstructionRecord> for Instruction {
    type Error = Error;

    fn try_from(record: InstructionRecord) -> Result<Self> {
        Ok(Instruction::try_new(record.op, record.inouts)?.with_index(record.index))
    }
}

impl From<Instruction> for InstructionRecord {
    fn from(instr: Instruction) -> Self {
        Self {
            op: instr.op,
            inouts: instr.inouts,
            index: instr.index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inout_slices() {
        let instr = Instruction::new(
            Operation::CallMethod {
                name: "pop".to_string(),
                num_arguments: 1,
            },
            vec![Variable(0), Variable(1), Variable(2)],
        );
        assert_eq!(instr.inputs(), &[Variable(0), Variable(1)]);
        assert_eq!(instr.variadic_inputs(), &[Variable(1)]);
        assert_eq!(instr.output(), Variable(2));
        assert!(instr.inner_outputs().is_empty());
        assert!(instr.is_simple());
    }

    #[test]
    fn test_inner_outputs() {
        let instr = Instruction::new(
            Operation::BeginPlainFunction { num_parameters: 2 },
            vec![Variable(4), Variable(5), Variable(6)],
        );
        assert_eq!(instr.output(), Variable(4));
        assert_eq!(instr.inner_outputs(), &[Variable(5), Variable(6)]);
        assert!(!instr.is_simple());
    }

    #[test]
    #[should_panic(expected = "expects 1 variables")]
    fn test_arity_mismatch_panics() {
        Instruction::new(Operation::LoadNull, vec![]);
    }

    #[test]
    fn test_deserialize_rejects_bad_arity() {
        let json = r#"{"op":"LoadNull","inouts":[],"index":0}"#;
        assert!(serde_json::from_str::<Instruction>(json).is_err());
    }

    #[test]
    fn test_display() {
        let instr = Instruction::new(Operation::LoadInteger { value: 5 }, vec![Variable(0)]);
        assert_eq!(instr.to_string(), "v0 <- LoadInteger '5'");
    }
}
