//! Incremental, invariant-preserving program construction.

use crate::code::Code;
use crate::context::{Context, ContextMode};
use crate::instruction::Instruction;
use crate::operation::{BinaryOperator, Comparator, Operation, UnaryOperator};
use crate::program::{Comments, Program};
use crate::variable::Variable;
use rand::seq::SliceRandom;
use rand::Rng;
use refuzz_core::ProgramId;
use std::collections::{BTreeSet, HashMap};

/// Builds programs one instruction at a time.
///
/// The builder tracks visible variables, the context stack and open blocks,
/// and panics when asked to emit an instruction that would break the IR's
/// structural invariants. Misuse is a bug in the caller, not a runtime
/// condition.
#[derive(Debug)]
pub struct ProgramBuilder {
    code: Code,
    comments: Comments,
    contributors: BTreeSet<String>,
    parent: Option<ProgramId>,
    next_variable: u32,
    scopes: Vec<Vec<Variable>>,
    contexts: Vec<Context>,
    open_blocks: Vec<usize>,
    /// Index of the instruction declaring each variable
    definitions: HashMap<Variable, usize>,
    /// Variables of the program being adopted mapped to ours
    adoption: HashMap<Variable, Variable>,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self {
            code: Code::new(),
            comments: Comments::default(),
            contributors: BTreeSet::new(),
            parent: None,
            next_variable: 0,
            scopes: vec![Vec::new()],
            contexts: vec![Context::SCRIPT],
            open_blocks: Vec::new(),
            definitions: HashMap::new(),
            adoption: HashMap::new(),
        }
    }

    /// A builder for a program derived from `parent`
    pub fn derived_from(parent: &Program) -> Self {
        let mut builder = Self::new();
        builder.parent = Some(parent.id);
        builder
    }

    pub fn finalize(self) -> Program {
        assert!(
            self.open_blocks.is_empty(),
            "finalize called with {} open blocks",
            self.open_blocks.len()
        );
        debug_assert!(self.code.check().is_ok());
        let mut program = Program::new(self.code);
        program.comments = self.comments;
        program.contributors = self.contributors;
        program.parent = self.parent;
        program
    }

    pub fn context(&self) -> Context {
        self.contexts.last().copied().unwrap_or(Context::EMPTY)
    }

    /// Index the next emitted instruction will get
    pub fn next_index(&self) -> usize {
        self.code.len()
    }

    pub fn code(&self) -> &Code {
        &self.code
    }

    pub fn comments_mut(&mut self) -> &mut Comments {
        &mut self.comments
    }

    pub fn add_contributor(&mut self, name: &str) {
        self.contributors.insert(name.to_string());
    }

    pub fn set_contributors(&mut self, contributors: BTreeSet<String>) {
        self.contributors = contributors;
    }

    pub fn is_visible(&self, v: Variable) -> bool {
        self.scopes.iter().any(|scope| scope.contains(&v))
    }

    pub fn visible_variables(&self) -> Vec<Variable> {
        self.scopes.iter().flatten().copied().collect()
    }

    pub fn random_variable<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Variable> {
        self.visible_variables().choose(rng).copied()
    }

    /// The instruction that declared `v`
    pub fn definition(&self, v: Variable) -> Option<&Instruction> {
        self.definitions.get(&v).map(|&index| &self.code[index])
    }

    /// Emit `op` with the given inputs and return its outputs followed by
    /// its inner outputs.
    pub fn emit(&mut self, op: Operation, inputs: &[Variable]) -> Vec<Variable> {
        let desc = op.descriptor();
        assert_eq!(
            inputs.len(),
            desc.num_inputs,
            "{} takes {} inputs",
            op.name(),
            desc.num_inputs
        );
        for &input in inputs {
            assert!(self.is_visible(input), "{} uses invisible {}", op.name(), input);
        }
        let current = self.context();
        assert!(
            current.contains(desc.required_context),
            "{} requires {} but the context is {}",
            op.name(),
            desc.required_context,
            current
        );

        let is_end = desc.attributes.contains(crate::operation::Attributes::BLOCK_END);
        let is_start = desc.attributes.contains(crate::operation::Attributes::BLOCK_START);
        if is_end {
            let opener = self
                .open_blocks
                .pop()
                .unwrap_or_else(|| panic!("{} without an open block", op.name()));
            assert!(
                op.closes(self.code[opener].op()),
                "{} cannot close {}",
                op.name(),
                self.code[opener].op().name()
            );
            self.contexts.pop();
            self.scopes.pop();
        }

        let index = self.code.len();
        let mut inouts = inputs.to_vec();
        let mut produced = Vec::with_capacity(desc.num_outputs + desc.num_inner_outputs);
        for _ in 0..desc.num_outputs {
            let v = self.allocate(index);
            if let Some(scope) = self.scopes.last_mut() {
                scope.push(v);
            }
            produced.push(v);
        }

        if is_start {
            let enclosing = self.context();
            let opened = match desc.context_mode {
                ContextMode::Isolate => desc.context_opened,
                ContextMode::Propagate => enclosing | desc.context_opened,
                ContextMode::Resume => {
                    let outer = self
                        .contexts
                        .len()
                        .checked_sub(2)
                        .map(|i| self.contexts[i])
                        .unwrap_or(Context::SCRIPT);
                    outer | desc.context_opened
                }
            };
            self.contexts.push(opened);
            self.open_blocks.push(index);
            let mut scope = Vec::with_capacity(desc.num_inner_outputs);
            for _ in 0..desc.num_inner_outputs {
                let v = self.allocate(index);
                scope.push(v);
                produced.push(v);
            }
            self.scopes.push(scope);
        }

        inouts.extend_from_slice(&produced);
        self.code.append(Instruction::new(op, inouts));
        produced
    }

    fn allocate(&mut self, index: usize) -> Variable {
        let v = Variable(self.next_variable);
        self.next_variable += 1;
        self.definitions.insert(v, index);
        v
    }

    fn emit_single(&mut self, op: Operation, inputs: &[Variable]) -> Variable {
        self.emit(op, inputs)[0]
    }

    //
    // Adoption of instructions from other programs
    //

    /// Start adopting from a new program; forgets previous mappings
    pub fn begin_adoption(&mut self) {
        self.adoption.clear();
    }

    /// Our variable for a variable of the program being adopted
    pub fn adopted(&self, v: Variable) -> Variable {
        *self
            .adoption
            .get(&v)
            .unwrap_or_else(|| panic!("{} has not been adopted", v))
    }

    /// Copy an instruction of another program, renaming its variables
    pub fn adopt(&mut self, instr: &Instruction) -> Vec<Variable> {
        self.adopt_as(instr, instr.op().clone())
    }

    /// Copy an instruction of another program with its operation replaced
    /// by `op`, which must have the same shape
    pub fn adopt_as(&mut self, instr: &Instruction, op: Operation) -> Vec<Variable> {
        assert_eq!(
            op.descriptor().num_inouts(),
            instr.descriptor().num_inouts(),
            "{} cannot replace {}",
            op.name(),
            instr.op().name()
        );
        let inputs: Vec<_> = instr.inputs().iter().map(|&v| self.adopted(v)).collect();
        let produced = self.emit(op, &inputs);
        for (&old, &new) in instr.all_outputs().iter().zip(&produced) {
            self.adoption.insert(old, new);
        }
        produced
    }

    /// Append every instruction of `program`
    pub fn append_program(&mut self, program: &Program) {
        self.begin_adoption();
        for instr in &program.code {
            self.adopt(instr);
        }
    }

    //
    // Values
    //

    pub fn load_int(&mut self, value: i64) -> Variable {
        self.emit_single(Operation::LoadInteger { value }, &[])
    }

    pub fn load_bigint(&mut self, value: i64) -> Variable {
        self.emit_single(Operation::LoadBigInt { value }, &[])
    }

    pub fn load_float(&mut self, value: f64) -> Variable {
        self.emit_single(Operation::LoadFloat { value }, &[])
    }

    pub fn load_string(&mut self, value: &str) -> Variable {
        self.emit_single(
            Operation::LoadString {
                value: value.to_string(),
            },
            &[],
        )
    }

    pub fn load_bool(&mut self, value: bool) -> Variable {
        self.emit_single(Operation::LoadBoolean { value }, &[])
    }

    pub fn load_undefined(&mut self) -> Variable {
        self.emit_single(Operation::LoadUndefined, &[])
    }

    pub fn load_null(&mut self) -> Variable {
        self.emit_single(Operation::LoadNull, &[])
    }

    pub fn load_builtin(&mut self, name: &str) -> Variable {
        self.emit_single(
            Operation::LoadBuiltin {
                name: name.to_string(),
            },
            &[],
        )
    }

    /// A visible variable holding the builtin `name`, loading it if needed
    pub fn reuse_or_load_builtin(&mut self, name: &str) -> Variable {
        let existing = self.visible_variables().into_iter().find(|&v| {
            matches!(
                self.definition(v).map(Instruction::op),
                Some(Operation::LoadBuiltin { name: n }) if n == name
            )
        });
        existing.unwrap_or_else(|| self.load_builtin(name))
    }

    pub fn create_array(&mut self, values: &[Variable]) -> Variable {
        self.emit_single(
            Operation::CreateArray {
                num_initial_values: values.len(),
            },
            values,
        )
    }

    //
    // Member access and calls
    //

    pub fn get_property(&mut self, name: &str, object: Variable) -> Variable {
        self.emit_single(
            Operation::GetProperty {
                name: name.to_string(),
            },
            &[object],
        )
    }

    pub fn set_property(&mut self, name: &str, object: Variable, value: Variable) {
        self.emit(
            Operation::SetProperty {
                name: name.to_string(),
            },
            &[object, value],
        );
    }

    pub fn get_element(&mut self, index: i64, object: Variable) -> Variable {
        self.emit_single(Operation::GetElement { index }, &[object])
    }

    pub fn set_element(&mut self, index: i64, object: Variable, value: Variable) {
        self.emit(Operation::SetElement { index }, &[object, value]);
    }

    pub fn call_function(&mut self, function: Variable, args: &[Variable]) -> Variable {
        let mut inputs = vec![function];
        inputs.extend_from_slice(args);
        self.emit_single(
            Operation::CallFunction {
                num_arguments: args.len(),
            },
            &inputs,
        )
    }

    pub fn construct(&mut self, constructor: Variable, args: &[Variable]) -> Variable {
        let mut inputs = vec![constructor];
        inputs.extend_from_slice(args);
        self.emit_single(
            Operation::Construct {
                num_arguments: args.len(),
            },
            &inputs,
        )
    }

    pub fn call_method(&mut self, name: &str, object: Variable, args: &[Variable]) -> Variable {
        let mut inputs = vec![object];
        inputs.extend_from_slice(args);
        self.emit_single(
            Operation::CallMethod {
                name: name.to_string(),
                num_arguments: args.len(),
            },
            &inputs,
        )
    }

    //
    // Operators
    //

    pub fn unary(&mut self, op: UnaryOperator, input: Variable) -> Variable {
        self.emit_single(Operation::UnaryOperation { op }, &[input])
    }

    pub fn binary(&mut self, lhs: Variable, rhs: Variable, op: BinaryOperator) -> Variable {
        self.emit_single(Operation::BinaryOperation { op }, &[lhs, rhs])
    }

    pub fn ternary(&mut self, condition: Variable, then: Variable, otherwise: Variable) -> Variable {
        self.emit_single(Operation::TernaryOperation, &[condition, then, otherwise])
    }

    pub fn compare(&mut self, lhs: Variable, rhs: Variable, op: Comparator) -> Variable {
        self.emit_single(Operation::Compare { op }, &[lhs, rhs])
    }

    pub fn reassign(&mut self, target: Variable, value: Variable) {
        self.emit(Operation::Reassign, &[target, value]);
    }

    pub fn update(&mut self, target: Variable, value: Variable, op: BinaryOperator) {
        self.emit(Operation::Update { op }, &[target, value]);
    }

    pub fn dup(&mut self, value: Variable) -> Variable {
        self.emit_single(Operation::Dup, &[value])
    }

    pub fn eval(&mut self, code: &str, args: &[Variable]) {
        self.emit(
            Operation::Eval {
                code: code.to_string(),
                num_arguments: args.len(),
            },
            args,
        );
    }

    pub fn print(&mut self, value: Variable) {
        self.emit(Operation::Print, &[value]);
    }

    pub fn throw_exception(&mut self, value: Variable) {
        self.emit(Operation::ThrowException, &[value]);
    }

    pub fn do_return(&mut self, value: Variable) {
        self.emit(Operation::Return, &[value]);
    }

    pub fn loop_break(&mut self) {
        self.emit(Operation::LoopBreak, &[]);
    }

    pub fn loop_continue(&mut self) {
        self.emit(Operation::LoopContinue, &[]);
    }

    //
    // Blocks
    //

    /// Define a function; `body` receives the parameters
    pub fn build_plain_function(
        &mut self,
        num_parameters: usize,
        body: impl FnOnce(&mut Self, &[Variable]),
    ) -> Variable {
        let produced = self.emit(Operation::BeginPlainFunction { num_parameters }, &[]);
        body(self, &produced[1..]);
        self.emit(Operation::EndPlainFunction, &[]);
        produced[0]
    }

    pub fn build_if_else(
        &mut self,
        condition: Variable,
        then_body: impl FnOnce(&mut Self),
        else_body: impl FnOnce(&mut Self),
    ) {
        self.emit(Operation::BeginIf { inverted: false }, &[condition]);
        then_body(self);
        self.emit(Operation::BeginElse, &[]);
        else_body(self);
        self.emit(Operation::EndIf, &[]);
    }

    pub fn build_if(&mut self, condition: Variable, body: impl FnOnce(&mut Self)) {
        self.emit(Operation::BeginIf { inverted: false }, &[condition]);
        body(self);
        self.emit(Operation::EndIf, &[]);
    }

    pub fn build_while_loop(
        &mut self,
        lhs: Variable,
        comparator: Comparator,
        rhs: Variable,
        body: impl FnOnce(&mut Self),
    ) {
        self.emit(Operation::BeginWhileLoop { comparator }, &[lhs, rhs]);
        body(self);
        self.emit(Operation::EndWhileLoop, &[]);
    }

    /// `for counter in range(start, end, step)`
    pub fn build_for_loop(
        &mut self,
        start: Variable,
        end: Variable,
        step: Variable,
        body: impl FnOnce(&mut Self, Variable),
    ) {
        let produced = self.emit(Operation::BeginForLoop, &[start, end, step]);
        body(self, produced[0]);
        self.emit(Operation::EndForLoop, &[]);
    }

    /// Try block followed by a catch block receiving the exception
    pub fn build_try_catch(
        &mut self,
        try_body: impl FnOnce(&mut Self),
        catch_body: impl FnOnce(&mut Self, Variable),
    ) {
        self.emit(Operation::BeginTry, &[]);
        try_body(self);
        let produced = self.emit(Operation::BeginCatch, &[]);
        catch_body(self, produced[0]);
        self.emit(Operation::EndTryCatchFinally, &[]);
    }

    pub fn build_try_finally(
        &mut self,
        try_body: impl FnOnce(&mut Self),
        finally_body: impl FnOnce(&mut Self),
    ) {
        self.emit(Operation::BeginTry, &[]);
        try_body(self);
        self.emit(Operation::BeginFinally, &[]);
        finally_body(self);
        self.emit(Operation::EndTryCatchFinally, &[]);
    }

    /// Switch on `subject`. Each case is a value and a body; the default
    /// body, if any, comes last.
    pub fn build_switch(
        &mut self,
        subject: Variable,
        cases: Vec<(Variable, Box<dyn FnOnce(&mut Self) + '_>)>,
        default: Option<Box<dyn FnOnce(&mut Self) + '_>>,
    ) {
        self.emit(Operation::BeginSwitch, &[subject]);
        for (value, body) in cases {
            self.emit(Operation::BeginSwitchCase, &[value]);
            body(self);
            self.emit(Operation::EndSwitchCase, &[]);
        }
        if let Some(body) = default {
            self.emit(Operation::BeginSwitchDefaultCase, &[]);
            body(self);
            self.emit(Operation::EndSwitchCase, &[]);
        }
        self.emit(Operation::EndSwitch, &[]);
    }

    /// Define a class; `body` adds methods through
    /// [`ProgramBuilder::build_class_method`].
    pub fn build_class(
        &mut self,
        superclass: Option<Variable>,
        body: impl FnOnce(&mut Self),
    ) -> Variable {
        let inputs: Vec<_> = superclass.into_iter().collect();
        let produced = self.emit(
            Operation::BeginClassDefinition {
                has_superclass: !inputs.is_empty(),
            },
            &inputs,
        );
        body(self);
        self.emit(Operation::EndClassDefinition, &[]);
        produced[0]
    }

    /// Add a method to the enclosing class; `body` receives the receiver
    /// and the parameters
    pub fn build_class_method(
        &mut self,
        name: &str,
        num_parameters: usize,
        body: impl FnOnce(&mut Self, Variable, &[Variable]),
    ) {
        let produced = self.emit(
            Operation::BeginClassMethod {
                name: name.to_string(),
                num_parameters,
            },
            &[],
        );
        body(self, produced[0], &produced[1..]);
        self.emit(Operation::EndClassMethod, &[]);
    }
}
