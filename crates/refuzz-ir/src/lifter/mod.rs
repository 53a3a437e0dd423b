//! Lifter from IR to Python source.
//!
//! Variables whose defining expression can be substituted at their use
//! site are inlined instead of bound to a name:
//!
//! - a variable that is reassigned is always bound to its name;
//! - a pure expression (literal, builtin reference) is inlined at every use;
//! - an effectful expression is inlined only into its single use.
//!
//! Effectful expressions awaiting their use wait in a FIFO queue in
//! program order. Whenever substituting one would move its side effect
//! past another queued expression, the earlier ones are bound to their
//! names first. Every emitted statement and every block boundary flushes
//! the queue, so inlining never crosses either.

mod expression;
mod writer;

use crate::analysis::VariableAnalyzer;
use crate::instruction::Instruction;
use crate::operation::{BinaryOperator, Operation};
use crate::program::Program;
use crate::variable::Variable;
use expression::{float_literal, int_literal, is_identifier, quote, string_literal, Expression, Precedence};
use std::collections::{BTreeSet, HashMap, VecDeque};
use writer::ScriptWriter;

#[derive(Debug, Clone, Default)]
pub struct LiftingOptions {
    /// Emit program comments as Python comments
    pub include_comments: bool,
    /// Append the index of the originating instruction to each line
    pub include_line_numbers: bool,
}

/// Renders programs as Python 3 scripts
#[derive(Debug, Clone, Default)]
pub struct PythonLifter {
    prefix: String,
    suffix: String,
    options: LiftingOptions,
}

impl PythonLifter {
    pub fn new(options: LiftingOptions) -> Self {
        Self {
            prefix: String::new(),
            suffix: String::new(),
            options,
        }
    }

    /// Source placed before every lifted program
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Source placed after every lifted program
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn options(&self) -> &LiftingOptions {
        &self.options
    }

    pub fn lift(&self, program: &Program) -> String {
        let mut source = String::new();
        push_section(&mut source, &self.prefix);
        source.push_str(&Lifting::new(program, &self.options).run());
        push_section(&mut source, &self.suffix);
        source
    }
}

fn push_section(source: &mut String, section: &str) {
    if section.is_empty() {
        return;
    }
    source.push_str(section);
    if !section.ends_with('\n') {
        source.push('\n');
    }
}

/// How an input may be rendered at its use site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Any expression
    Inline,
    /// A plain name; needed for assignment targets and callees
    Name,
    /// An expression without side effects, because the position is
    /// evaluated conditionally or repeatedly
    Evaluated,
}

/// State of a single lifting run
struct Lifting<'a> {
    program: &'a Program,
    options: &'a LiftingOptions,
    writer: ScriptWriter,
    analyzer: VariableAnalyzer,
    names: HashMap<Variable, String>,
    expressions: HashMap<Variable, Expression>,
    pending: VecDeque<Variable>,
    /// `global`/`nonlocal` lines keyed by the function or method start
    scope_declarations: HashMap<usize, Vec<String>>,
    /// One flag per open switch: whether a case has been emitted
    switch_has_case: Vec<bool>,
    current: usize,
}

impl<'a> Lifting<'a> {
    fn new(program: &'a Program, options: &'a LiftingOptions) -> Self {
        let names = variable_names(program);
        let scope_declarations = scope_declarations(program, &names);
        Self {
            program,
            options,
            writer: ScriptWriter::new(),
            analyzer: VariableAnalyzer::new(&program.code),
            names,
            expressions: HashMap::new(),
            pending: VecDeque::new(),
            scope_declarations,
            switch_has_case: Vec::new(),
            current: 0,
        }
    }

    fn run(mut self) -> String {
        let program = self.program;
        let comments = &program.comments;
        if self.options.include_comments {
            if let Some(header) = &comments.header {
                self.writer.emit_comment(header);
            }
        }
        for instr in &program.code {
            self.current = instr.index();
            if self.options.include_comments {
                if let Some(text) = comments.instructions.get(&instr.index()) {
                    self.writer.emit_comment(text);
                }
            }
            self.lift_instruction(instr);
        }
        self.drain();
        if self.options.include_comments {
            if let Some(footer) = &comments.footer {
                self.writer.emit_comment(footer);
            }
        }
        self.writer.finish()
    }

    fn lift_instruction(&mut self, instr: &Instruction) {
        use Operation::*;

        match instr.op() {
            Nop => self.emit("pass".to_string()),

            LoadInteger { value } | LoadBigInt { value } => {
                self.declare(instr.output(), int_literal(*value))
            }
            LoadFloat { value } => self.declare(instr.output(), float_literal(*value)),
            LoadString { value } => self.declare(instr.output(), string_literal(value)),
            LoadBoolean { value } => {
                let text = if *value { "True" } else { "False" };
                self.declare(instr.output(), Expression::pure(text, Precedence::Atom))
            }
            LoadUndefined | LoadNull => {
                self.declare(instr.output(), Expression::pure("None", Precedence::Atom))
            }
            LoadRegExp { pattern } => self.declare(instr.output(), string_literal(pattern)),
            LoadBuiltin { name } => self.declare(instr.output(), Expression::identifier(name.clone())),
            CreateArray { .. } => {
                let items = self.retrieve_all(instr.inputs(), Slot::Inline);
                let text = format!("[{}]", join(&items));
                self.declare(instr.output(), Expression::effectful(text, Precedence::Atom))
            }

            GetProperty { name } => {
                let object = self.retrieve_one(instr.input(0), Slot::Inline);
                let text = attribute(&object, name);
                self.declare(instr.output(), Expression::effectful(text, Precedence::Primary))
            }
            SetProperty { name } => {
                let e = self.retrieve(instr.inputs(), &[Slot::Name, Slot::Inline]);
                let line = if is_identifier(name) {
                    format!("{}.{} = {}", e[0].text, name, e[1].text)
                } else {
                    format!("setattr({}, {}, {})", e[0].text, quote(name), e[1].text)
                };
                self.emit(line)
            }
            GetElement { index } => {
                let object = self.retrieve_one(instr.input(0), Slot::Inline);
                let text = format!("{}[{}]", object.subject(), index);
                self.declare(instr.output(), Expression::effectful(text, Precedence::Primary))
            }
            SetElement { index } => {
                let e = self.retrieve(instr.inputs(), &[Slot::Name, Slot::Inline]);
                self.emit(format!("{}[{}] = {}", e[0].text, index, e[1].text))
            }

            BeginPlainFunction { .. } => {
                let params = self.bind_all(instr.inner_outputs());
                let function = self.bind(instr.output());
                self.open(format!("def {}({}):", function, params.join(", ")));
                self.emit_scope_declarations(instr.index());
            }
            Return => {
                let value = self.retrieve_one(instr.input(0), Slot::Inline);
                self.emit(format!("return {}", value.text))
            }
            CallFunction { .. } => {
                let e = self.retrieve(instr.inputs(), &call_slots(instr.inputs().len()));
                let text = format!("{}({})", e[0].subject(), join(&e[1..]));
                self.declare(instr.output(), Expression::effectful(text, Precedence::Primary))
            }
            Construct { .. } => {
                let e = self.retrieve(instr.inputs(), &call_slots(instr.inputs().len()));
                let text = format!("{}({})", e[0].subject(), join(&e[1..]));
                self.assign(instr.output(), &text)
            }
            CallMethod { name, .. } => {
                let e = self.retrieve_all(instr.inputs(), Slot::Inline);
                let text = format!("{}({})", attribute(&e[0], name), join(&e[1..]));
                self.declare(instr.output(), Expression::effectful(text, Precedence::Primary))
            }

            UnaryOperation { op } => {
                let input = self.retrieve_one(instr.input(0), Slot::Inline);
                let precedence = Precedence::of_unary(*op);
                let text = format!("{}{}", op.token(), input.operand(precedence));
                self.declare(instr.output(), Expression::effectful(text, precedence))
            }
            BinaryOperation { op } => {
                let slots = if op.is_logical() {
                    [Slot::Inline, Slot::Evaluated]
                } else {
                    [Slot::Inline, Slot::Inline]
                };
                let e = self.retrieve(instr.inputs(), &slots);
                let text = binary(&e[0], *op, &e[1]);
                let precedence = Precedence::of_binary(*op);
                self.declare(instr.output(), Expression::effectful(text, precedence))
            }
            TernaryOperation => {
                let e = self.retrieve(instr.inputs(), &[Slot::Inline, Slot::Evaluated, Slot::Evaluated]);
                let text = format!(
                    "{} if {} else {}",
                    e[1].operand_above(Precedence::Ternary),
                    e[0].operand_above(Precedence::Ternary),
                    e[2].operand(Precedence::Ternary)
                );
                self.declare(instr.output(), Expression::effectful(text, Precedence::Ternary))
            }
            Compare { op } => {
                let e = self.retrieve_all(instr.inputs(), Slot::Inline);
                let text = format!(
                    "{} {} {}",
                    e[0].operand_above(Precedence::Comparison),
                    op.token(),
                    e[1].operand_above(Precedence::Comparison)
                );
                self.declare(instr.output(), Expression::effectful(text, Precedence::Comparison))
            }
            Reassign => {
                let e = self.retrieve(instr.inputs(), &[Slot::Name, Slot::Inline]);
                self.emit(format!("{} = {}", e[0].text, e[1].text))
            }
            Update { op } if op.is_logical() => {
                let e = self.retrieve(instr.inputs(), &[Slot::Name, Slot::Evaluated]);
                let text = binary(&e[0], *op, &e[1]);
                self.emit(format!("{} = {}", e[0].text, text))
            }
            Update { op } => {
                let e = self.retrieve(instr.inputs(), &[Slot::Name, Slot::Inline]);
                self.emit(format!("{} {}= {}", e[0].text, op.token(), e[1].text))
            }
            Dup => {
                let input = self.retrieve_one(instr.input(0), Slot::Inline);
                let copy = Expression {
                    effectful: true,
                    ..input
                };
                self.declare(instr.output(), copy)
            }
            Eval { code, .. } => {
                let args = self.retrieve_all(instr.inputs(), Slot::Evaluated);
                let mut line = String::new();
                let mut parts = code.split("%@");
                line.push_str(parts.next().unwrap_or_default());
                let mut args = args.iter();
                for part in parts {
                    match args.next() {
                        Some(arg) => line.push_str(&arg.operand(Precedence::Primary)),
                        None => line.push_str("%@"),
                    }
                    line.push_str(part);
                }
                self.emit(line)
            }

            BeginIf { inverted } => {
                let condition = self.retrieve_one(instr.input(0), Slot::Inline);
                let header = if *inverted {
                    format!("if not {}:", condition.operand(Precedence::Not))
                } else {
                    format!("if {}:", condition.text)
                };
                self.open(header)
            }
            BeginElse => {
                self.close();
                self.open("else:".to_string())
            }
            BeginWhileLoop { comparator } => {
                let e = self.retrieve_all(instr.inputs(), Slot::Evaluated);
                self.open(format!(
                    "while {} {} {}:",
                    e[0].operand_above(Precedence::Comparison),
                    comparator.token(),
                    e[1].operand_above(Precedence::Comparison)
                ))
            }
            BeginForLoop => {
                let e = self.retrieve_all(instr.inputs(), Slot::Inline);
                let counter = self.bind(instr.inner_outputs()[0]);
                self.open(format!("for {} in range({}):", counter, join(&e)))
            }
            LoopBreak => self.emit("break".to_string()),
            LoopContinue => self.emit("continue".to_string()),
            BeginTry => self.open("try:".to_string()),
            BeginCatch => {
                self.close();
                let error = self.bind(instr.inner_outputs()[0]);
                self.open(format!("except BaseException as {}:", error))
            }
            BeginFinally => {
                self.close();
                self.open("finally:".to_string())
            }
            ThrowException => {
                let value = self.retrieve_one(instr.input(0), Slot::Inline);
                self.emit(format!("raise {}", value.text))
            }

            BeginSwitch => {
                let subject = self.retrieve_one(instr.input(0), Slot::Inline);
                self.switch_has_case.push(false);
                self.open(format!("match {}:", subject.operand_above(Precedence::Ternary)))
            }
            BeginSwitchCase => {
                let value = self.retrieve_one(instr.input(0), Slot::Inline);
                self.mark_switch_case();
                let capture = format!("c{}", instr.index());
                self.open(format!(
                    "case {} if {} == {}:",
                    capture,
                    capture,
                    value.operand_above(Precedence::Comparison)
                ))
            }
            BeginSwitchDefaultCase => {
                self.mark_switch_case();
                self.open("case _:".to_string())
            }
            EndSwitch => {
                // `match` needs at least one case
                if self.switch_has_case.pop() == Some(false) {
                    self.open("case _:".to_string());
                    self.close();
                }
                self.close()
            }

            BeginClassDefinition { .. } => {
                let base = self.retrieve_all(instr.inputs(), Slot::Inline);
                let class = self.bind(instr.output());
                let header = match base.first() {
                    Some(base) => format!("class {}({}):", class, base.text),
                    None => format!("class {}:", class),
                };
                self.open(header)
            }
            BeginClassMethod { name, .. } => {
                let params = self.bind_all(instr.inner_outputs());
                let name = if is_identifier(name) {
                    name.clone()
                } else {
                    format!("m{}", instr.index())
                };
                self.open(format!("def {}({}):", name, params.join(", ")));
                self.emit_scope_declarations(instr.index());
            }

            EndPlainFunction | EndIf | EndWhileLoop | EndForLoop | EndTryCatchFinally
            | EndSwitchCase | EndClassMethod | EndClassDefinition => self.close(),

            Print => {
                let value = self.retrieve_one(instr.input(0), Slot::Inline);
                self.emit(format!("Mirror.print({})", value.text))
            }
        }
    }

    //
    // Output
    //

    fn annotate(&self, line: String) -> String {
        if self.options.include_line_numbers {
            format!("{}  # {}", line, self.current)
        } else {
            line
        }
    }

    /// Write a line without flushing pending expressions
    fn write(&mut self, line: String) {
        let line = self.annotate(line);
        self.writer.emit(&line);
    }

    fn emit(&mut self, line: String) {
        self.drain();
        self.write(line);
    }

    fn open(&mut self, header: String) {
        self.drain();
        let header = self.annotate(header);
        self.writer.open_block(&header);
    }

    fn close(&mut self) {
        self.drain();
        self.writer.close_block();
    }

    fn mark_switch_case(&mut self) {
        if let Some(flag) = self.switch_has_case.last_mut() {
            *flag = true;
        }
    }

    fn emit_scope_declarations(&mut self, index: usize) {
        if let Some(lines) = self.scope_declarations.remove(&index) {
            for line in lines {
                self.write(line);
            }
        }
    }

    //
    // Variables and expressions
    //

    fn name(&self, v: Variable) -> String {
        self.names.get(&v).cloned().unwrap_or_else(|| v.to_string())
    }

    /// Make `v` refer to its own name and return that name
    fn bind(&mut self, v: Variable) -> String {
        let name = self.name(v);
        self.expressions.insert(v, Expression::identifier(name.clone()));
        name
    }

    fn bind_all(&mut self, vars: &[Variable]) -> Vec<String> {
        vars.iter().map(|&v| self.bind(v)).collect()
    }

    /// Bind `text` to the name of `v` right away
    fn assign(&mut self, v: Variable, text: &str) {
        let name = self.name(v);
        self.emit(format!("{} = {}", name, text));
        self.expressions.insert(v, Expression::identifier(name));
    }

    /// Record the expression computing `v` and decide whether to inline it
    fn declare(&mut self, v: Variable, expr: Expression) {
        let uses = self.analyzer.num_uses(v);
        if self.analyzer.is_single_assignment(v) {
            if !expr.effectful && uses > 0 {
                self.expressions.insert(v, expr);
                return;
            }
            if expr.effectful && uses == 1 {
                self.expressions.insert(v, expr);
                self.pending.push_back(v);
                return;
            }
            if expr.effectful && uses == 0 {
                self.emit(expr.text);
                return;
            }
        }
        self.assign(v, &expr.text);
    }

    /// Bind a queued expression to its variable's name
    fn materialize(&mut self, v: Variable) {
        if let Some(expr) = self.expressions.get(&v) {
            let name = self.name(v);
            let line = format!("{} = {}", name, expr.text);
            self.write(line);
            self.expressions.insert(v, Expression::identifier(name));
        }
    }

    fn drain(&mut self) {
        while let Some(v) = self.pending.pop_front() {
            self.materialize(v);
        }
    }

    fn retrieve_one(&mut self, v: Variable, slot: Slot) -> Expression {
        self.retrieve(&[v], &[slot]).remove(0)
    }

    fn retrieve_all(&mut self, inputs: &[Variable], slot: Slot) -> Vec<Expression> {
        self.retrieve(inputs, &vec![slot; inputs.len()])
    }

    /// Expressions for `inputs`, listed in Python evaluation order.
    ///
    /// Queued inputs are inlined only if they form the tail of the queue in
    /// the same order in which Python evaluates them; everything queued
    /// before them is bound to a name first.
    fn retrieve(&mut self, inputs: &[Variable], slots: &[Slot]) -> Vec<Expression> {
        debug_assert_eq!(inputs.len(), slots.len());

        if !self.pending.is_empty() {
            let candidates: Vec<Variable> = inputs
                .iter()
                .zip(slots)
                .filter(|(v, slot)| **slot == Slot::Inline && self.pending.contains(v))
                .map(|(v, _)| *v)
                .collect();

            let mut inlined = 0;
            while inlined < candidates.len()
                && inlined < self.pending.len()
                && candidates[candidates.len() - 1 - inlined]
                    == self.pending[self.pending.len() - 1 - inlined]
            {
                inlined += 1;
            }

            let cut = if inlined > 0 {
                self.pending.len() - inlined
            } else {
                inputs
                    .iter()
                    .filter_map(|v| self.pending.iter().position(|p| p == v))
                    .map(|position| position + 1)
                    .max()
                    .unwrap_or(0)
            };
            let flushed: Vec<Variable> = self.pending.drain(..cut).collect();
            for v in flushed {
                self.materialize(v);
            }
            let remaining = self.pending.len() - inlined;
            self.pending.truncate(remaining);
        }

        let mut result = Vec::with_capacity(inputs.len());
        for (&v, &slot) in inputs.iter().zip(slots) {
            let expr = self
                .expressions
                .get(&v)
                .cloned()
                .unwrap_or_else(|| Expression::identifier(self.name(v)));
            if slot == Slot::Name && !expr.is_identifier() {
                // A fresh name; the variable's own record is left alone
                // because a later use may be in a scope without this temp
                let temp = format!("t{}", self.writer.current_line());
                self.write(format!("{} = {}", temp, expr.text));
                result.push(Expression::identifier(temp));
            } else {
                result.push(expr);
            }
        }
        result
    }
}

fn call_slots(num_inputs: usize) -> Vec<Slot> {
    let mut slots = vec![Slot::Inline; num_inputs];
    slots[0] = Slot::Name;
    slots
}

fn join(exprs: &[Expression]) -> String {
    exprs
        .iter()
        .map(|e| e.text.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn attribute(object: &Expression, name: &str) -> String {
    if is_identifier(name) {
        format!("{}.{}", object.subject(), name)
    } else {
        format!("getattr({}, {})", object.text, quote(name))
    }
}

fn binary(lhs: &Expression, op: BinaryOperator, rhs: &Expression) -> String {
    let precedence = Precedence::of_binary(op);
    let (left, right) = if op == BinaryOperator::Pow {
        (lhs.operand_above(Precedence::Power), rhs.operand(Precedence::Unary))
    } else {
        (lhs.operand(precedence), rhs.operand_above(precedence))
    };
    format!("{} {} {}", left, op.token(), right)
}

/// Python names for every variable, by the role of its declaration
fn variable_names(program: &Program) -> HashMap<Variable, String> {
    let mut names = HashMap::new();
    for instr in &program.code {
        for &v in instr.outputs() {
            let prefix = match instr.op() {
                Operation::BeginPlainFunction { .. } => "f",
                Operation::BeginClassDefinition { .. } => "C",
                _ => "v",
            };
            names.insert(v, format!("{}{}", prefix, v.number()));
        }
        for (position, &v) in instr.inner_outputs().iter().enumerate() {
            let prefix = match instr.op() {
                Operation::BeginClassMethod { .. } if position == 0 => "s",
                Operation::BeginCatch => "e",
                Operation::BeginForLoop => "i",
                _ => "a",
            };
            names.insert(v, format!("{}{}", prefix, v.number()));
        }
    }
    names
}

/// `global` and `nonlocal` lines for every function or method that
/// reassigns a variable declared outside of it
fn scope_declarations(
    program: &Program,
    names: &HashMap<Variable, String>,
) -> HashMap<usize, Vec<String>> {
    // None is module scope, otherwise the index of the function start
    let mut frames: Vec<Option<usize>> = vec![None];
    let mut open_blocks: Vec<bool> = Vec::new();
    let mut homes: HashMap<Variable, Option<usize>> = HashMap::new();
    let mut outer: HashMap<usize, (BTreeSet<Variable>, BTreeSet<Variable>)> = HashMap::new();

    for instr in &program.code {
        if instr.is_block_end() && open_blocks.pop() == Some(true) {
            frames.pop();
        }
        let frame = frames.last().copied().flatten();
        for &v in instr.outputs() {
            homes.insert(v, frame);
        }
        if instr.is_block_start() {
            let opens_frame = matches!(
                instr.op(),
                Operation::BeginPlainFunction { .. } | Operation::BeginClassMethod { .. }
            );
            open_blocks.push(opens_frame);
            if opens_frame {
                frames.push(Some(instr.index()));
            }
            let inner = frames.last().copied().flatten();
            for &v in instr.inner_outputs() {
                homes.insert(v, inner);
            }
        }
        if matches!(instr.op(), Operation::Reassign | Operation::Update { .. }) {
            let target = instr.input(0);
            if let (Some(current), Some(&home)) = (frame, homes.get(&target)) {
                if home != Some(current) {
                    let (globals, nonlocals) = outer.entry(current).or_default();
                    if home.is_none() {
                        globals.insert(target);
                    } else {
                        nonlocals.insert(target);
                    }
                }
            }
        }
    }

    let name = |v: &Variable| names.get(v).cloned().unwrap_or_else(|| v.to_string());
    outer
        .into_iter()
        .map(|(frame, (globals, nonlocals))| {
            let mut lines = Vec::new();
            if !globals.is_empty() {
                let list: Vec<_> = globals.iter().map(name).collect();
                lines.push(format!("global {}", list.join(", ")));
            }
            if !nonlocals.is_empty() {
                let list: Vec<_> = nonlocals.iter().map(name).collect();
                lines.push(format!("nonlocal {}", list.join(", ")));
            }
            (frame, lines)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::operation::{BinaryOperator, Comparator};

    fn lift(program: &Program) -> String {
        PythonLifter::default().lift(program)
    }

    #[test]
    fn test_call_with_inlined_literals() {
        let mut b = ProgramBuilder::new();
        let one = b.load_int(1);
        let print = b.load_builtin("print");
        b.call_function(print, &[one]);
        assert_eq!(lift(&b.finalize()), "print(1)\n");
    }

    #[test]
    fn test_effectful_expressions_keep_program_order() {
        let mut b = ProgramBuilder::new();
        let o = b.load_builtin("o");
        let first = b.get_property("a", o);
        let second = b.get_property("b", o);
        let sum = b.binary(first, second, BinaryOperator::Add);
        b.print(sum);
        assert_eq!(lift(&b.finalize()), "Mirror.print(o.a + o.b)\n");

        let mut b = ProgramBuilder::new();
        let o = b.load_builtin("o");
        let first = b.get_property("a", o);
        let second = b.get_property("b", o);
        let sum = b.binary(second, first, BinaryOperator::Add);
        b.print(sum);
        assert_eq!(
            lift(&b.finalize()),
            "v1 = o.a\nv2 = o.b\nMirror.print(v2 + v1)\n"
        );
    }

    #[test]
    fn test_reassigned_variable_is_never_inlined() {
        let mut b = ProgramBuilder::new();
        let x = b.load_int(1);
        let y = b.load_int(2);
        b.reassign(x, y);
        b.print(x);
        assert_eq!(lift(&b.finalize()), "v0 = 1\nv0 = 2\nMirror.print(v0)\n");
    }

    #[test]
    fn test_statement_flushes_pending_expressions() {
        let mut b = ProgramBuilder::new();
        let f = b.load_builtin("f");
        let result = b.call_function(f, &[]);
        let s = b.load_string("x");
        b.print(s);
        b.print(result);
        assert_eq!(
            lift(&b.finalize()),
            "v1 = f()\nMirror.print(\"x\")\nMirror.print(v1)\n"
        );
    }

    #[test]
    fn test_block_entry_flushes_pending_expressions() {
        let mut b = ProgramBuilder::new();
        let f = b.load_builtin("f");
        let result = b.call_function(f, &[]);
        let cond = b.load_bool(true);
        b.build_if(cond, |b| b.print(result));
        assert_eq!(
            lift(&b.finalize()),
            "v1 = f()\nif True:\n    Mirror.print(v1)\n"
        );
    }

    #[test]
    fn test_conditional_operand_is_materialized() {
        let mut b = ProgramBuilder::new();
        let f = b.load_builtin("f");
        let result = b.call_function(f, &[]);
        let t = b.load_bool(true);
        let both = b.binary(t, result, BinaryOperator::LogicalAnd);
        b.print(both);
        assert_eq!(
            lift(&b.finalize()),
            "v1 = f()\nMirror.print(True and v1)\n"
        );
    }

    #[test]
    fn test_empty_blocks_get_pass() {
        let mut b = ProgramBuilder::new();
        b.build_try_catch(|_| {}, |_, _| {});
        assert_eq!(
            lift(&b.finalize()),
            "try:\n    pass\nexcept BaseException as e0:\n    pass\n"
        );
    }

    #[test]
    fn test_global_declaration_for_reassigned_outer_variable() {
        let mut b = ProgramBuilder::new();
        let x = b.load_int(0);
        b.build_plain_function(0, |b, _| {
            let y = b.load_int(5);
            b.reassign(x, y);
        });
        assert_eq!(
            lift(&b.finalize()),
            "v0 = 0\ndef f1():\n    global v0\n    v0 = 5\n"
        );
    }

    #[test]
    fn test_nonlocal_declaration_in_nested_function() {
        let mut b = ProgramBuilder::new();
        b.build_plain_function(0, |b, _| {
            let x = b.load_int(1);
            b.build_plain_function(0, |b, _| {
                let y = b.load_int(2);
                b.reassign(x, y);
            });
        });
        assert_eq!(
            lift(&b.finalize()),
            "def f0():\n    v1 = 1\n    def f2():\n        nonlocal v1\n        v1 = 2\n"
        );
    }

    #[test]
    fn test_switch_lifting() {
        let mut b = ProgramBuilder::new();
        let subject = b.load_int(1);
        b.build_switch(subject, vec![], None);
        assert_eq!(lift(&b.finalize()), "match 1:\n    case _:\n        pass\n");

        let mut b = ProgramBuilder::new();
        let subject = b.load_int(1);
        let value = b.load_int(2);
        b.build_switch(
            subject,
            vec![(
                value,
                Box::new(|b: &mut ProgramBuilder| {
                    let s = b.load_string("x");
                    b.print(s);
                }),
            )],
            Some(Box::new(|_: &mut ProgramBuilder| {})),
        );
        assert_eq!(
            lift(&b.finalize()),
            "match 1:\n    case c3 if c3 == 2:\n        Mirror.print(\"x\")\n    case _:\n        pass\n"
        );
    }

    #[test]
    fn test_special_literals_and_parentheses() {
        let mut b = ProgramBuilder::new();
        let nan = b.load_float(f64::NAN);
        b.print(nan);
        let ninf = b.load_float(f64::NEG_INFINITY);
        b.print(ninf);
        let none = b.load_undefined();
        b.print(none);
        let neg = b.load_int(-3);
        b.call_method("bit_length", neg, &[]);
        let base = b.load_int(-2);
        let exp = b.load_int(2);
        let pow = b.binary(base, exp, BinaryOperator::Pow);
        b.print(pow);
        assert_eq!(
            lift(&b.finalize()),
            "Mirror.print(float('nan'))\n\
             Mirror.print(-float('inf'))\n\
             Mirror.print(None)\n\
             (-3).bit_length()\n\
             Mirror.print((-2) ** 2)\n"
        );
    }

    #[test]
    fn test_comparisons_do_not_chain() {
        let mut b = ProgramBuilder::new();
        let one = b.load_int(1);
        let two = b.load_int(2);
        let lt = b.compare(one, two, Comparator::LessThan);
        let again = b.compare(lt, two, Comparator::LessThan);
        b.print(again);
        assert_eq!(lift(&b.finalize()), "Mirror.print((1 < 2) < 2)\n");
    }

    #[test]
    fn test_assignment_target_gets_temporary_name() {
        let mut b = ProgramBuilder::new();
        let five = b.load_int(5);
        let one = b.load_int(1);
        b.set_property("x", five, one);
        assert_eq!(lift(&b.finalize()), "t0 = 5\nt0.x = 1\n");
    }

    #[test]
    fn test_loops_and_classes() {
        let mut b = ProgramBuilder::new();
        let zero = b.load_int(0);
        let ten = b.load_int(10);
        let one = b.load_int(1);
        b.build_for_loop(zero, ten, one, |b, i| {
            b.print(i);
            b.loop_break();
        });
        b.build_class(None, |b| {
            b.build_class_method("get", 1, |b, this, params| {
                let value = b.get_property("x", this);
                b.do_return(params[0]);
                b.print(value);
            });
        });
        assert_eq!(
            lift(&b.finalize()),
            "for i3 in range(0, 10, 1):\n\
             \x20   Mirror.print(i3)\n\
             \x20   break\n\
             class C4:\n\
             \x20   def get(s5, a6):\n\
             \x20       v7 = s5.x\n\
             \x20       return a6\n\
             \x20       Mirror.print(v7)\n"
        );
    }

    #[test]
    fn test_annotations() {
        let mut b = ProgramBuilder::new();
        let one = b.load_int(1);
        b.print(one);
        b.comments_mut().add_header("seed");
        b.comments_mut().add_at(1, "note");
        b.comments_mut().add_footer("end");
        let program = b.finalize();

        let lifter = PythonLifter::new(LiftingOptions {
            include_comments: true,
            include_line_numbers: true,
        })
        .with_prefix("from refuzz_mirror import *");
        assert_eq!(
            lifter.lift(&program),
            "from refuzz_mirror import *\n# seed\n# note\nMirror.print(1)  # 1\n# end\n"
        );
        assert_eq!(lift(&program), "Mirror.print(1)\n");
    }

    #[test]
    fn test_lifting_is_deterministic() {
        let mut b = ProgramBuilder::new();
        let o = b.load_builtin("o");
        let x = b.get_property("x", o);
        let y = b.call_method("m", x, &[o]);
        b.build_if(y, |b| {
            let n = b.load_null();
            b.print(n);
        });
        let program = b.finalize();
        assert_eq!(lift(&program), lift(&program));
    }
}
