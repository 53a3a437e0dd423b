//! Observation of runtime values through the reflection hook.
//!
//! A program is instrumented by loading the hook once at the top and
//! calling `Mirror.record(value, index)` after every instruction that
//! produces a single value. The records the hook writes to the side
//! channel are attached to a copy of the original program.

use crate::context::FuzzerContext;
use refuzz_core::{Execution, ReflectionRecord};
use refuzz_ir::{Instruction, Operation, Program, ProgramBuilder};
use refuzz_runtime::HOOK_BUILTIN;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Hook method that reports a value
pub const RECORD_METHOD: &str = "record";

/// A program together with the observations of one execution
#[derive(Debug, Clone)]
pub struct ReflectedProgram {
    pub program: Program,
    records: BTreeMap<usize, ReflectionRecord>,
}

impl ReflectedProgram {
    pub fn record(&self, index: usize) -> Option<&ReflectionRecord> {
        self.records.get(&index)
    }

    /// Indices of the instructions that carry a record, ascending
    pub fn reflected_indices(&self) -> Vec<usize> {
        self.records.keys().copied().collect()
    }

    pub fn num_records(&self) -> usize {
        self.records.len()
    }
}

/// Whether observing the output of `instr` is meaningful
pub fn is_observable(instr: &Instruction) -> bool {
    instr.is_simple() && instr.has_one_output()
}

/// Whether `instr` is a call of the hook's record method
pub fn is_record_call(instr: &Instruction) -> bool {
    matches!(instr.op(), Operation::CallMethod { name, .. } if name == RECORD_METHOD)
}

/// Whether `instr` loads the hook itself
pub fn is_hook_load(instr: &Instruction) -> bool {
    matches!(instr.op(), Operation::LoadBuiltin { name } if name == HOOK_BUILTIN)
}

/// Copy of `program` that reports the value of every observable
/// instruction, tagged with the instruction's original index
pub fn instrument(program: &Program) -> Program {
    let mut b = ProgramBuilder::derived_from(program);
    let hook = b.reuse_or_load_builtin(HOOK_BUILTIN);
    b.begin_adoption();
    for instr in &program.code {
        b.adopt(instr);
        if is_observable(instr) {
            let value = b.adopted(instr.output());
            let index = b.load_int(instr.index() as i64);
            b.call_method(RECORD_METHOD, hook, &[value, index]);
        }
    }
    b.finalize()
}

/// Attach the records of `execution` to a copy of `program`.
///
/// Fails when the execution did not succeed or produced no usable record.
/// Malformed lines, records for indices outside the program and records
/// without any structure to act on are dropped.
pub fn reflect_on(program: &Program, execution: &Execution) -> Option<ReflectedProgram> {
    if !execution.outcome.is_success() || execution.fuzzout.is_empty() {
        return None;
    }
    let records: BTreeMap<usize, ReflectionRecord> = ReflectionRecord::parse_stream(&execution.fuzzout)
        .into_iter()
        .filter(|r| r.index < program.size())
        .filter(|r| program.code[r.index].has_one_output())
        .filter(ReflectionRecord::is_usable)
        .map(|r| (r.index, r))
        .collect();
    if records.is_empty() {
        trace!(program = %program.id, "no usable reflection records");
        return None;
    }
    Some(ReflectedProgram {
        program: program.clone(),
        records,
    })
}

/// Instrument and run `program`, then reflect on the result
pub fn observe(program: &Program, ctx: &mut FuzzerContext) -> Option<ReflectedProgram> {
    let instrumented = instrument(program);
    let execution = ctx.execute(&instrumented);
    let reflected = reflect_on(program, &execution);
    debug!(
        program = %program.id,
        outcome = %execution.outcome,
        records = reflected.as_ref().map_or(0, ReflectedProgram::num_records),
        "observed program"
    );
    reflected
}
