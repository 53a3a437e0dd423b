//! Removal of reflection scaffolding that did not pay off.
//!
//! The reflection mutator guards everything it synthesizes with try/catch
//! and reports guarded results to the hook. After execution the program is
//! observed again and the guarded regions are cut down to the values that
//! were actually observed.

use crate::context::FuzzerContext;
use crate::reflection::{is_hook_load, is_record_call, observe, ReflectedProgram};
use refuzz_ir::{Instruction, Program, ProgramBuilder, Variable};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Observe `program` and prune it against the result
pub fn prune_instrumentation(program: &Program, ctx: &mut FuzzerContext) -> Program {
    let reflected = observe(program, ctx);
    prune(program, reflected.as_ref())
}

/// Remove the unobserved content of every try group of `program`.
///
/// With observations, a body instruction survives only if it produced a
/// recorded single value and is not itself a hook load or record call.
/// Without observations every try group is removed whole. Instructions
/// depending on removed values go too, and try groups left with an empty
/// body are dropped.
pub fn prune(program: &Program, reflected: Option<&ReflectedProgram>) -> Program {
    let code = &program.code;
    let try_groups = code.find_block_groups(|i| i.op().is_try_start());
    if try_groups.is_empty() {
        return program.clone();
    }

    let group_tails: HashMap<usize, usize> = code
        .find_block_groups(|_| true)
        .into_iter()
        .map(|g| (g.head, g.tail))
        .collect();
    let mut removed: BTreeSet<usize> = BTreeSet::new();

    for group in &try_groups {
        let Some(reflected) = reflected else {
            removed.extend(group.range());
            continue;
        };
        let mut index = group.head;
        while index <= group.tail {
            if group.is_own_block_instruction(index) {
                index += 1;
                continue;
            }
            let instr = &code[index];
            if instr.is_block_start() {
                // Nested blocks are never noteworthy, drop them whole
                let tail = group_tails.get(&index).copied().unwrap_or(index);
                removed.extend(index..=tail);
                index = tail + 1;
                continue;
            }
            if !is_noteworthy(instr, reflected) {
                removed.insert(index);
            }
            index += 1;
        }
    }

    remove_dependents(program, &group_tails, &mut removed);

    for group in try_groups.iter().rev() {
        if group.body().all(|i| removed.contains(&i)) {
            removed.extend(group.range());
        }
    }

    if removed.is_empty() {
        return program.clone();
    }
    debug!(program = %program.id, removed = removed.len(), "pruned instrumentation");
    rebuild(program, &removed)
}

fn is_noteworthy(instr: &Instruction, reflected: &ReflectedProgram) -> bool {
    reflected.record(instr.index()).is_some()
        && instr.has_one_output()
        && instr.is_simple()
        && !is_record_call(instr)
        && !is_hook_load(instr)
}

/// Extend `removed` with every instruction that uses a value declared by
/// a removed instruction, removing whole blocks when their head goes
fn remove_dependents(program: &Program, group_tails: &HashMap<usize, usize>, removed: &mut BTreeSet<usize>) {
    let mut lost: HashSet<Variable> = HashSet::new();
    let mut index = 0;
    while index < program.size() {
        let instr = &program.code[index];
        let uses_lost = instr.inputs().iter().any(|v| lost.contains(v));
        if uses_lost && !removed.contains(&index) {
            if instr.is_block_start() {
                let tail = group_tails.get(&index).copied().unwrap_or(index);
                removed.extend(index..=tail);
            } else {
                removed.insert(index);
            }
        }
        if removed.contains(&index) {
            lost.extend(instr.all_outputs().iter().copied());
        }
        index += 1;
    }
}

fn rebuild(program: &Program, removed: &BTreeSet<usize>) -> Program {
    let mut b = ProgramBuilder::new();
    b.set_contributors(program.contributors.clone());
    b.begin_adoption();
    for instr in program.code.iter().filter(|i| !removed.contains(&i.index())) {
        b.adopt(instr);
    }
    let mut pruned = b.finalize();
    pruned.parent = program.parent;
    pruned.comments.header = program.comments.header.clone();
    pruned.comments.footer = program.comments.footer.clone();
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutators::{Mutator, ReflectionMutator};
    use crate::testing::{context_with, ScriptedExecutor};
    use refuzz_core::{Execution, ExecutionOutcome, MutatorConfig};
    use refuzz_ir::Operation;
    use refuzz_runtime::HOOK_BUILTIN;

    fn op_names(program: &Program) -> Vec<&'static str> {
        program.code.iter().map(|i| i.op().name()).collect()
    }

    /// `x = 5` followed by a guarded call of `x` reported to the hook
    fn guarded_call() -> Program {
        let mut b = ProgramBuilder::new();
        let x = b.load_int(5);
        b.build_try_catch(
            |b| {
                let index = b.load_int(2);
                let result = b.call_function(x, &[]);
                let hook = b.load_builtin(HOOK_BUILTIN);
                b.call_method("record", hook, &[result, index]);
            },
            |_, _| {},
        );
        b.finalize()
    }

    #[test]
    fn test_program_without_try_is_untouched() {
        let mut ctx = context_with(ScriptedExecutor::simulated(), 1);
        let mut b = ProgramBuilder::new();
        b.load_int(5);
        b.build_plain_function(0, |b, _| {
            let v = b.load_int(7);
            b.do_return(v);
        });
        let program = b.finalize();

        let execution = ctx.execute(&program);
        assert_eq!(execution.outcome, ExecutionOutcome::Succeeded);
        let pruned = prune_instrumentation(&program, &mut ctx);
        assert_eq!(pruned, program);
        assert_eq!(
            op_names(&pruned),
            vec!["LoadInteger", "BeginPlainFunction", "LoadInteger", "Return", "EndPlainFunction"]
        );
    }

    #[test]
    fn test_observed_values_survive() {
        let mut ctx = context_with(ScriptedExecutor::simulated(), 1);
        let mut program = guarded_call();
        program.add_contributor("ReflectionMutator");

        let pruned = prune_instrumentation(&program, &mut ctx);
        pruned.code.check().unwrap();
        assert_eq!(
            op_names(&pruned),
            vec!["LoadInteger", "BeginTry", "LoadInteger", "CallFunction", "BeginCatch", "EndTryCatchFinally"]
        );
        assert_eq!(pruned.contributors, program.contributors);
    }

    #[test]
    fn test_failed_observation_removes_try_groups() {
        let mut ctx = context_with(
            ScriptedExecutor::new(|_| Execution::new(ExecutionOutcome::Failed(1))),
            1,
        );
        let pruned = prune_instrumentation(&guarded_call(), &mut ctx);
        assert_eq!(op_names(&pruned), vec!["LoadInteger"]);
    }

    #[test]
    fn test_unobserved_group_is_dropped() {
        let mut ctx = context_with(ScriptedExecutor::simulated(), 1);
        let mut b = ProgramBuilder::new();
        let s = b.load_string("abc");
        b.build_try_catch(
            |b| {
                let u = b.load_undefined();
                b.set_property("p", s, u);
            },
            |_, _| {},
        );
        let pruned = prune_instrumentation(&b.finalize(), &mut ctx);
        assert_eq!(op_names(&pruned), vec!["LoadString"]);
    }

    #[test]
    fn test_dependents_of_removed_values_go_too() {
        let mut ctx = context_with(ScriptedExecutor::simulated(), 1);
        let mut b = ProgramBuilder::new();
        let s = b.load_string("abc");
        b.build_try_catch(
            |b| {
                let u = b.load_undefined();
                let n = b.load_int(1);
                b.build_if(u, |b| {
                    b.load_int(2);
                });
                b.reassign(n, u);
            },
            |_, _| {},
        );
        b.call_method("upper", s, &[]);
        let program = b.finalize();

        let pruned = prune_instrumentation(&program, &mut ctx);
        pruned.code.check().unwrap();
        assert_eq!(
            op_names(&pruned),
            vec!["LoadString", "BeginTry", "LoadInteger", "BeginCatch", "EndTryCatchFinally", "CallMethod"]
        );
    }

    #[test]
    fn test_pruning_is_idempotent() {
        let mut ctx = context_with(ScriptedExecutor::simulated(), 9);
        let mut mutator = ReflectionMutator::new(MutatorConfig::default());

        let mut b = ProgramBuilder::new();
        let x = b.load_int(3);
        let f = b.load_builtin("len");
        let s = b.load_string("abc");
        b.create_array(&[x, s]);
        b.call_function(f, &[s]);
        let mut program = b.finalize();

        for _ in 0..30 {
            let Some(mutated) = mutator.mutate(&program, &mut ctx) else {
                continue;
            };
            let once = prune_instrumentation(&mutated, &mut ctx);
            let twice = prune_instrumentation(&once, &mut ctx);
            once.code.check().unwrap();
            assert_eq!(once.code, twice.code);
            assert!(!once.code.iter().any(is_record_call));
            program = once;
        }
    }

    #[test]
    fn test_nested_block_in_try_is_removed_whole() {
        let mut b = ProgramBuilder::new();
        let x = b.load_int(1);
        b.build_try_catch(
            |b| {
                b.build_if(x, |b| {
                    b.load_int(2);
                });
                b.load_int(3);
            },
            |_, _| {},
        );
        let program = b.finalize();
        let execution = crate::testing::simulate_hook(&crate::reflection::instrument(&program));
        let reflected = crate::reflection::reflect_on(&program, &execution).unwrap();

        let pruned = prune(&program, Some(&reflected));
        assert_eq!(
            op_names(&pruned),
            vec!["LoadInteger", "BeginTry", "LoadInteger", "BeginCatch", "EndTryCatchFinally"]
        );
        assert!(matches!(pruned.code[2].op(), Operation::LoadInteger { value: 3 }));
    }
}
