//! Parameter-level mutation of mutable operations.

use super::Mutator;
use crate::context::FuzzerContext;
use crate::environment::Environment;
use crate::reflection::{is_hook_load, is_record_call};
use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;
use refuzz_core::MutatorConfig;
use refuzz_ir::{BinaryOperator, Comparator, Operation, Program, ProgramBuilder, UnaryOperator};
use std::collections::BTreeSet;

/// Rewrites the parameters of a few `MUTABLE` instructions: constants,
/// operators, property and method names. The shape of every instruction
/// is preserved, so the program stays valid.
pub struct OperationMutator {
    config: MutatorConfig,
}

impl OperationMutator {
    pub fn new(config: MutatorConfig) -> Self {
        Self { config }
    }

    fn mutate_operation<R: Rng + ?Sized>(
        &self,
        op: &Operation,
        rng: &mut R,
        environment: &Environment,
    ) -> Operation {
        use Operation::*;
        match op {
            LoadInteger { value } => LoadInteger {
                value: mutate_integer(*value, rng, environment),
            },
            LoadBigInt { value } => LoadBigInt {
                value: mutate_integer(*value, rng, environment),
            },
            LoadFloat { value } => LoadFloat {
                value: if rng.gen_bool(0.5) {
                    environment.random_float(rng)
                } else {
                    value * rng.gen_range(-4.0..4.0)
                },
            },
            LoadString { value } => LoadString {
                value: mutate_string(value, rng, environment),
            },
            LoadBoolean { value } => LoadBoolean { value: !value },
            LoadRegExp { .. } => LoadRegExp {
                pattern: environment.random_regexp(rng),
            },
            LoadBuiltin { name } => LoadBuiltin {
                name: environment
                    .random_builtin(rng)
                    .map(str::to_string)
                    .unwrap_or_else(|| name.clone()),
            },
            GetProperty { .. } => GetProperty {
                name: environment.random_property(rng).to_string(),
            },
            SetProperty { .. } => SetProperty {
                name: environment.random_property(rng).to_string(),
            },
            GetElement { index } => GetElement {
                index: mutate_index(*index, rng),
            },
            SetElement { index } => SetElement {
                index: mutate_index(*index, rng),
            },
            CallMethod { num_arguments, .. } => CallMethod {
                name: environment.random_method(rng).to_string(),
                num_arguments: *num_arguments,
            },
            UnaryOperation { op } => UnaryOperation {
                op: other_than(&UnaryOperator::ALL, op, rng),
            },
            BinaryOperation { op } => BinaryOperation {
                op: other_than(&BinaryOperator::ALL, op, rng),
            },
            Update { op } => Update {
                op: other_than(&BinaryOperator::ALL, op, rng),
            },
            Compare { op } => Compare {
                op: other_than(&Comparator::ALL, op, rng),
            },
            BeginWhileLoop { comparator } => BeginWhileLoop {
                comparator: other_than(&Comparator::ALL, comparator, rng),
            },
            BeginIf { inverted } => BeginIf {
                inverted: !inverted,
            },
            BeginClassMethod {
                num_parameters, ..
            } => BeginClassMethod {
                name: environment.random_method(rng).to_string(),
                num_parameters: *num_parameters,
            },
            other => other.clone(),
        }
    }
}

impl Default for OperationMutator {
    fn default() -> Self {
        Self::new(MutatorConfig::default())
    }
}

impl Mutator for OperationMutator {
    fn name(&self) -> &'static str {
        "OperationMutator"
    }

    fn mutate(&mut self, program: &Program, ctx: &mut FuzzerContext) -> Option<Program> {
        let (rng, environment) = ctx.rng_and_environment();
        let mutable: Vec<usize> = program
            .code
            .iter()
            .filter(|i| i.is_mutable() && !is_hook_load(i) && !is_record_call(i))
            .map(|i| i.index())
            .collect();
        if mutable.is_empty() {
            return None;
        }
        let count = rng.gen_range(1..=self.config.max_operation_mutations.max(1));
        let chosen: BTreeSet<usize> = mutable
            .iter()
            .copied()
            .choose_multiple(rng, count)
            .into_iter()
            .collect();

        let mut b = ProgramBuilder::derived_from(program);
        b.set_contributors(program.contributors.clone());
        b.add_contributor(self.name());
        b.begin_adoption();
        for instr in &program.code {
            if chosen.contains(&instr.index()) {
                let op = self.mutate_operation(instr.op(), rng, environment);
                b.adopt_as(instr, op);
            } else {
                b.adopt(instr);
            }
        }
        Some(b.finalize())
    }
}

fn mutate_integer<R: Rng + ?Sized>(value: i64, rng: &mut R, environment: &Environment) -> i64 {
    match rng.gen_range(0..3) {
        0 => environment.random_int(rng),
        1 => value.wrapping_add(rng.gen_range(-16..=16)),
        _ => value.wrapping_neg(),
    }
}

fn mutate_string<R: Rng + ?Sized>(value: &str, rng: &mut R, environment: &Environment) -> String {
    if value.is_empty() || rng.gen_bool(0.5) {
        return environment.random_string(rng);
    }
    let mut chars: Vec<char> = value.chars().collect();
    let position = rng.gen_range(0..chars.len());
    match rng.gen_range(0..3) {
        0 => {
            chars.remove(position);
        }
        1 => chars.insert(position, char::from(rng.gen_range(0x20u8..0x7f))),
        _ => chars.truncate(position),
    }
    chars.into_iter().collect()
}

fn mutate_index<R: Rng + ?Sized>(index: i64, rng: &mut R) -> i64 {
    if rng.gen_bool(0.5) {
        rng.gen_range(-2..=8)
    } else {
        index.wrapping_add(rng.gen_range(-2..=2))
    }
}

/// A random element of `choices` different from `current` when possible
fn other_than<T: Copy + PartialEq, R: Rng + ?Sized>(choices: &[T], current: &T, rng: &mut R) -> T {
    let others: Vec<T> = choices.iter().copied().filter(|c| c != current).collect();
    others.choose(rng).copied().unwrap_or(*current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflection::RECORD_METHOD;
    use crate::testing::{context_with, ScriptedExecutor};
    use rand::SeedableRng;
    use refuzz_runtime::HOOK_BUILTIN;

    #[test]
    fn test_mutates_only_parameters() {
        let mut ctx = context_with(ScriptedExecutor::simulated(), 2);
        let mut mutator = OperationMutator::default();

        let mut b = ProgramBuilder::new();
        let x = b.load_int(1);
        let y = b.load_int(2);
        let sum = b.binary(x, y, BinaryOperator::Add);
        b.call_method("append", sum, &[x]);
        let program = b.finalize();

        let ops = |p: &Program| p.code.iter().map(|i| i.op().clone()).collect::<Vec<_>>();
        let mut changed = 0;
        for _ in 0..50 {
            let mutated = mutator.mutate(&program, &mut ctx).unwrap();
            mutated.code.check().unwrap();
            assert_eq!(mutated.size(), program.size());
            if ops(&mutated) != ops(&program) {
                changed += 1;
            }
            for (old, new) in program.code.iter().zip(mutated.code.iter()) {
                assert_eq!(old.op().name(), new.op().name());
                assert_eq!(old.inouts(), new.inouts());
            }
            assert!(mutated.contributors.contains("OperationMutator"));
        }
        assert!(changed > 40);
    }

    #[test]
    fn test_hook_scaffolding_is_left_alone() {
        let mut ctx = context_with(ScriptedExecutor::simulated(), 6);
        let mut mutator = OperationMutator::default();

        let mut b = ProgramBuilder::new();
        let s = b.load_string("abc");
        b.build_try_catch(
            |b| {
                let index = b.load_int(3);
                let upper = b.call_method("upper", s, &[]);
                let hook = b.reuse_or_load_builtin(HOOK_BUILTIN);
                b.call_method(RECORD_METHOD, hook, &[upper, index]);
            },
            |_, _| {},
        );
        let program = b.finalize();
        let scaffolding = |p: &Program| {
            p.code
                .iter()
                .filter(|i| is_hook_load(i) || is_record_call(i))
                .map(|i| (i.index(), i.op().clone()))
                .collect::<Vec<_>>()
        };
        let expected = scaffolding(&program);
        assert_eq!(expected.len(), 2);

        for _ in 0..100 {
            let mutated = mutator.mutate(&program, &mut ctx).unwrap();
            assert_eq!(scaffolding(&mutated), expected);
        }
    }

    #[test]
    fn test_declines_without_mutable_instructions() {
        let mut ctx = context_with(ScriptedExecutor::simulated(), 2);
        let mut mutator = OperationMutator::default();
        let mut b = ProgramBuilder::new();
        b.load_undefined();
        b.load_null();
        assert!(mutator.mutate(&b.finalize(), &mut ctx).is_none());
    }

    #[test]
    fn test_operator_changes() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(4);
        for _ in 0..20 {
            let op = other_than(&Comparator::ALL, &Comparator::Equal, &mut rng);
            assert_ne!(op, Comparator::Equal);
        }
        assert_eq!(other_than(&[1], &1, &mut rng), 1);
    }
}
