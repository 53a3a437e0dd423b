//! Reflection-guided mutation.
//!
//! The mutator first observes the program (see [`crate::reflection`]) and
//! then copies it, appending operations that fit the observed shape of a
//! few recorded values: method calls and field accesses on objects, direct
//! calls of functions, constructions of classes.

use super::Mutator;
use crate::context::FuzzerContext;
use crate::environment::Environment;
use crate::reflection::{observe, ReflectedProgram, RECORD_METHOD};
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use refuzz_core::{MutatorConfig, ReflectionRecord, ValueKind};
use refuzz_ir::{Program, ProgramBuilder, Variable};
use refuzz_runtime::HOOK_BUILTIN;
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

/// Extra arguments beyond a known arity and their weights. Never fewer
/// than the required parameters.
const KNOWN_ARITY_EXTRAS: [(usize, u32); 2] = [(0, 4), (1, 1)];

/// Argument counts for callables of unknown arity and their weights
const UNKNOWN_ARITY_COUNTS: [(usize, u32); 4] = [(0, 4), (1, 4), (2, 2), (3, 1)];

/// Probability that a field access reads rather than writes
const FIELD_READ_PROBABILITY: f64 = 0.9;

/// Follow-on probabilities for one value kind
struct FollowOn {
    invoke: f64,
    methods: f64,
    fields: f64,
}

impl FollowOn {
    fn of(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Primitive => FollowOn {
                invoke: 0.0,
                methods: 0.5,
                fields: 0.5,
            },
            ValueKind::Object => FollowOn {
                invoke: 0.0,
                methods: 0.8,
                fields: 0.8,
            },
            ValueKind::Function => FollowOn {
                invoke: 0.8,
                methods: 0.2,
                fields: 0.2,
            },
            ValueKind::Class => FollowOn {
                invoke: 0.8,
                methods: 0.5,
                fields: 0.2,
            },
        }
    }
}

pub struct ReflectionMutator {
    config: MutatorConfig,
    /// How often each method or field name has been chosen
    attribute_frequencies: HashMap<String, u64>,
    failures: u64,
    added: i64,
}

impl ReflectionMutator {
    pub fn new(config: MutatorConfig) -> Self {
        Self {
            config,
            attribute_frequencies: HashMap::new(),
            failures: 0,
            added: 0,
        }
    }

    pub fn attribute_frequency(&self, name: &str) -> u64 {
        self.attribute_frequencies.get(name).copied().unwrap_or(0)
    }

    /// Copy the reflected program, appending follow-on operations after
    /// a few recorded instructions
    pub fn synthesize<R: Rng + ?Sized>(
        &mut self,
        reflected: &ReflectedProgram,
        rng: &mut R,
        environment: &Environment,
    ) -> Program {
        let program = &reflected.program;
        let selected = self.select_targets(reflected, rng);

        let mut b = ProgramBuilder::derived_from(program);
        b.set_contributors(program.contributors.clone());
        b.add_contributor(self.name());
        b.begin_adoption();
        for instr in &program.code {
            b.adopt(instr);
            if !selected.contains(&instr.index()) || !instr.has_one_output() {
                continue;
            }
            let Some(record) = reflected.record(instr.index()) else {
                continue;
            };
            let value = b.adopted(instr.output());
            self.follow_on(&mut b, record, value, rng, environment);
        }
        b.finalize()
    }

    /// Between one and `max_selected_targets` recorded indices, drawn
    /// uniformly with replacement
    fn select_targets<R: Rng + ?Sized>(&self, reflected: &ReflectedProgram, rng: &mut R) -> BTreeSet<usize> {
        let candidates = reflected.reflected_indices();
        let count = rng.gen_range(1..=self.config.max_selected_targets.max(1));
        (0..count)
            .filter_map(|_| candidates.choose(rng).copied())
            .collect()
    }

    fn follow_on<R: Rng + ?Sized>(
        &mut self,
        b: &mut ProgramBuilder,
        record: &ReflectionRecord,
        value: Variable,
        rng: &mut R,
        environment: &Environment,
    ) {
        let odds = FollowOn::of(record.kind);
        trace!(kind = %record.kind, type_name = %record.type_name, "synthesizing follow-ons");

        if rng.gen_bool(odds.invoke) {
            let args = self.generate_arguments(b, record.arity, rng, environment);
            match record.kind {
                ValueKind::Class => wrap_reflected_call(b, |b| b.construct(value, &args)),
                _ => wrap_reflected_call(b, |b| b.call_function(value, &args)),
            }
        }
        if rng.gen_bool(odds.methods) {
            self.call_random_methods(b, &record.methods, value, rng, environment);
        }
        if rng.gen_bool(odds.fields) {
            self.access_random_fields(b, &record.fields, value, rng, environment);
        }
    }

    fn call_random_methods<R: Rng + ?Sized>(
        &mut self,
        b: &mut ProgramBuilder,
        methods: &[(String, String)],
        receiver: Variable,
        rng: &mut R,
        environment: &Environment,
    ) {
        if methods.is_empty() {
            return;
        }
        let names: Vec<String> = methods.iter().map(|(name, _)| name.clone()).collect();
        for _ in 0..rng.gen_range(1..=3) {
            let choice = self.select_attribute(&names, rng);
            let (name, arity) = &methods[choice];
            let args = self.generate_arguments(b, ReflectionRecord::method_arity(arity), rng, environment);
            wrap_reflected_call(b, |b| b.call_method(name, receiver, &args));
        }
    }

    fn access_random_fields<R: Rng + ?Sized>(
        &mut self,
        b: &mut ProgramBuilder,
        fields: &[String],
        object: Variable,
        rng: &mut R,
        environment: &Environment,
    ) {
        if fields.is_empty() {
            return;
        }
        for _ in 0..rng.gen_range(1..=3) {
            let name = &fields[self.select_attribute(fields, rng)];
            if rng.gen_bool(FIELD_READ_PROBABILITY) {
                b.get_property(name, object);
            } else {
                let value = self.argument(b, rng, environment);
                b.build_try_catch(|b| b.set_property(name, object, value), |_, _| {});
            }
        }
    }

    /// Index into `names`, uniform or favoring rarely chosen names
    fn select_attribute<R: Rng + ?Sized>(&mut self, names: &[String], rng: &mut R) -> usize {
        let choice = if self.config.favor_rare_attributes {
            let counts: Vec<u64> = names
                .iter()
                .map(|n| self.attribute_frequencies.get(n).copied().unwrap_or(1).max(1))
                .collect();
            let total: u64 = counts.iter().sum();
            let weights = counts.iter().map(|c| (total / c).max(1));
            match WeightedIndex::new(weights) {
                Ok(dist) => dist.sample(rng),
                Err(_) => rng.gen_range(0..names.len()),
            }
        } else {
            rng.gen_range(0..names.len())
        };
        *self
            .attribute_frequencies
            .entry(names[choice].clone())
            .or_insert(0) += 1;
        choice
    }

    fn generate_arguments<R: Rng + ?Sized>(
        &self,
        b: &mut ProgramBuilder,
        arity: Option<usize>,
        rng: &mut R,
        environment: &Environment,
    ) -> Vec<Variable> {
        let count = argument_count(arity, rng);
        (0..count).map(|_| self.argument(b, rng, environment)).collect()
    }

    /// A visible variable or a fresh value of any type
    fn argument<R: Rng + ?Sized>(
        &self,
        b: &mut ProgramBuilder,
        rng: &mut R,
        environment: &Environment,
    ) -> Variable {
        if rng.gen_bool(self.config.reuse_argument_probability.clamp(0.0, 1.0)) {
            if let Some(v) = b.random_variable(rng) {
                return v;
            }
        }
        match rng.gen_range(0..6) {
            0 => b.load_int(environment.random_int(rng)),
            1 => b.load_float(environment.random_float(rng)),
            2 => {
                let s = environment.random_string(rng);
                b.load_string(&s)
            }
            3 => b.load_bool(rng.gen()),
            4 => match environment.random_builtin(rng) {
                Some(name) => b.load_builtin(name),
                None => b.load_null(),
            },
            _ => b.load_null(),
        }
    }
}

impl Default for ReflectionMutator {
    fn default() -> Self {
        Self::new(MutatorConfig::default())
    }
}

impl Mutator for ReflectionMutator {
    fn name(&self) -> &'static str {
        "ReflectionMutator"
    }

    fn mutate(&mut self, program: &Program, ctx: &mut FuzzerContext) -> Option<Program> {
        let reflected = observe(program, ctx)?;
        let (rng, environment) = ctx.rng_and_environment();
        Some(self.synthesize(&reflected, rng, environment))
    }

    fn added_instructions(&mut self, delta: i64) {
        self.added += delta;
        trace!(delta, total = self.added, "reflection mutation added instructions");
    }

    fn failed_to_generate(&mut self) {
        self.failures += 1;
        trace!(failures = self.failures, "reflection mutation declined");
    }
}

/// Number of arguments to pass to a callable
fn argument_count<R: Rng + ?Sized>(arity: Option<usize>, rng: &mut R) -> usize {
    match arity {
        Some(arity) => arity + weighted(&KNOWN_ARITY_EXTRAS, rng).unwrap_or(0),
        None => weighted(&UNKNOWN_ARITY_COUNTS, rng).unwrap_or(0),
    }
}

fn weighted<T: Copy, R: Rng + ?Sized>(choices: &[(T, u32)], rng: &mut R) -> Option<T> {
    let dist = WeightedIndex::new(choices.iter().map(|(_, w)| *w)).ok()?;
    Some(choices[dist.sample(rng)].0)
}

/// Emit the call produced by `call` inside a try block and report its
/// result, tagged with the call's index, to the hook
fn wrap_reflected_call(b: &mut ProgramBuilder, call: impl FnOnce(&mut ProgramBuilder) -> Variable) {
    b.build_try_catch(
        |b| {
            let call_index = b.next_index() + 1;
            let index = b.load_int(call_index as i64);
            let result = call(b);
            let hook = b.reuse_or_load_builtin(HOOK_BUILTIN);
            b.call_method(RECORD_METHOD, hook, &[result, index]);
        },
        |_, _| {},
    );
}
