//! Trivial code generators used to warm up a seed before mutation.

use crate::environment::Environment;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use refuzz_ir::{Program, ProgramBuilder};

/// Emits a few low-risk instructions into a builder
pub type Generator = fn(&mut ProgramBuilder, &Environment, &mut ChaCha8Rng);

/// Named warm-up generators
pub const GENERATORS: &[(&str, Generator)] = &[
    ("IntegerGenerator", integer_generator),
    ("FloatGenerator", float_generator),
    ("StringGenerator", string_generator),
    ("BooleanGenerator", boolean_generator),
    ("BuiltinGenerator", builtin_generator),
];

pub fn integer_generator(b: &mut ProgramBuilder, env: &Environment, rng: &mut ChaCha8Rng) {
    b.load_int(env.random_int(rng));
}

pub fn float_generator(b: &mut ProgramBuilder, env: &Environment, rng: &mut ChaCha8Rng) {
    b.load_float(env.random_float(rng));
}

pub fn string_generator(b: &mut ProgramBuilder, env: &Environment, rng: &mut ChaCha8Rng) {
    let value = env.random_string(rng);
    b.load_string(&value);
}

pub fn boolean_generator(b: &mut ProgramBuilder, _env: &Environment, rng: &mut ChaCha8Rng) {
    b.load_bool(rng.gen());
}

pub fn builtin_generator(b: &mut ProgramBuilder, env: &Environment, rng: &mut ChaCha8Rng) {
    match env.random_builtin(rng) {
        Some(name) => {
            b.load_builtin(name);
        }
        None => {
            b.load_int(env.random_int(rng));
        }
    }
}

/// `seed` preceded by one random generator and one or two builtin loads
pub fn warm_up(seed: &Program, env: &Environment, rng: &mut ChaCha8Rng) -> Program {
    let mut b = ProgramBuilder::derived_from(seed);
    b.set_contributors(seed.contributors.clone());
    if let Some((_, generator)) = GENERATORS.choose(rng) {
        generator(&mut b, env, rng);
    }
    for _ in 0..rng.gen_range(1..=2) {
        builtin_generator(&mut b, env, rng);
    }
    b.append_program(seed);
    b.finalize()
}
