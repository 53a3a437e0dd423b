//! Model of the target's builtins and of interesting literal values.
//!
//! The builtin list comes from the target itself: at startup a program
//! calls `Mirror.enumerate()` and the hook writes a JSON array of builtin
//! paths (`math.sqrt`, `len`, ...) to the side channel.

use rand::seq::SliceRandom;
use rand::Rng;
use refuzz_core::{Error, Result};
use refuzz_ir::ProgramBuilder;
use refuzz_runtime::{Executor, HOOK_BUILTIN};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{error, info};

/// Integers that tend to hit edge cases in numeric code
pub const INTERESTING_INTEGERS: &[i64] = &[
    i64::MIN,
    i64::MIN + 1,
    -9007199254740992,
    -9007199254740991,
    -9007199254740990,
    -4294967297,
    -4294967296,
    -4294967295,
    -2147483649,
    -2147483648,
    -2147483647,
    -1073741824,
    -536870912,
    -268435456,
    -65537,
    -65536,
    -65535,
    -4096,
    -1024,
    -256,
    -128,
    -2,
    -1,
    0,
    1,
    2,
    3,
    4,
    5,
    6,
    7,
    8,
    9,
    10,
    16,
    64,
    127,
    128,
    129,
    255,
    256,
    257,
    512,
    1000,
    1024,
    4096,
    10000,
    65535,
    65536,
    65537,
    268435456,
    536870912,
    1073741824,
    2147483647,
    2147483648,
    2147483649,
    4294967295,
    4294967296,
    4294967297,
    9007199254740990,
    9007199254740991,
    9007199254740992,
    i64::MAX - 1,
    i64::MAX,
];

/// Floats that tend to hit edge cases in numeric code
pub const INTERESTING_FLOATS: &[f64] = &[
    f64::NEG_INFINITY,
    f64::MIN,
    -1e-15,
    -1e12,
    -1e9,
    -1e6,
    -1e3,
    -5.0,
    -4.0,
    -3.0,
    -2.0,
    -1.0,
    -f64::EPSILON,
    -f64::MIN_POSITIVE,
    -0.0,
    0.0,
    f64::MIN_POSITIVE,
    f64::EPSILON,
    1.0,
    2.0,
    3.0,
    4.0,
    5.0,
    1e3,
    1e6,
    1e9,
    1e12,
    1e-15,
    f64::MAX,
    f64::INFINITY,
    f64::NAN,
];

pub const INTERESTING_REGEXPS: &[&str] = &[".", "\\d", "\\w", "\\s", "\\D", "\\W", "\\S"];

/// What the fuzzer knows about the target interpreter
#[derive(Debug, Clone)]
pub struct Environment {
    builtins: Vec<String>,
    builtin_properties: Vec<String>,
    builtin_methods: Vec<String>,
    custom_properties: Vec<String>,
    custom_methods: Vec<String>,
    interesting_strings: Vec<String>,
}

impl Environment {
    /// Build the model from enumerated builtin paths
    pub fn from_builtins<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let builtins: BTreeSet<String> = paths.into_iter().map(Into::into).collect();
        let components: BTreeSet<String> = builtins
            .iter()
            .flat_map(|path| path.split(['.', ':', '-', '>']))
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();

        let mut names: BTreeSet<String> = components.clone();
        names.insert("p".to_string());
        let builtin_properties: Vec<String> = names.iter().cloned().collect();
        names.remove("p");
        names.insert("m".to_string());
        let builtin_methods: Vec<String> = names.into_iter().collect();

        let mut interesting_strings = vec![String::new()];
        interesting_strings.extend(components);

        Self {
            builtins: builtins.into_iter().collect(),
            builtin_properties,
            builtin_methods,
            custom_properties: vec!["p".to_string()],
            custom_methods: vec!["m".to_string()],
            interesting_strings,
        }
    }

    /// Ask the target for its builtins. Failure leaves the fuzzer with no
    /// model of the target and is fatal.
    pub fn bootstrap(executor: &mut dyn Executor, timeout: Duration) -> Result<Self> {
        let mut b = ProgramBuilder::new();
        let hook = b.load_builtin(HOOK_BUILTIN);
        b.call_method("enumerate", hook, &[]);
        let program = b.finalize();

        let execution = executor.execute(&program, Some(timeout));
        let paths = match serde_json::from_str::<Vec<String>>(execution.fuzzout.trim()) {
            Ok(paths) if execution.outcome.is_success() => paths,
            decoded => {
                error!(
                    source = %executor.lift(&program),
                    outcome = %execution.outcome,
                    stdout = %execution.stdout,
                    stderr = %execution.stderr,
                    fuzzout = %execution.fuzzout,
                    "builtin enumeration failed"
                );
                let reason = match decoded {
                    Err(e) => format!("undecodable builtin list: {}", e),
                    Ok(_) => format!("enumeration {}", execution.outcome),
                };
                return Err(Error::Bootstrap(reason));
            }
        };

        let environment = Self::from_builtins(paths);
        info!(
            event = "environment_ready",
            builtins = environment.builtins.len(),
            builtin_properties = environment.builtin_properties.len(),
            builtin_methods = environment.builtin_methods.len(),
            custom_properties = environment.custom_properties.len(),
            custom_methods = environment.custom_methods.len(),
        );
        Ok(environment)
    }

    pub fn builtins(&self) -> &[String] {
        &self.builtins
    }

    pub fn interesting_strings(&self) -> &[String] {
        &self.interesting_strings
    }

    pub fn random_builtin<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        self.builtins.choose(rng).map(String::as_str)
    }

    /// A property name, usually one seen on a builtin
    pub fn random_property<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        pick_name(rng, &self.builtin_properties, &self.custom_properties)
    }

    /// A method name, usually one seen on a builtin
    pub fn random_method<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        pick_name(rng, &self.builtin_methods, &self.custom_methods)
    }

    pub fn random_int<R: Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        if rng.gen_bool(0.5) {
            INTERESTING_INTEGERS.choose(rng).copied().unwrap_or(0)
        } else {
            rng.gen_range(-0x1000..=0x1000)
        }
    }

    pub fn random_float<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if rng.gen_bool(0.5) {
            INTERESTING_FLOATS.choose(rng).copied().unwrap_or(0.0)
        } else {
            rng.gen_range(-1e6..1e6)
        }
    }

    pub fn random_string<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        if rng.gen_bool(0.7) {
            if let Some(s) = self.interesting_strings.choose(rng) {
                return s.clone();
            }
        }
        let len = rng.gen_range(0..8);
        (0..len)
            .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
            .collect()
    }

    pub fn random_regexp<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let atom = INTERESTING_REGEXPS.choose(rng).copied().unwrap_or(".");
        let quantifier = ["", "*", "+", "?"].choose(rng).copied().unwrap_or("");
        format!("{}{}", atom, quantifier)
    }
}

impl Default for Environment {
    /// An environment without enumerated builtins
    fn default() -> Self {
        Self::from_builtins(Vec::<String>::new())
    }
}

fn pick_name<'a, R: Rng + ?Sized>(rng: &mut R, builtin: &'a [String], custom: &'a [String]) -> &'a str {
    let pool = if builtin.is_empty() || rng.gen_bool(0.1) {
        custom
    } else {
        builtin
    };
    pool.choose(rng).map(String::as_str).unwrap_or("p")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedExecutor;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use refuzz_core::{Execution, ExecutionOutcome};

    #[test]
    fn test_from_builtins_splits_paths() {
        let env = Environment::from_builtins(["len", "math.sqrt", "collections.OrderedDict"]);
        assert_eq!(env.builtins().len(), 3);
        for name in ["len", "math", "sqrt", "collections", "OrderedDict"] {
            assert!(env.builtin_methods.iter().any(|m| m == name), "{}", name);
            assert!(env.builtin_properties.iter().any(|p| p == name), "{}", name);
            assert!(env.interesting_strings().iter().any(|s| s == name), "{}", name);
        }
        assert!(env.interesting_strings().contains(&String::new()));
    }

    #[test]
    fn test_bootstrap_decodes_enumeration() {
        let mut executor = ScriptedExecutor::new(|_program| {
            Execution::new(ExecutionOutcome::Succeeded).with_fuzzout("[\"len\", \"math.pi\"]\n")
        });
        let env = Environment::bootstrap(&mut executor, Duration::from_millis(1000)).unwrap();
        assert_eq!(env.builtins(), &["len".to_string(), "math.pi".to_string()]);

        let source = executor.lifted().pop().unwrap();
        assert!(source.contains("Mirror.enumerate()"));
    }

    #[test]
    fn test_bootstrap_failure_is_fatal() {
        let mut executor = ScriptedExecutor::new(|_program| {
            Execution::new(ExecutionOutcome::Succeeded).with_fuzzout("Traceback")
        });
        let err = Environment::bootstrap(&mut executor, Duration::from_millis(1000)).unwrap_err();
        assert!(matches!(err, Error::Bootstrap(_)));

        let mut executor = ScriptedExecutor::new(|_program| {
            Execution::new(ExecutionOutcome::Failed(1)).with_fuzzout("[]")
        });
        let err = Environment::bootstrap(&mut executor, Duration::from_millis(1000)).unwrap_err();
        assert!(matches!(err, Error::Bootstrap(_)));
    }

    #[test]
    fn test_random_names_fall_back_to_custom() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let env = Environment::default();
        assert!(env.random_builtin(&mut rng).is_none());
        assert_eq!(env.random_method(&mut rng), "m");
        assert_eq!(env.random_property(&mut rng), "p");
    }
}
