//! Per-worker state shared by the engine and its mutators.

use crate::environment::Environment;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use refuzz_core::{Execution, FuzzerConfig};
use refuzz_ir::Program;
use refuzz_runtime::Executor;
use std::sync::Arc;
use std::time::Duration;

/// Everything a mutation or an execution needs.
///
/// Owned by exactly one worker. The environment is shared read-only
/// between workers.
pub struct FuzzerContext {
    pub rng: ChaCha8Rng,
    pub config: FuzzerConfig,
    pub environment: Arc<Environment>,
    executor: Box<dyn Executor>,
}

impl FuzzerContext {
    pub fn new(
        config: FuzzerConfig,
        environment: Arc<Environment>,
        executor: Box<dyn Executor>,
        seed: u64,
    ) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            config,
            environment,
            executor,
        }
    }

    /// Run `program` under the configured timeout
    pub fn execute(&mut self, program: &Program) -> Execution {
        let timeout = self.config.timeout();
        self.executor.execute(program, Some(timeout))
    }

    pub fn execute_with_timeout(&mut self, program: &Program, timeout: Duration) -> Execution {
        self.executor.execute(program, Some(timeout))
    }

    pub fn reset_executor(&mut self) {
        self.executor.reset();
    }

    pub fn lift(&self, program: &Program) -> String {
        self.executor.lift(program)
    }

    /// Split into the RNG and the environment so both can be borrowed
    /// while building a program
    pub fn rng_and_environment(&mut self) -> (&mut ChaCha8Rng, &Environment) {
        (&mut self.rng, &self.environment)
    }
}

impl std::fmt::Debug for FuzzerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuzzerContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
