//! The fuzzing loop.

use crate::context::FuzzerContext;
use crate::corpus::Corpus;
use crate::evaluator::Evaluator;
use crate::events::{Event, Events};
use crate::generators::warm_up;
use crate::mutators::{Mutator, OperationMutator, ReflectionMutator};
use crate::pruning::prune_instrumentation;
use crate::statistics::Statistics;
use rand::Rng;
use refuzz_core::{Execution, ExecutionOutcome, SampleKind};
use refuzz_ir::Program;
use std::sync::Arc;
use tracing::{debug, error, instrument, trace};

/// One worker's fuzzing loop: pick a seed, mutate it for a few rounds,
/// classify every mutant, keep climbing from the last one that ran.
pub struct ReflectionEngine {
    ctx: FuzzerContext,
    mutators: Vec<Box<dyn Mutator>>,
    corpus: Arc<dyn Corpus>,
    evaluator: Arc<dyn Evaluator>,
    events: Events,
    statistics: Arc<Statistics>,
    /// Unexpected failures of known-good seeds in a row
    consecutive_failures: u32,
}

impl ReflectionEngine {
    /// An engine with the reflection and operation mutators registered
    pub fn new(ctx: FuzzerContext, corpus: Arc<dyn Corpus>, evaluator: Arc<dyn Evaluator>) -> Self {
        let mutators: Vec<Box<dyn Mutator>> = vec![
            Box::new(ReflectionMutator::new(ctx.config.mutator.clone())),
            Box::new(OperationMutator::new(ctx.config.mutator.clone())),
        ];
        Self {
            ctx,
            mutators,
            corpus,
            evaluator,
            events: Events::new(),
            statistics: Arc::new(Statistics::new()),
            consecutive_failures: 0,
        }
    }

    pub fn with_mutators(mut self, mutators: Vec<Box<dyn Mutator>>) -> Self {
        self.mutators = mutators;
        self
    }

    pub fn with_events(mut self, events: Events) -> Self {
        self.events = events;
        self
    }

    pub fn with_statistics(mut self, statistics: Arc<Statistics>) -> Self {
        self.statistics = statistics;
        self
    }

    pub fn context(&self) -> &FuzzerContext {
        &self.ctx
    }

    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.statistics
    }

    /// Run one iteration. Returns the program the last round climbed to,
    /// or `None` when the corpus had nothing to offer.
    #[instrument(skip(self))]
    pub fn fuzz_one(&mut self) -> Option<Program> {
        let Some(seed) = self.corpus.random_element_for_mutating(&mut self.ctx.rng) else {
            debug!("corpus is empty");
            return None;
        };
        self.health_check(&seed);

        let mut parent = self.prepare_for_mutating(seed);
        if self.mutators.is_empty() {
            return Some(parent);
        }

        for round in 0..self.ctx.config.rounds_per_iteration {
            let choice = self.ctx.rng.gen_range(0..self.mutators.len());
            let mutator = &mut self.mutators[choice];
            let name = mutator.name();

            let Some(mutated) = mutator.mutate(&parent, &mut self.ctx) else {
                trace!(round, mutator = name, "mutation failed");
                mutator.failed_to_generate();
                self.statistics.failed_to_generate(name);
                continue;
            };
            let delta = mutated.size() as i64 - parent.size() as i64;
            mutator.added_instructions(delta);
            self.statistics.added_instructions(name, delta);

            let execution = self.ctx.execute(&mutated);
            let pruned = prune_instrumentation(&mutated, &mut self.ctx);
            self.events.dispatch(Event::ProgramGenerated(pruned.clone()));
            trace!(round, mutator = name, outcome = %execution.outcome, "round finished");

            if let Some(program) = self.process_execution(pruned, &mutated, &execution) {
                parent = program;
            }
        }
        Some(parent)
    }

    /// Run the unmodified seed. Repeated failures of seeds that are known
    /// to work mean the executor is out of sync; it is reset after
    /// `failure_threshold` of them in a row.
    pub fn health_check(&mut self, seed: &Program) -> bool {
        let execution = self.ctx.execute(seed);
        if execution.outcome.is_success() {
            self.consecutive_failures = 0;
            return true;
        }

        self.consecutive_failures += 1;
        debug!(
            program = %seed.id,
            outcome = %execution.outcome,
            consecutive_failures = self.consecutive_failures,
            "seed failed"
        );
        if self.consecutive_failures >= self.ctx.config.failure_threshold {
            self.dump(seed, &execution);
            self.ctx.reset_executor();
            self.events.dispatch(Event::ExecutorReset {
                consecutive_failures: self.consecutive_failures,
            });
            self.consecutive_failures = 0;
        }
        false
    }

    /// The seed, preceded by a small random preamble when warm-up is
    /// enabled and the result still runs
    pub fn prepare_for_mutating(&mut self, seed: Program) -> Program {
        if !self.ctx.config.enable_warmup {
            return seed;
        }
        let (rng, environment) = self.ctx.rng_and_environment();
        let warmed = warm_up(&seed, environment, rng);
        if self.ctx.execute(&warmed).outcome.is_success() {
            warmed
        } else {
            trace!(program = %seed.id, "warm-up broke the seed");
            seed
        }
    }

    /// Classify one execution. `program` is the pruned form of `executed`.
    /// Returns the program to continue from when the execution succeeded.
    pub fn process_execution(
        &mut self,
        mut program: Program,
        executed: &Program,
        execution: &Execution,
    ) -> Option<Program> {
        match execution.outcome {
            ExecutionOutcome::Crashed(_) => {
                self.statistics.record(&program, SampleKind::Crashing);
                let mut crashing = executed.clone();
                crashing.comments.add_footer(&format!(
                    "{} after {} ms",
                    execution.outcome,
                    execution.exec_time.as_millis()
                ));
                self.events.dispatch(Event::CrashFound {
                    program: crashing,
                    execution: execution.clone(),
                });
                None
            }
            ExecutionOutcome::Succeeded => {
                match self.evaluator.evaluate(execution) {
                    Some(aspects) => {
                        if self.ctx.config.enable_inspection {
                            program
                                .comments
                                .add_footer(&format!("Program may be interesting due to {}", aspects));
                        }
                        self.statistics.record(&program, SampleKind::Interesting);
                        self.corpus.add(program.clone());
                        self.events.dispatch(Event::InterestingProgramFound {
                            program: program.clone(),
                            aspects: aspects.to_string(),
                        });
                    }
                    None => {
                        self.statistics.record(&program, SampleKind::Valid);
                        self.events.dispatch(Event::ValidProgramFound(program.clone()));
                    }
                }
                Some(program)
            }
            ExecutionOutcome::Failed(_) => {
                if self.ctx.config.enable_diagnostics {
                    program
                        .comments
                        .add_footer(&format!("Stdout:\n{}", execution.stdout));
                }
                self.statistics.record(&program, SampleKind::Invalid);
                self.events.dispatch(Event::InvalidProgramFound(program));
                None
            }
            ExecutionOutcome::TimedOut => {
                self.statistics.record(&program, SampleKind::TimedOut);
                self.events.dispatch(Event::TimeOutFound(program));
                None
            }
        }
    }

    fn dump(&self, program: &Program, execution: &Execution) {
        error!(
            program = %program.id,
            source = %self.ctx.lift(program),
            outcome = %execution.outcome,
            stdout = %execution.stdout,
            stderr = %execution.stderr,
            "executor appears out of sync, resetting"
        );
    }
}

impl std::fmt::Debug for ReflectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflectionEngine")
            .field("mutators", &self.mutators.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("corpus", &self.corpus.len())
            .field("consecutive_failures", &self.consecutive_failures)
            .finish_non_exhaustive()
    }
}
