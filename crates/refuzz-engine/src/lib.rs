//! Reflection-guided fuzzing engine.
//!
//! The engine repeatedly takes a program from the corpus, mutates it a few
//! times and runs every mutant through an [`refuzz_runtime::Executor`].
//! The main mutator observes the runtime values of a program through the
//! `Mirror` hook and appends method calls, field accesses and invocations
//! that fit what it saw. Guarded scaffolding that did not produce anything
//! observable is pruned before a mutant becomes the next parent.

pub mod context;
pub mod corpus;
pub mod engine;
pub mod environment;
pub mod evaluator;
pub mod events;
pub mod generators;
pub mod mutators;
pub mod pruning;
pub mod reflection;
pub mod statistics;

#[cfg(test)]
mod testing;

pub use context::FuzzerContext;
pub use corpus::{Corpus, InMemoryCorpus};
pub use engine::ReflectionEngine;
pub use environment::Environment;
pub use evaluator::{Aspects, Evaluator, TypeNoveltyEvaluator};
pub use events::{Event, EventObserver, Events};
pub use mutators::{Mutator, OperationMutator, ReflectionMutator};
pub use reflection::ReflectedProgram;
pub use statistics::Statistics;
