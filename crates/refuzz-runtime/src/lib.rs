//! Execution of lifted programs in the target interpreter.
//!
//! This module provides:
//! - The [`Executor`] abstraction the fuzzing engine runs programs through
//! - An out-of-process Python executor with wall-clock timeouts
//! - The bundled reflection hook module imported by every program

pub mod process;

pub use process::ProcessExecutor;

use refuzz_core::Execution;
use refuzz_ir::Program;
use std::time::Duration;

/// Source of the reflection hook module
pub const HOOK_SCRIPT: &str = include_str!("../python/refuzz_mirror.py");

/// Module name under which the hook is installed
pub const HOOK_MODULE: &str = "refuzz_mirror";

/// Name of the hook object visible to programs
pub const HOOK_BUILTIN: &str = "Mirror";

/// Environment variable naming the side-channel file
pub const FUZZOUT_VAR: &str = "fuzzout";

/// First line of every executed script
pub fn program_prefix() -> String {
    format!("from {} import *\n", HOOK_MODULE)
}

/// Runs programs and reports what happened.
///
/// Implementations never fail outright: problems running the interpreter
/// surface as a failed [`Execution`] so the engine can treat them like any
/// other misbehaving run.
pub trait Executor: Send {
    /// Execute `program`, enforcing `timeout` or the executor's default
    fn execute(&mut self, program: &Program, timeout: Option<Duration>) -> Execution;

    /// Bring the executor back to a clean state after repeated failures
    fn reset(&mut self);

    /// Source text that `execute` would run
    fn lift(&self, program: &Program) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_exports_mirror() {
        assert!(HOOK_SCRIPT.contains("class Mirror"));
        assert!(HOOK_SCRIPT.contains("def record(value, index)"));
        assert!(HOOK_SCRIPT.contains(&format!("os.environ.get(\"{}\")", FUZZOUT_VAR)));
        assert_eq!(program_prefix(), "from refuzz_mirror import *\n");
    }
}
