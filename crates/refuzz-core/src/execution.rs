//! Result of running a program in the target interpreter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How an execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    Succeeded,
    /// Non-zero exit code
    Failed(i32),
    /// Terminating signal
    Crashed(i32),
    TimedOut,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded)
    }

    pub fn is_crash(&self) -> bool {
        matches!(self, ExecutionOutcome::Crashed(_))
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOutcome::Succeeded => write!(f, "succeeded"),
            ExecutionOutcome::Failed(code) => write!(f, "failed({})", code),
            ExecutionOutcome::Crashed(signal) => write!(f, "crashed({})", signal),
            ExecutionOutcome::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Everything observed while running one program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub outcome: ExecutionOutcome,
    pub stdout: String,
    pub stderr: String,
    /// Side channel written only by the reflection hook
    pub fuzzout: String,
    pub exec_time: Duration,
}

impl Execution {
    pub fn new(outcome: ExecutionOutcome) -> Self {
        Self {
            outcome,
            stdout: String::new(),
            stderr: String::new(),
            fuzzout: String::new(),
            exec_time: Duration::ZERO,
        }
    }

    pub fn with_fuzzout(mut self, fuzzout: impl Into<String>) -> Self {
        self.fuzzout = fuzzout.into();
        self
    }

    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self.stderr = stderr.into();
        self
    }

    pub fn with_exec_time(mut self, exec_time: Duration) -> Self {
        self.exec_time = exec_time;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_predicates() {
        assert!(ExecutionOutcome::Succeeded.is_success());
        assert!(!ExecutionOutcome::Failed(1).is_success());
        assert!(ExecutionOutcome::Crashed(11).is_crash());
        assert!(!ExecutionOutcome::TimedOut.is_crash());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(ExecutionOutcome::Failed(2).to_string(), "failed(2)");
        assert_eq!(ExecutionOutcome::Crashed(6).to_string(), "crashed(6)");
        assert_eq!(ExecutionOutcome::TimedOut.to_string(), "timed out");
    }
}
