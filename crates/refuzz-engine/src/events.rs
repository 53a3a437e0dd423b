//! Lifecycle notifications for observers outside the fuzzing loop.

use refuzz_core::Execution;
use refuzz_ir::Program;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub enum Event {
    ProgramGenerated(Program),
    ValidProgramFound(Program),
    InterestingProgramFound { program: Program, aspects: String },
    InvalidProgramFound(Program),
    TimeOutFound(Program),
    CrashFound { program: Program, execution: Execution },
    ExecutorReset { consecutive_failures: u32 },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ProgramGenerated(_) => "program_generated",
            Event::ValidProgramFound(_) => "valid_program_found",
            Event::InterestingProgramFound { .. } => "interesting_program_found",
            Event::InvalidProgramFound(_) => "invalid_program_found",
            Event::TimeOutFound(_) => "timeout_found",
            Event::CrashFound { .. } => "crash_found",
            Event::ExecutorReset { .. } => "executor_reset",
        }
    }
}

/// Receives lifecycle events. Observers run synchronously on the worker
/// thread and must not block for long.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> EventObserver for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

/// Observer registry; every event is also written to the log
#[derive(Clone, Default)]
pub struct Events {
    observers: Vec<Arc<dyn EventObserver>>,
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Arc<dyn EventObserver>) {
        self.observers.push(observer);
    }

    pub fn dispatch(&self, event: Event) {
        log_event(&event);
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Events")
            .field("observers", &self.observers.len())
            .finish()
    }
}

fn log_event(event: &Event) {
    let name = event.name();
    match event {
        Event::ProgramGenerated(p)
        | Event::ValidProgramFound(p)
        | Event::InvalidProgramFound(p)
        | Event::TimeOutFound(p) => {
            debug!(event = name, program = %p.id, size = p.size());
        }
        Event::InterestingProgramFound { program, aspects } => {
            info!(event = name, program = %program.id, size = program.size(), aspects = %aspects);
        }
        Event::CrashFound { program, execution } => {
            warn!(
                event = name,
                program = %program.id,
                outcome = %execution.outcome,
                exec_time_ms = execution.exec_time.as_millis() as u64,
            );
        }
        Event::ExecutorReset {
            consecutive_failures,
        } => {
            warn!(event = name, consecutive_failures = *consecutive_failures);
        }
    }
}
