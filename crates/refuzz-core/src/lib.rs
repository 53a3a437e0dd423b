//! Core types shared by every refuzz crate.
//!
//! Holds the error type, configuration, program identifiers, the execution
//! result model and the reflection wire records emitted by the runtime hook.

pub mod config;
pub mod error;
pub mod execution;
pub mod reflection;
pub mod stats;
pub mod types;

pub use config::*;
pub use error::{Error, Result};
pub use execution::{Execution, ExecutionOutcome};
pub use reflection::{ReflectionRecord, ValueKind};
pub use stats::{SampleKind, SampleStats};
pub use types::*;
