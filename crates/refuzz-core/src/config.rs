//! Configuration types for the fuzzer.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level fuzzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzerConfig {
    /// Mutation rounds performed on one seed before picking a new one
    pub rounds_per_iteration: usize,
    /// Wall-clock limit for a single program execution (milliseconds)
    pub timeout_ms: u64,
    /// Wall-clock limit for the environment enumeration run (milliseconds)
    pub bootstrap_timeout_ms: u64,
    /// Consecutive seed failures before the executor is reset
    pub failure_threshold: u32,
    /// Prepend a small random preamble to each seed before mutating it
    pub enable_warmup: bool,
    /// Annotate interesting programs with the evaluator's description
    pub enable_inspection: bool,
    /// Attach captured stdout to failing programs
    pub enable_diagnostics: bool,
    /// Base random seed; each worker derives its own stream from it
    pub seed: u64,
    pub mutator: MutatorConfig,
    pub runtime: RuntimeConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            rounds_per_iteration: 8,
            timeout_ms: 1000,
            bootstrap_timeout_ms: 1000,
            failure_threshold: 3,
            enable_warmup: true,
            enable_inspection: false,
            enable_diagnostics: false,
            seed: 0,
            mutator: MutatorConfig::default(),
            runtime: RuntimeConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl FuzzerConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }
}

/// Mutator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MutatorConfig {
    /// Upper bound on reflected instructions picked per reflection mutation
    pub max_selected_targets: usize,
    /// Probability that a synthesized argument reuses a visible variable
    /// instead of loading a fresh literal
    pub reuse_argument_probability: f64,
    /// Prefer rarely chosen method and field names
    pub favor_rare_attributes: bool,
    /// Upper bound on operations rewritten by the operation mutator
    pub max_operation_mutations: usize,
}

impl Default for MutatorConfig {
    fn default() -> Self {
        Self {
            max_selected_targets: 3,
            reuse_argument_probability: 0.8,
            favor_rare_attributes: false,
            max_operation_mutations: 3,
        }
    }
}

/// Target interpreter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interpreter binary
    pub interpreter: PathBuf,
    /// Arguments placed before the script path
    pub interpreter_args: Vec<String>,
    /// Extra environment variables for the child process
    pub env: BTreeMap<String, String>,
    /// Directory for scripts and captured output; a temporary one when unset
    pub work_dir: Option<PathBuf>,
    /// Replacement for the bundled reflection hook script
    pub hook_script: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("python3"),
            interpreter_args: Vec::new(),
            env: BTreeMap::new(),
            work_dir: None,
            hook_script: None,
        }
    }
}

/// Logging and trace export
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// OpenTelemetry endpoint
    pub otel_endpoint: Option<String>,
    /// Emit logs as JSON lines
    pub json_logs: bool,
}
