//! Executors for tests that must not depend on a Python installation.

use crate::context::FuzzerContext;
use crate::environment::Environment;
use refuzz_core::{Execution, ExecutionOutcome, FuzzerConfig};
use refuzz_ir::{Instruction, Operation, Program, PythonLifter, Variable};
use refuzz_runtime::{program_prefix, Executor, HOOK_BUILTIN};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Script = Box<dyn FnMut(&Program) -> Execution + Send>;

/// Executor whose results come from a closure
pub(crate) struct ScriptedExecutor {
    script: Script,
    lifter: PythonLifter,
    lifted: Arc<Mutex<Vec<String>>>,
    resets: Arc<AtomicUsize>,
}

impl ScriptedExecutor {
    pub(crate) fn new(script: impl FnMut(&Program) -> Execution + Send + 'static) -> Self {
        Self {
            script: Box::new(script),
            lifter: PythonLifter::default().with_prefix(program_prefix()),
            lifted: Arc::new(Mutex::new(Vec::new())),
            resets: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Runs programs against [`simulate_hook`]
    pub(crate) fn simulated() -> Self {
        Self::new(simulate_hook)
    }

    /// Sources of every executed program so far
    pub(crate) fn lifted(&self) -> Vec<String> {
        self.lifted.lock().unwrap().clone()
    }

    pub(crate) fn lifted_handle(&self) -> Arc<Mutex<Vec<String>>> {
        self.lifted.clone()
    }

    pub(crate) fn resets_handle(&self) -> Arc<AtomicUsize> {
        self.resets.clone()
    }
}

impl Executor for ScriptedExecutor {
    fn execute(&mut self, program: &Program, _timeout: Option<Duration>) -> Execution {
        self.lifted.lock().unwrap().push(self.lifter.lift(program));
        (self.script)(program)
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn lift(&self, program: &Program) -> String {
        self.lifter.lift(program)
    }
}

/// Interpret the reflection hook calls of `program` the way the Python
/// hook would for a plausible set of runtime values. Always succeeds.
pub(crate) fn simulate_hook(program: &Program) -> Execution {
    let mut definitions: HashMap<Variable, &Instruction> = HashMap::new();
    let mut fuzzout = String::new();
    for instr in &program.code {
        for &v in instr.all_outputs() {
            definitions.insert(v, instr);
        }
        let Operation::CallMethod { name, .. } = instr.op() else {
            continue;
        };
        let receiver = definitions.get(&instr.input(0)).map(|d| d.op());
        let is_hook = matches!(receiver, Some(Operation::LoadBuiltin { name }) if name == HOOK_BUILTIN);
        if !is_hook || name != "record" {
            continue;
        }
        let index = match definitions.get(&instr.input(2)).map(|d| d.op()) {
            Some(Operation::LoadInteger { value }) => *value,
            _ => continue,
        };
        let Some(value) = definitions.get(&instr.input(1)) else {
            continue;
        };
        if let Some(mut record) = describe(value.op()) {
            record["index"] = json!(index);
            fuzzout.push_str(&record.to_string());
            fuzzout.push('\n');
        }
    }
    Execution::new(ExecutionOutcome::Succeeded).with_fuzzout(fuzzout)
}

fn describe(op: &Operation) -> Option<serde_json::Value> {
    let (kind, type_name, arity, fields, methods) = match op {
        Operation::LoadInteger { .. } | Operation::LoadBigInt { .. } | Operation::LoadBoolean { .. } => (
            "primitive",
            "int".to_string(),
            None,
            vec!["real"],
            vec![("bit_length", "0"), ("to_bytes", "null")],
        ),
        Operation::LoadFloat { .. } => (
            "primitive",
            "float".to_string(),
            None,
            vec!["imag"],
            vec![("is_integer", "0")],
        ),
        Operation::LoadString { .. } => (
            "primitive",
            "str".to_string(),
            None,
            vec![],
            vec![("upper", "0"), ("split", "null")],
        ),
        Operation::LoadBuiltin { name } => (
            "function",
            format!("builtin_function_or_method.{}", name),
            Some(1),
            vec![],
            vec![],
        ),
        Operation::BeginPlainFunction { num_parameters } => (
            "function",
            "function.f".to_string(),
            Some(*num_parameters),
            vec![],
            vec![],
        ),
        Operation::BeginClassDefinition { .. } => {
            ("class", "type.C".to_string(), Some(0), vec![], vec![("mro", "0")])
        }
        Operation::CreateArray { .. } => (
            "object",
            "list".to_string(),
            None,
            vec![],
            vec![("append", "1"), ("pop", "null")],
        ),
        Operation::CallMethod { name, .. } if name == "record" => return None,
        Operation::CallFunction { .. } | Operation::Construct { .. } | Operation::CallMethod { .. } => (
            "object",
            "object".to_string(),
            None,
            vec!["x"],
            vec![("m", "0")],
        ),
        Operation::GetProperty { .. } => (
            "primitive",
            "int".to_string(),
            None,
            vec!["real"],
            vec![("bit_length", "0")],
        ),
        _ => return None,
    };
    let methods: Vec<[&str; 2]> = methods.into_iter().map(|(n, a)| [n, a]).collect();
    Some(json!({
        "kind": kind,
        "type": type_name,
        "arity": arity,
        "fields": fields,
        "methods": methods,
    }))
}

pub(crate) fn context_with(executor: impl Executor + 'static, seed: u64) -> FuzzerContext {
    let environment = Environment::from_builtins(["len", "abs", "math.sqrt"]);
    FuzzerContext::new(
        FuzzerConfig::default(),
        Arc::new(environment),
        Box::new(executor),
        seed,
    )
}
