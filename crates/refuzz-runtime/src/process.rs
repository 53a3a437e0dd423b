//! Out-of-process execution in a Python interpreter.

use crate::{program_prefix, Executor, FUZZOUT_VAR, HOOK_MODULE, HOOK_SCRIPT};
use refuzz_core::{Execution, ExecutionOutcome, Result, RuntimeConfig};
use refuzz_ir::{LiftingOptions, Program, PythonLifter};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};

const SCRIPT_FILE: &str = "program.py";
const STDOUT_FILE: &str = "stdout.txt";
const STDERR_FILE: &str = "stderr.txt";
const FUZZOUT_FILE: &str = "fuzzout.txt";

/// Poll interval while waiting for the interpreter to exit
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Where scripts and captured output live
#[derive(Debug)]
enum WorkDir {
    /// Removed when the executor is dropped
    Temporary(TempDir),
    Fixed(PathBuf),
}

impl WorkDir {
    fn path(&self) -> &Path {
        match self {
            WorkDir::Temporary(dir) => dir.path(),
            WorkDir::Fixed(path) => path,
        }
    }
}

/// Runs each program in a fresh interpreter process
#[derive(Debug)]
pub struct ProcessExecutor {
    config: RuntimeConfig,
    lifter: PythonLifter,
    hook_source: String,
    work_dir: WorkDir,
    default_timeout: Duration,
}

impl ProcessExecutor {
    pub fn new(config: RuntimeConfig, default_timeout: Duration) -> Result<Self> {
        let work_dir = match &config.work_dir {
            Some(path) => {
                fs::create_dir_all(path)?;
                WorkDir::Fixed(path.clone())
            }
            None => WorkDir::Temporary(tempfile::Builder::new().prefix("refuzz-").tempdir()?),
        };
        let hook_source = match &config.hook_script {
            Some(path) => fs::read_to_string(path)?,
            None => HOOK_SCRIPT.to_string(),
        };
        let lifter = PythonLifter::new(LiftingOptions::default()).with_prefix(program_prefix());

        let executor = Self {
            config,
            lifter,
            hook_source,
            work_dir,
            default_timeout,
        };
        executor.install_hook()?;
        info!(
            event = "executor_ready",
            interpreter = %executor.config.interpreter.display(),
            work_dir = %executor.work_dir().display(),
        );
        Ok(executor)
    }

    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }

    fn install_hook(&self) -> Result<()> {
        let path = self.work_dir().join(format!("{}.py", HOOK_MODULE));
        fs::write(&path, &self.hook_source)?;
        debug!(hook = %path.display(), "installed reflection hook");
        Ok(())
    }

    fn spawn(&self, script: &Path) -> std::io::Result<Child> {
        let dir = self.work_dir();
        let stdout = File::create(dir.join(STDOUT_FILE))?;
        let stderr = File::create(dir.join(STDERR_FILE))?;
        File::create(dir.join(FUZZOUT_FILE))?;

        Command::new(&self.config.interpreter)
            .args(&self.config.interpreter_args)
            .arg(script)
            .current_dir(dir)
            .env("PYTHONPATH", dir)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env(FUZZOUT_VAR, dir.join(FUZZOUT_FILE))
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
    }

    fn run(&self, source: &str, timeout: Duration) -> std::io::Result<Execution> {
        let dir = self.work_dir();
        let script = dir.join(SCRIPT_FILE);
        fs::write(&script, source)?;

        let start = Instant::now();
        let mut child = self.spawn(&script)?;
        let outcome = match wait_timeout(&mut child, timeout)? {
            Some(status) => classify(status),
            None => {
                // The child may exit between the last poll and the kill
                if let Err(e) = child.kill() {
                    debug!(error = %e, "kill after timeout failed");
                }
                child.wait()?;
                ExecutionOutcome::TimedOut
            }
        };
        let exec_time = start.elapsed();

        Ok(Execution::new(outcome)
            .with_output(read_lossy(&dir.join(STDOUT_FILE)), read_lossy(&dir.join(STDERR_FILE)))
            .with_fuzzout(read_lossy(&dir.join(FUZZOUT_FILE)))
            .with_exec_time(exec_time))
    }
}

impl Executor for ProcessExecutor {
    fn execute(&mut self, program: &Program, timeout: Option<Duration>) -> Execution {
        let source = self.lifter.lift(program);
        let timeout = timeout.unwrap_or(self.default_timeout);
        match self.run(&source, timeout) {
            Ok(execution) => {
                debug!(
                    program = %program.id,
                    outcome = %execution.outcome,
                    exec_time_ms = execution.exec_time.as_millis() as u64,
                    "executed program"
                );
                execution
            }
            Err(e) => {
                warn!(program = %program.id, error = %e, "failed to run interpreter");
                Execution::new(ExecutionOutcome::Failed(-1))
                    .with_output(String::new(), format!("failed to run interpreter: {}", e))
            }
        }
    }

    fn reset(&mut self) {
        match self.install_hook() {
            Ok(()) => info!(event = "executor_reset", work_dir = %self.work_dir().display()),
            Err(e) => warn!(error = %e, "failed to reinstall reflection hook"),
        }
    }

    fn lift(&self, program: &Program) -> String {
        self.lifter.lift(program)
    }
}

/// Wait for `child` to exit, giving up after `timeout`
fn wait_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn classify(status: ExitStatus) -> ExecutionOutcome {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExecutionOutcome::Crashed(signal);
        }
    }
    match status.code() {
        Some(0) => ExecutionOutcome::Succeeded,
        Some(code) => ExecutionOutcome::Failed(code),
        None => ExecutionOutcome::Failed(-1),
    }
}

fn read_lossy(path: &Path) -> String {
    match fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}
