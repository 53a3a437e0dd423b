//! Persisting crashes and interesting programs.

use anyhow::{Context, Result};
use refuzz_core::Execution;
use refuzz_engine::{Event, EventObserver};
use refuzz_ir::{Program, PythonLifter};
use refuzz_runtime::{program_prefix, HOOK_MODULE, HOOK_SCRIPT};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Serialize)]
struct CrashReport<'a> {
    found_at: String,
    source: &'a str,
    program: &'a Program,
    execution: &'a Execution,
}

/// Writes every crash as a runnable script next to a JSON report, and every
/// interesting program as a JSON corpus file
pub struct OutputWriter {
    crashes: PathBuf,
    corpus: PathBuf,
    lifter: PythonLifter,
}

impl OutputWriter {
    /// Create `crashes/` and `corpus/` below `root`. The crash directory
    /// also receives the hook module so reproducers run as they are.
    pub fn create(root: &Path) -> Result<Self> {
        let crashes = root.join("crashes");
        let corpus = root.join("corpus");
        for dir in [&crashes, &corpus] {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        std::fs::write(crashes.join(format!("{}.py", HOOK_MODULE)), HOOK_SCRIPT)
            .context("installing hook next to crash reproducers")?;
        Ok(Self {
            crashes,
            corpus,
            lifter: PythonLifter::default().with_prefix(program_prefix()),
        })
    }

    pub fn write_crash(&self, program: &Program, execution: &Execution) -> Result<PathBuf> {
        let source = self.lifter.lift(program);
        let script = self.crashes.join(format!("crash-{}.py", program.id));
        std::fs::write(&script, &source).with_context(|| format!("writing {}", script.display()))?;

        let report = CrashReport {
            found_at: chrono::Utc::now().to_rfc3339(),
            source: &source,
            program,
            execution,
        };
        let path = self.crashes.join(format!("crash-{}.json", program.id));
        std::fs::write(&path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(script)
    }

    pub fn write_interesting(&self, program: &Program) -> Result<PathBuf> {
        let path = self.corpus.join(format!("{}.json", program.id));
        std::fs::write(&path, program.to_json()?).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

impl EventObserver for OutputWriter {
    fn on_event(&self, event: &Event) {
        match event {
            Event::CrashFound { program, execution } => match self.write_crash(program, execution) {
                Ok(path) => info!(event = "crash_saved", path = %path.display()),
                Err(e) => warn!(error = %e, "failed to save crash"),
            },
            Event::InterestingProgramFound { program, .. } => {
                if let Err(e) = self.write_interesting(program) {
                    warn!(error = %e, "failed to save interesting program");
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refuzz_core::ExecutionOutcome;
    use refuzz_ir::ProgramBuilder;

    fn program() -> Program {
        let mut b = ProgramBuilder::new();
        let s = b.load_string("abc");
        b.call_method("upper", s, &[]);
        b.finalize()
    }

    #[test]
    fn test_crash_reports_are_runnable() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::create(dir.path()).unwrap();
        let program = program();
        let execution = Execution::new(ExecutionOutcome::Crashed(6)).with_output("", "Aborted");

        writer.on_event(&Event::CrashFound {
            program: program.clone(),
            execution,
        });

        let crashes = dir.path().join("crashes");
        let script = std::fs::read_to_string(crashes.join(format!("crash-{}.py", program.id))).unwrap();
        assert!(script.starts_with("from refuzz_mirror import *"));
        assert!(script.contains("upper()"));
        assert!(crashes.join("refuzz_mirror.py").exists());

        let report = std::fs::read_to_string(crashes.join(format!("crash-{}.json", program.id))).unwrap();
        let report: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(report["execution"]["stderr"], "Aborted");
        assert_eq!(report["source"], script.as_str());
    }

    #[test]
    fn test_interesting_programs_can_be_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::create(dir.path()).unwrap();
        let program = program();
        writer.on_event(&Event::InterestingProgramFound {
            program: program.clone(),
            aspects: "new types: primitive str".to_string(),
        });

        let corpus = refuzz_engine::InMemoryCorpus::new();
        assert_eq!(corpus.load_dir(&dir.path().join("corpus")).unwrap(), 1);
        assert_eq!(corpus.programs()[0].code, program.code);
    }
}
