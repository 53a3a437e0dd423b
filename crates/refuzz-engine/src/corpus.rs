//! Program corpus shared between workers.

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::RngCore;
use refuzz_core::{Error, Result};
use refuzz_ir::Program;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Source of programs to mutate and sink for interesting ones
pub trait Corpus: Send + Sync {
    /// A random program to start a fuzzing iteration from
    fn random_element_for_mutating(&self, rng: &mut dyn RngCore) -> Option<Program>;

    fn add(&self, program: Program);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Append-only corpus held in memory.
///
/// Reads take a shared lock and clone the chosen program; admission takes
/// the write lock only to push.
#[derive(Debug, Default)]
pub struct InMemoryCorpus {
    programs: RwLock<Vec<Arc<Program>>>,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` program in `dir`. Files that fail to parse or
    /// validate are skipped with a warning.
    pub fn load_dir(&self, dir: &Path) -> Result<usize> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| Error::Corpus(format!("cannot read {}: {}", dir.display(), e)))?;
        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let program = std::fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|source| Program::from_json(&source));
            match program {
                Ok(program) => {
                    self.add(program);
                    loaded += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping corpus file"),
            }
        }
        info!(event = "corpus_loaded", dir = %dir.display(), programs = loaded);
        Ok(loaded)
    }

    /// Snapshot of the current programs
    pub fn programs(&self) -> Vec<Arc<Program>> {
        self.programs.read().clone()
    }
}

impl Corpus for InMemoryCorpus {
    fn random_element_for_mutating(&self, rng: &mut dyn RngCore) -> Option<Program> {
        let programs = self.programs.read();
        programs.choose(rng).map(|p| Program::clone(p))
    }

    fn add(&self, program: Program) {
        let program = program.strip_internal();
        if program.is_empty() {
            return;
        }
        self.programs.write().push(Arc::new(program));
    }

    fn len(&self) -> usize {
        self.programs.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use refuzz_ir::ProgramBuilder;

    fn program(value: i64) -> Program {
        let mut b = ProgramBuilder::new();
        b.load_int(value);
        b.finalize()
    }

    #[test]
    fn test_empty_corpus_has_nothing_to_mutate() {
        let corpus = InMemoryCorpus::new();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(corpus.is_empty());
        assert!(corpus.random_element_for_mutating(&mut rng).is_none());
    }

    #[test]
    fn test_admission_strips_internal_instructions() {
        let corpus = InMemoryCorpus::new();
        let mut b = ProgramBuilder::new();
        let x = b.load_int(1);
        b.print(x);
        corpus.add(b.finalize());

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let stored = corpus.random_element_for_mutating(&mut rng).unwrap();
        assert_eq!(stored.size(), 1);
        assert_eq!(corpus.len(), 1);
    }

    #[test]
    fn test_load_dir_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), program(1).to_json().unwrap()).unwrap();
        std::fs::write(dir.path().join("b.json"), "{ not a program").unwrap();
        std::fs::write(dir.path().join("c.txt"), program(2).to_json().unwrap()).unwrap();

        let corpus = InMemoryCorpus::new();
        assert_eq!(corpus.load_dir(dir.path()).unwrap(), 1);
        assert_eq!(corpus.len(), 1);
    }

    #[test]
    fn test_load_missing_dir_fails() {
        let corpus = InMemoryCorpus::new();
        let result = corpus.load_dir(Path::new("/nonexistent/refuzz-corpus"));
        assert!(matches!(result, Err(Error::Corpus(_))));
    }

    #[test]
    fn test_concurrent_admission() {
        let corpus = Arc::new(InMemoryCorpus::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let corpus = corpus.clone();
                std::thread::spawn(move || {
                    for j in 0..25 {
                        corpus.add(program(i * 100 + j));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(corpus.len(), 100);
    }
}
