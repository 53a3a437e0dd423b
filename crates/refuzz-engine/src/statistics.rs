//! Sample statistics per contributor, shared between workers.

use dashmap::DashMap;
use refuzz_core::{SampleKind, SampleStats};
use refuzz_ir::Program;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Default)]
pub struct Statistics {
    contributors: DashMap<String, SampleStats>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute a sample to every contributor of `program`
    pub fn record(&self, program: &Program, kind: SampleKind) {
        for name in &program.contributors {
            self.contributors.entry(name.clone()).or_default().record(kind);
        }
    }

    pub fn failed_to_generate(&self, contributor: &str) {
        self.contributors
            .entry(contributor.to_string())
            .or_default()
            .failed_to_generate += 1;
    }

    pub fn added_instructions(&self, contributor: &str, delta: i64) {
        self.contributors
            .entry(contributor.to_string())
            .or_default()
            .added_instructions += delta;
    }

    pub fn get(&self, contributor: &str) -> Option<SampleStats> {
        self.contributors.get(contributor).map(|s| s.clone())
    }

    pub fn snapshot(&self) -> BTreeMap<String, SampleStats> {
        self.contributors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn totals(&self) -> SampleStats {
        let mut totals = SampleStats::new();
        for entry in self.contributors.iter() {
            totals.merge(entry.value());
        }
        totals
    }

    pub fn log_summary(&self) {
        for (name, stats) in self.snapshot() {
            info!(
                event = "contributor_stats",
                contributor = %name,
                valid = stats.valid,
                interesting = stats.interesting,
                invalid = stats.invalid,
                timed_out = stats.timed_out,
                crashing = stats.crashing,
                failed_to_generate = stats.failed_to_generate,
                success_rate = stats.success_rate(),
                avg_added_instructions = stats.avg_added_instructions(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refuzz_ir::ProgramBuilder;

    #[test]
    fn test_samples_are_attributed_to_all_contributors() {
        let stats = Statistics::new();
        let mut b = ProgramBuilder::new();
        b.load_int(1);
        let mut program = b.finalize();
        program.add_contributor("ReflectionMutator");
        program.add_contributor("OperationMutator");

        stats.record(&program, SampleKind::Valid);
        stats.record(&program, SampleKind::Crashing);
        stats.failed_to_generate("ReflectionMutator");
        stats.added_instructions("ReflectionMutator", 7);

        let reflection = stats.get("ReflectionMutator").unwrap();
        assert_eq!(reflection.valid, 1);
        assert_eq!(reflection.crashing, 1);
        assert_eq!(reflection.failed_to_generate, 1);
        assert_eq!(reflection.added_instructions, 7);
        assert_eq!(stats.get("OperationMutator").unwrap().total_samples(), 2);
        assert_eq!(stats.totals().total_samples(), 4);
        assert_eq!(stats.snapshot().len(), 2);
    }
}
