//! Per-contributor sample statistics.

use serde::{Deserialize, Serialize};

/// Classification of a generated sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleKind {
    Valid,
    Interesting,
    Invalid,
    TimedOut,
    Crashing,
}

/// Counters describing what a contributor (usually a mutator) produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleStats {
    pub valid: u64,
    pub interesting: u64,
    pub invalid: u64,
    pub timed_out: u64,
    pub crashing: u64,
    /// Mutation attempts that produced no program
    pub failed_to_generate: u64,
    /// Net instructions added over all produced programs
    pub added_instructions: i64,
}

impl SampleStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: SampleKind) {
        match kind {
            SampleKind::Valid => self.valid += 1,
            SampleKind::Interesting => self.interesting += 1,
            SampleKind::Invalid => self.invalid += 1,
            SampleKind::TimedOut => self.timed_out += 1,
            SampleKind::Crashing => self.crashing += 1,
        }
    }

    /// Samples that were executed
    pub fn total_samples(&self) -> u64 {
        self.valid + self.interesting + self.invalid + self.timed_out + self.crashing
    }

    /// Fraction of executed samples that ran to completion
    pub fn success_rate(&self) -> f64 {
        let total = self.total_samples();
        if total == 0 {
            return 0.0;
        }
        (self.valid + self.interesting) as f64 / total as f64
    }

    /// Average instructions added per executed sample
    pub fn avg_added_instructions(&self) -> f64 {
        let total = self.total_samples();
        if total == 0 {
            return 0.0;
        }
        self.added_instructions as f64 / total as f64
    }

    pub fn merge(&mut self, other: &SampleStats) {
        self.valid += other.valid;
        self.interesting += other.interesting;
        self.invalid += other.invalid;
        self.timed_out += other.timed_out;
        self.crashing += other.crashing;
        self.failed_to_generate += other.failed_to_generate;
        self.added_instructions += other.added_instructions;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let mut stats = SampleStats::new();
        assert_eq!(stats.success_rate(), 0.0);

        stats.record(SampleKind::Valid);
        stats.record(SampleKind::Interesting);
        stats.record(SampleKind::Invalid);
        stats.record(SampleKind::TimedOut);
        assert_eq!(stats.total_samples(), 4);
        assert!((stats.success_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_merge() {
        let mut a = SampleStats {
            valid: 2,
            added_instructions: 10,
            ..Default::default()
        };
        let b = SampleStats {
            crashing: 1,
            failed_to_generate: 4,
            added_instructions: -3,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.crashing, 1);
        assert_eq!(a.failed_to_generate, 4);
        assert_eq!(a.added_instructions, 7);
        assert!((a.avg_added_instructions() - 7.0 / 3.0).abs() < 1e-9);
    }
}
