//! Program interestingness.

use dashmap::DashSet;
use refuzz_core::{Execution, ReflectionRecord, ValueKind};
use std::fmt;

/// What made an execution interesting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aspects {
    pub description: String,
}

impl fmt::Display for Aspects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description)
    }
}

/// Decides whether a successful execution is worth keeping
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, execution: &Execution) -> Option<Aspects>;
}

/// Interesting when the side channel reports a (kind, type) pair that no
/// earlier execution produced
#[derive(Debug, Default)]
pub struct TypeNoveltyEvaluator {
    seen: DashSet<(ValueKind, String)>,
}

impl TypeNoveltyEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_seen(&self) -> usize {
        self.seen.len()
    }
}

impl Evaluator for TypeNoveltyEvaluator {
    fn evaluate(&self, execution: &Execution) -> Option<Aspects> {
        let novel: Vec<String> = ReflectionRecord::parse_stream(&execution.fuzzout)
            .into_iter()
            .filter(|r| self.seen.insert((r.kind, r.type_name.clone())))
            .map(|r| format!("{} {}", r.kind, r.type_name))
            .collect();
        if novel.is_empty() {
            return None;
        }
        Some(Aspects {
            description: format!("new types: {}", novel.join(", ")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refuzz_core::ExecutionOutcome;

    const INT: &str = r#"{"index":0,"kind":"primitive","type":"int","arity":null,"fields":[],"methods":[]}"#;
    const FUNC: &str = r#"{"index":1,"kind":"function","type":"function.f","arity":2,"fields":[],"methods":[]}"#;

    fn with_fuzzout(lines: &[&str]) -> Execution {
        Execution::new(ExecutionOutcome::Succeeded).with_fuzzout(lines.join("\n"))
    }

    #[test]
    fn test_new_types_are_interesting_once() {
        let evaluator = TypeNoveltyEvaluator::new();
        let aspects = evaluator.evaluate(&with_fuzzout(&[INT])).unwrap();
        assert_eq!(aspects.to_string(), "new types: primitive int");
        assert!(evaluator.evaluate(&with_fuzzout(&[INT])).is_none());

        let aspects = evaluator.evaluate(&with_fuzzout(&[INT, FUNC])).unwrap();
        assert!(aspects.description.contains("function function.f"));
        assert!(!aspects.description.contains("int"));
        assert_eq!(evaluator.num_seen(), 2);
    }

    #[test]
    fn test_no_records_is_not_interesting() {
        let evaluator = TypeNoveltyEvaluator::new();
        assert!(evaluator.evaluate(&with_fuzzout(&[])).is_none());
        assert!(evaluator.evaluate(&with_fuzzout(&["garbage"])).is_none());
    }
}
