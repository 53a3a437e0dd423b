//! Reusable analyses over IR code.

use crate::code::Code;
use crate::operation::Operation;
use crate::variable::Variable;
use std::collections::HashMap;

/// Counts uses and assignments of every variable.
///
/// A declaration is one assignment; every `Reassign` or `Update` of the
/// variable adds another. Every occurrence as an input is a use, including
/// as the target of a reassignment.
#[derive(Debug, Default)]
pub struct VariableAnalyzer {
    uses: HashMap<Variable, usize>,
    assignments: HashMap<Variable, usize>,
}

impl VariableAnalyzer {
    pub fn new(code: &Code) -> Self {
        let mut analyzer = Self::default();
        for instr in code {
            for &v in instr.all_outputs() {
                analyzer.assignments.insert(v, 1);
                analyzer.uses.insert(v, 0);
            }
            for &v in instr.inputs() {
                *analyzer.uses.entry(v).or_insert(0) += 1;
            }
            if matches!(instr.op(), Operation::Reassign | Operation::Update { .. }) {
                *analyzer.assignments.entry(instr.input(0)).or_insert(0) += 1;
            }
        }
        analyzer
    }

    pub fn num_uses(&self, v: Variable) -> usize {
        self.uses.get(&v).copied().unwrap_or(0)
    }

    pub fn num_assignments(&self, v: Variable) -> usize {
        self.assignments.get(&v).copied().unwrap_or(0)
    }

    /// Declared once and never changed afterwards
    pub fn is_single_assignment(&self, v: Variable) -> bool {
        self.num_assignments(v) <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use crate::operation::BinaryOperator;

    #[test]
    fn test_counts_uses_and_assignments() {
        let mut code = Code::new();
        code.append(Instruction::new(Operation::LoadInteger { value: 1 }, vec![Variable(0)]));
        code.append(Instruction::new(Operation::LoadInteger { value: 2 }, vec![Variable(1)]));
        code.append(Instruction::new(Operation::Reassign, vec![Variable(0), Variable(1)]));
        code.append(Instruction::new(
            Operation::Update { op: BinaryOperator::Add },
            vec![Variable(0), Variable(1)],
        ));

        let analyzer = VariableAnalyzer::new(&code);
        assert_eq!(analyzer.num_assignments(Variable(0)), 3);
        assert_eq!(analyzer.num_uses(Variable(0)), 2);
        assert_eq!(analyzer.num_assignments(Variable(1)), 1);
        assert_eq!(analyzer.num_uses(Variable(1)), 2);
        assert!(!analyzer.is_single_assignment(Variable(0)));
    }
}
