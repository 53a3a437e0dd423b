//! Instruction sequences, structural validation and block groups.

use crate::context::{Context, ContextMode};
use crate::instruction::Instruction;
use crate::operation::Operation;
use crate::variable::Variable;
use refuzz_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::{Index, RangeInclusive};

/// An ordered sequence of instructions whose indices match their positions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Code {
    instructions: Vec<Instruction>,
}

impl Code {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    pub fn last(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    /// Append an instruction, assigning its index
    pub fn append(&mut self, mut instr: Instruction) {
        instr.set_index(self.instructions.len());
        self.instructions.push(instr);
    }

    /// Keep only instructions for which `keep` holds and renumber them.
    /// The result is not checked.
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&Instruction) -> bool) {
        self.instructions.retain(|i| keep(i));
        for (index, instr) in self.instructions.iter_mut().enumerate() {
            instr.set_index(index);
        }
    }

    /// Number of variables declared by this code
    pub fn num_variables(&self) -> usize {
        self.instructions
            .iter()
            .map(|i| i.all_outputs().len())
            .sum()
    }

    /// Validate the structural invariants: dense indices, variables
    /// declared once in allocation order, inputs visible at their use,
    /// required contexts active, and blocks properly nested.
    pub fn check(&self) -> Result<()> {
        let mut next_variable = 0u32;
        let mut defined: HashSet<Variable> = HashSet::new();
        let mut scopes: Vec<Vec<Variable>> = vec![Vec::new()];
        let mut visible: HashSet<Variable> = HashSet::new();
        let mut contexts: Vec<Context> = vec![Context::SCRIPT];
        let mut open_blocks: Vec<&Instruction> = Vec::new();
        // One flag per open switch: whether a default case was seen
        let mut switch_defaults: Vec<bool> = Vec::new();

        for (position, instr) in self.instructions.iter().enumerate() {
            let fail = |reason: String| {
                Err(Error::Validation(format!(
                    "instruction {} ({}): {}",
                    position, instr, reason
                )))
            };

            if instr.index() != position {
                return fail(format!("has index {}", instr.index()));
            }

            for input in instr.inputs() {
                if !visible.contains(input) {
                    return fail(format!("input {} is not visible", input));
                }
            }

            let current = *contexts.last().unwrap_or(&Context::EMPTY);
            let desc = instr.descriptor();
            if !current.contains(desc.required_context) {
                return fail(format!(
                    "requires context {} but only {} is active",
                    desc.required_context, current
                ));
            }

            if instr.is_block_end() {
                let Some(opener) = open_blocks.pop() else {
                    return fail("closes a block that was never opened".to_string());
                };
                if !instr.op().closes(opener.op()) {
                    return fail(format!("cannot close {}", opener.op().name()));
                }
                contexts.pop();
                for v in scopes.pop().unwrap_or_default() {
                    visible.remove(&v);
                }
                if matches!(instr.op(), Operation::EndSwitch) {
                    switch_defaults.pop();
                }
            }

            match instr.op() {
                Operation::BeginSwitch => switch_defaults.push(false),
                Operation::BeginSwitchCase | Operation::BeginSwitchDefaultCase => {
                    let seen_default = switch_defaults.last_mut();
                    match seen_default {
                        Some(true) => return fail("case follows the default case".to_string()),
                        Some(flag) => {
                            *flag = matches!(instr.op(), Operation::BeginSwitchDefaultCase)
                        }
                        None => return fail("case outside of a switch".to_string()),
                    }
                }
                _ => {}
            }

            let mut declare = |v: Variable, scope: &mut Vec<Variable>| -> Result<()> {
                if v.number() != next_variable || !defined.insert(v) {
                    return Err(Error::Validation(format!(
                        "instruction {}: variable {} declared out of order",
                        position, v
                    )));
                }
                next_variable += 1;
                visible.insert(v);
                scope.push(v);
                Ok(())
            };

            if let Some(scope) = scopes.last_mut() {
                for &v in instr.outputs() {
                    declare(v, scope)?;
                }
            }

            if instr.is_block_start() {
                let enclosing = *contexts.last().unwrap_or(&Context::EMPTY);
                let opened = match desc.context_mode {
                    ContextMode::Isolate => desc.context_opened,
                    ContextMode::Propagate => enclosing | desc.context_opened,
                    ContextMode::Resume => {
                        let outer = contexts
                            .len()
                            .checked_sub(2)
                            .map(|i| contexts[i])
                            .unwrap_or(Context::SCRIPT);
                        outer | desc.context_opened
                    }
                };
                contexts.push(opened);
                open_blocks.push(instr);
                let mut scope = Vec::new();
                for &v in instr.inner_outputs() {
                    declare(v, &mut scope)?;
                }
                scopes.push(scope);
            } else if !instr.inner_outputs().is_empty() {
                return fail("inner outputs outside of a block start".to_string());
            }
        }

        if let Some(open) = open_blocks.last() {
            return Err(Error::Validation(format!(
                "block opened by instruction {} ({}) is never closed",
                open.index(),
                open.op().name()
            )));
        }

        Ok(())
    }

    /// Every block group whose head satisfies `predicate`, nested groups
    /// included, ordered by head index. The code must be well formed.
    pub fn find_block_groups(&self, predicate: impl Fn(&Instruction) -> bool) -> Vec<BlockGroup> {
        let mut groups = Vec::new();
        let mut open: Vec<BlockGroup> = Vec::new();

        for instr in &self.instructions {
            if instr.is_block_end() && instr.is_block_start() {
                if let Some(group) = open.last_mut() {
                    group.block_instructions.push(instr.index());
                }
            } else if instr.is_block_end() {
                if let Some(mut group) = open.pop() {
                    group.tail = instr.index();
                    group.block_instructions.push(instr.index());
                    if predicate(&self.instructions[group.head]) {
                        groups.push(group);
                    }
                }
            } else if instr.is_block_start() {
                open.push(BlockGroup {
                    head: instr.index(),
                    tail: instr.index(),
                    block_instructions: vec![instr.index()],
                });
            }
        }

        groups.sort_by_key(|g| g.head);
        groups
    }

    /// The block group opened by the block start at `head`
    pub fn block_group_at(&self, head: usize) -> Option<BlockGroup> {
        self.find_block_groups(|i| i.index() == head)
            .into_iter()
            .next()
    }

    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }
}

impl Index<usize> for Code {
    type Output = Instruction;

    fn index(&self, index: usize) -> &Instruction {
        &self.instructions[index]
    }
}

impl<'a> IntoIterator for &'a Code {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.instructions.iter()
    }
}

/// A matched region from a block start to its final block end, including
/// intermediate block instructions such as `BeginCatch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockGroup {
    pub head: usize,
    pub tail: usize,
    /// Indices of the group's own block instructions, head and tail included
    pub block_instructions: Vec<usize>,
}

impl BlockGroup {
    pub fn range(&self) -> RangeInclusive<usize> {
        self.head..=self.tail
    }

    pub fn contains(&self, index: usize) -> bool {
        self.range().contains(&index)
    }

    /// Whether `index` is one of the group's own block instructions
    pub fn is_own_block_instruction(&self, index: usize) -> bool {
        self.block_instructions.contains(&index)
    }

    /// Indices strictly inside the group that are not its own block
    /// instructions
    pub fn body(&self) -> impl Iterator<Item = usize> + '_ {
        self.range()
            .filter(move |i| !self.is_own_block_instruction(*i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Comparator;

    fn code_from(ops: Vec<(Operation, Vec<u32>)>) -> Code {
        let mut code = Code::new();
        for (op, vars) in ops {
            code.append(Instruction::new(op, vars.into_iter().map(Variable).collect()));
        }
        code
    }

    #[test]
    fn test_check_accepts_nested_blocks() {
        let code = code_from(vec![
            (Operation::LoadInteger { value: 0 }, vec![0]),
            (Operation::LoadInteger { value: 10 }, vec![1]),
            (Operation::BeginWhileLoop { comparator: Comparator::LessThan }, vec![0, 1]),
            (Operation::BeginTry, vec![]),
            (Operation::LoopBreak, vec![]),
            (Operation::BeginCatch, vec![2]),
            (Operation::LoopContinue, vec![]),
            (Operation::EndTryCatchFinally, vec![]),
            (Operation::EndWhileLoop, vec![]),
        ]);
        code.check().unwrap();
    }

    #[test]
    fn test_check_rejects_out_of_scope_use() {
        let code = code_from(vec![
            (Operation::BeginTry, vec![]),
            (Operation::LoadInteger { value: 1 }, vec![0]),
            (Operation::BeginFinally, vec![]),
            (Operation::EndTryCatchFinally, vec![]),
            (Operation::ThrowException, vec![0]),
        ]);
        assert!(code.check().is_err());
    }

    #[test]
    fn test_check_rejects_missing_context() {
        let code = code_from(vec![(Operation::LoopBreak, vec![])]);
        assert!(code.check().is_err());

        let code = code_from(vec![
            (Operation::LoadInteger { value: 1 }, vec![0]),
            (Operation::Return, vec![0]),
        ]);
        assert!(code.check().is_err());
    }

    #[test]
    fn test_check_rejects_mismatched_blocks() {
        let code = code_from(vec![(Operation::BeginTry, vec![]), (Operation::EndIf, vec![])]);
        assert!(code.check().is_err());

        let code = code_from(vec![(Operation::BeginTry, vec![])]);
        assert!(code.check().is_err());
    }

    #[test]
    fn test_switch_case_resumes_outer_context() {
        let code = code_from(vec![
            (Operation::LoadInteger { value: 1 }, vec![0]),
            (Operation::BeginForLoop, vec![0, 0, 0, 1]),
            (Operation::BeginSwitch, vec![1]),
            (Operation::BeginSwitchCase, vec![0]),
            (Operation::LoopBreak, vec![]),
            (Operation::EndSwitchCase, vec![]),
            (Operation::BeginSwitchDefaultCase, vec![]),
            (Operation::EndSwitchCase, vec![]),
            (Operation::EndSwitch, vec![]),
            (Operation::EndForLoop, vec![]),
        ]);
        code.check().unwrap();
    }

    #[test]
    fn test_default_case_must_be_last() {
        let code = code_from(vec![
            (Operation::LoadInteger { value: 1 }, vec![0]),
            (Operation::BeginSwitch, vec![0]),
            (Operation::BeginSwitchDefaultCase, vec![]),
            (Operation::EndSwitchCase, vec![]),
            (Operation::BeginSwitchCase, vec![0]),
            (Operation::EndSwitchCase, vec![]),
            (Operation::EndSwitch, vec![]),
        ]);
        assert!(code.check().is_err());
    }

    #[test]
    fn test_statements_not_allowed_in_class_body() {
        let code = code_from(vec![
            (Operation::BeginClassDefinition { has_superclass: false }, vec![0]),
            (Operation::LoadInteger { value: 1 }, vec![1]),
            (Operation::EndClassDefinition, vec![]),
        ]);
        assert!(code.check().is_err());
    }

    #[test]
    fn test_find_try_groups() {
        let code = code_from(vec![
            (Operation::BeginTry, vec![]),
            (Operation::BeginTry, vec![]),
            (Operation::LoadNull, vec![0]),
            (Operation::BeginCatch, vec![1]),
            (Operation::EndTryCatchFinally, vec![]),
            (Operation::BeginCatch, vec![2]),
            (Operation::BeginFinally, vec![]),
            (Operation::EndTryCatchFinally, vec![]),
        ]);
        code.check().unwrap();

        let groups = code.find_block_groups(|i| i.op().is_try_start());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].range(), 0..=7);
        assert_eq!(groups[0].block_instructions, vec![0, 5, 6, 7]);
        assert_eq!(groups[1].range(), 1..=4);
        assert_eq!(groups[1].body().collect::<Vec<_>>(), vec![2]);
    }
}
