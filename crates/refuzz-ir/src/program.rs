//! Programs: code plus non-semantic metadata.

use crate::code::Code;
use refuzz_core::{Error, ProgramId, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Free-text annotations attached to a program
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comments {
    pub header: Option<String>,
    pub footer: Option<String>,
    /// Keyed by instruction index
    pub instructions: BTreeMap<usize, String>,
}

impl Comments {
    pub fn add_header(&mut self, text: &str) {
        append_line(&mut self.header, text);
    }

    pub fn add_footer(&mut self, text: &str) {
        append_line(&mut self.footer, text);
    }

    pub fn add_at(&mut self, index: usize, text: &str) {
        let mut slot = self.instructions.remove(&index);
        append_line(&mut slot, text);
        if let Some(text) = slot {
            self.instructions.insert(index, text);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_none() && self.footer.is_none() && self.instructions.is_empty()
    }
}

fn append_line(slot: &mut Option<String>, text: &str) {
    match slot {
        Some(existing) => {
            existing.push('\n');
            existing.push_str(text);
        }
        None => *slot = Some(text.to_string()),
    }
}

/// An immutable IR program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    /// Program this one was derived from
    pub parent: Option<ProgramId>,
    pub code: Code,
    pub comments: Comments,
    /// Names of the components that contributed to this program
    pub contributors: BTreeSet<String>,
}

impl Program {
    /// Wrap code without validating it
    pub fn new(code: Code) -> Self {
        Self {
            id: ProgramId::new(),
            parent: None,
            code,
            comments: Comments::default(),
            contributors: BTreeSet::new(),
        }
    }

    /// Wrap code after checking its structural invariants
    pub fn from_code(code: Code) -> Result<Self> {
        code.check()?;
        Ok(Self::new(code))
    }

    pub fn size(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn add_contributor(&mut self, name: &str) {
        self.contributors.insert(name.to_string());
    }

    /// Copy with fuzzer-internal instructions removed. Instruction comments
    /// follow their instructions.
    pub fn strip_internal(&self) -> Program {
        let mut stripped = self.clone();
        let mut comments = BTreeMap::new();
        let mut new_index = 0;
        for instr in &self.code {
            if instr.is_internal() {
                continue;
            }
            if let Some(text) = self.comments.instructions.get(&instr.index()) {
                comments.insert(new_index, text.clone());
            }
            new_index += 1;
        }
        stripped.code.retain(|i| !i.is_internal());
        stripped.comments.instructions = comments;
        stripped
    }

    /// Serialize the program to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize and validate a program from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let program: Program = bincode::deserialize(bytes)?;
        program.validate()?;
        Ok(program)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize and validate a program from JSON
    pub fn from_json(source: &str) -> Result<Self> {
        let program: Program = serde_json::from_str(source)?;
        program.validate()?;
        Ok(program)
    }

    fn validate(&self) -> Result<()> {
        self.code
            .check()
            .map_err(|e| Error::Validation(format!("program {}: {}", self.id, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use crate::operation::Operation;
    use crate::variable::Variable;

    fn sample() -> Program {
        let mut code = Code::new();
        code.append(Instruction::new(Operation::LoadFloat { value: f64::NAN }, vec![Variable(0)]));
        code.append(Instruction::new(Operation::Print, vec![Variable(0)]));
        code.append(Instruction::new(Operation::LoadString { value: "x".into() }, vec![Variable(1)]));
        let mut program = Program::from_code(code).unwrap();
        program.comments.add_at(2, "string");
        program.add_contributor("test");
        program
    }

    #[test]
    fn test_program_serialization() {
        let program = sample();
        let bytes = program.to_bytes().unwrap();
        let back = Program::from_bytes(&bytes).unwrap();
        assert_eq!(back.size(), 3);
        assert_eq!(back.id, program.id);

        let json = program.to_json().unwrap();
        let back = Program::from_json(&json).unwrap();
        assert_eq!(back.contributors, program.contributors);
    }

    #[test]
    fn test_from_json_rejects_invalid_code() {
        let json = r#"{
            "id": "00000000-0000-0000-0000-000000000000",
            "parent": null,
            "code": {"instructions": [{"op": "LoopBreak", "inouts": [], "index": 0}]},
            "comments": {"header": null, "footer": null, "instructions": {}},
            "contributors": []
        }"#;
        assert!(matches!(Program::from_json(json), Err(Error::Validation(_))));
    }

    #[test]
    fn test_strip_internal_moves_comments() {
        let stripped = sample().strip_internal();
        assert_eq!(stripped.size(), 2);
        assert!(stripped.code.iter().all(|i| !i.is_internal()));
        assert_eq!(stripped.comments.instructions.get(&1).map(String::as_str), Some("string"));
        stripped.code.check().unwrap();
    }

    #[test]
    fn test_comments_accumulate() {
        let mut comments = Comments::default();
        assert!(comments.is_empty());
        comments.add_footer("a");
        comments.add_footer("b");
        assert_eq!(comments.footer.as_deref(), Some("a\nb"));
    }
}
