//! Records emitted by the runtime reflection hook.
//!
//! The hook writes one JSON object per line to the `fuzzout` side channel:
//!
//! ```text
//! {"index": 3, "kind": "function", "type": "function", "arity": 2, "fields": [], "methods": [["__call__", "null"]]}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse shape of an observed runtime value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Primitive,
    Object,
    Function,
    Class,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Primitive => "primitive",
            ValueKind::Object => "object",
            ValueKind::Function => "function",
            ValueKind::Class => "class",
        };
        f.write_str(name)
    }
}

/// Observation of the value produced by one instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionRecord {
    /// Position of the described instruction in the uninstrumented program
    pub index: usize,
    pub kind: ValueKind,
    #[serde(rename = "type")]
    pub type_name: String,
    /// Number of required parameters, if the value is callable and it is known
    pub arity: Option<usize>,
    pub fields: Vec<String>,
    /// `(name, arity)` pairs; the arity is a decimal string or `"null"`
    pub methods: Vec<(String, String)>,
}

impl ReflectionRecord {
    /// Decode a single line of hook output. Leading NUL bytes and trailing
    /// whitespace are ignored.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_start_matches('\0').trim();
        if line.is_empty() {
            return None;
        }
        serde_json::from_str(line).ok()
    }

    /// Decode every well-formed line of a `fuzzout` capture, silently
    /// skipping lines that are not valid records.
    pub fn parse_stream(fuzzout: &str) -> Vec<Self> {
        fuzzout.lines().filter_map(Self::parse_line).collect()
    }

    /// Whether the record carries any structure a mutator can act on
    pub fn is_usable(&self) -> bool {
        match self.kind {
            ValueKind::Function | ValueKind::Class => true,
            ValueKind::Primitive | ValueKind::Object => {
                !self.fields.is_empty() || !self.methods.is_empty()
            }
        }
    }

    /// Parsed arity of a method entry
    pub fn method_arity(arity: &str) -> Option<usize> {
        arity.trim().parse().ok()
    }
}
